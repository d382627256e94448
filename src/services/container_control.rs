use crate::api::error::AppError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Remote docker control. Commands run over a remote-command channel and are
/// bounded by a timeout; a hung host surfaces as `AppError::Timeout` instead
/// of stalling the caller.
#[async_trait]
pub trait ContainerControl: Send + Sync {
    async fn start(&self, host: &str, container_name: &str) -> Result<(), AppError>;
    async fn stop(&self, host: &str, container_name: &str) -> Result<(), AppError>;
    async fn inspect(&self, host: &str, container_name: &str) -> Result<String, AppError>;
}

/// Runs `ssh <host> docker <verb> <name>` with a bounded timeout.
pub struct SshContainerControl {
    timeout: Duration,
}

impl SshContainerControl {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    async fn run(&self, host: &str, args: &[&str]) -> Result<String, AppError> {
        let mut cmd = tokio::process::Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg(host)
            .arg("docker")
            .args(args);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "docker {} on {} exceeded {}s",
                    args.join(" "),
                    host,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| AppError::ExternalService(format!("ssh to {} failed: {}", host, e)))?;

        if !output.status.success() {
            return Err(AppError::ExternalService(format!(
                "docker {} on {} exited with {}: {}",
                args.join(" "),
                host,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ContainerControl for SshContainerControl {
    async fn start(&self, host: &str, container_name: &str) -> Result<(), AppError> {
        self.run(host, &["start", container_name]).await?;
        info!("🐳 Started container {} on {}", container_name, host);
        Ok(())
    }

    async fn stop(&self, host: &str, container_name: &str) -> Result<(), AppError> {
        self.run(host, &["stop", container_name]).await?;
        info!("🐳 Stopped container {} on {}", container_name, host);
        Ok(())
    }

    async fn inspect(&self, host: &str, container_name: &str) -> Result<String, AppError> {
        self.run(
            host,
            &["inspect", "--format", "{{.State.Status}}", container_name],
        )
        .await
        .map(|s| s.trim().to_string())
    }
}

/// Accepts every command without touching any host. Used in tests and when
/// no container fleet is wired up.
pub struct NoopControl;

#[async_trait]
impl ContainerControl for NoopControl {
    async fn start(&self, _host: &str, _container_name: &str) -> Result<(), AppError> {
        Ok(())
    }

    async fn stop(&self, _host: &str, _container_name: &str) -> Result<(), AppError> {
        Ok(())
    }

    async fn inspect(&self, _host: &str, _container_name: &str) -> Result<String, AppError> {
        Ok("running".to_string())
    }
}
