use crate::config::AppConfig;
use async_trait::async_trait;
use tracing::info;

/// Outbound mail transport. Deliveries are driven from the outbox table, so
/// implementations only need a single best-effort send.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// SMTP-relay sender. Hands the message to the configured relay host; the
/// relay owns queuing and final delivery.
pub struct SmtpMailer {
    host: String,
    username: String,
    password: String,
}

impl SmtpMailer {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            host: config.mail_host.clone(),
            username: config.mail_username.clone(),
            password: config.mail_password.clone(),
        }
    }

    /// Arguments for the sendmail submission, including the relay AUTH
    /// credentials when configured.
    fn relay_args(&self, recipient: &str) -> Vec<String> {
        let mut args = vec!["-S".to_string(), self.host.clone()];
        if !self.username.is_empty() {
            args.push(format!("-au{}", self.username));
        }
        if !self.password.is_empty() {
            args.push(format!("-ap{}", self.password));
        }
        args.push(recipient.to_string());
        args
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        // Local relay submission over the sendmail interface keeps the binary
        // free of a TLS/SMTP client dependency; the relay host is expected to
        // accept on behalf of `mail_username`.
        let message = format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\n\r\n{}",
            self.username, recipient, subject, body
        );

        let mut child = tokio::process::Command::new("sendmail")
            .args(self.relay_args(recipient))
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn sendmail: {}", e))?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            stdin.write_all(message.as_bytes()).await?;
        }

        let status = child.wait().await?;
        if !status.success() {
            anyhow::bail!("sendmail exited with {}", status);
        }

        info!("📧 Mail handed to relay for {}", recipient);
        Ok(())
    }
}

/// No-op sender for tests and local development.
pub struct NoopMailer;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_args_carry_auth_credentials() {
        let mut config = AppConfig::default();
        config.mail_host = "relay.example.com".to_string();
        config.mail_username = "billing@example.com".to_string();
        config.mail_password = "hunter22".to_string();

        let mailer = SmtpMailer::new(&config);
        let args = mailer.relay_args("renter@example.com");
        assert_eq!(
            args,
            vec![
                "-S",
                "relay.example.com",
                "-aubilling@example.com",
                "-aphunter22",
                "renter@example.com",
            ]
        );
    }

    #[test]
    fn test_relay_args_omit_empty_credentials() {
        let config = AppConfig::default();
        let mailer = SmtpMailer::new(&config);
        let args = mailer.relay_args("renter@example.com");
        assert_eq!(args, vec!["-S", "127.0.0.1", "renter@example.com"]);
    }
}

#[async_trait]
impl Mailer for NoopMailer {
    async fn send(&self, recipient: &str, subject: &str, _body: &str) -> anyhow::Result<()> {
        info!("📧 (noop) would send '{}' to {}", subject, recipient);
        Ok(())
    }
}
