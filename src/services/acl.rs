use crate::api::error::AppError;
use crate::entities::{acl_logs, prelude::*, user_servers, users};
use chrono::Utc;
use dashmap::DashMap;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
pub struct AclServerEntry {
    pub id: i32,
    pub ip: String,
    pub region: String,
}

/// The per-user ACL document as persisted on disk. Downloads return the
/// stored bytes verbatim; the server set is frozen at generation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
pub struct AclDocument {
    pub user_id: i32,
    pub username: String,
    pub email: String,
    pub servers: Vec<AclServerEntry>,
}

#[derive(Debug, Clone)]
pub struct AclIndexEntry {
    pub file_path: PathBuf,
    pub version: String,
}

/// Materializes per-user access-control documents. The index is an injected
/// cache keyed by user id; the `acl_logs` table and the files themselves are
/// the durable record, so the index is rebuilt lazily after a restart.
#[derive(Clone)]
pub struct AclService {
    db: DatabaseConnection,
    acl_dir: PathBuf,
    index: Arc<DashMap<i32, AclIndexEntry>>,
}

impl AclService {
    pub fn new(
        db: DatabaseConnection,
        acl_dir: impl Into<PathBuf>,
        index: Arc<DashMap<i32, AclIndexEntry>>,
    ) -> Self {
        Self {
            db,
            acl_dir: acl_dir.into(),
            index,
        }
    }

    /// Builds the document from the user's current server bindings and
    /// overwrites the backing file unconditionally.
    pub async fn generate(&self, user_id: i32) -> Result<AclDocument, AppError> {
        let user = Users::find_by_id(user_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        self.write_document(&user).await
    }

    /// Same as generate, but only valid for users that already have a
    /// document on record.
    pub async fn update(&self, user_id: i32) -> Result<AclDocument, AppError> {
        let user = Users::find_by_id(user_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        if self.lookup_entry(user_id).await?.is_none() {
            return Err(AppError::NotFound(
                "No ACL document exists for this user".to_string(),
            ));
        }

        self.write_document(&user).await
    }

    /// Returns the stored document bytes exactly as generated.
    pub async fn download(&self, username: &str) -> Result<Vec<u8>, AppError> {
        let user = Users::find()
            .filter(users::Column::Username.eq(username))
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let entry = self
            .lookup_entry(user.id)
            .await?
            .ok_or_else(|| AppError::NotFound("No ACL document exists for this user".to_string()))?;

        tokio::fs::read(&entry.file_path).await.map_err(|e| {
            AppError::Internal(format!(
                "ACL document missing from {}: {}",
                entry.file_path.display(),
                e
            ))
        })
    }

    async fn write_document(&self, user: &users::Model) -> Result<AclDocument, AppError> {
        let bindings = UserServers::find()
            .filter(user_servers::Column::UserId.eq(user.id))
            .all(&self.db)
            .await?;

        let mut servers = Vec::with_capacity(bindings.len());
        for binding in bindings {
            if let Some(server) = Servers::find_by_id(binding.server_id).one(&self.db).await? {
                servers.push(AclServerEntry {
                    id: server.id,
                    ip: server.ip,
                    region: server.region,
                });
            }
        }

        let document = AclDocument {
            user_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            servers,
        };

        let path = self.document_path(&user.username);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Internal(format!("cannot create ACL dir: {}", e)))?;
        }

        let bytes = serde_json::to_vec(&document)
            .map_err(|e| AppError::Internal(format!("ACL serialization failed: {}", e)))?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| AppError::Internal(format!("cannot write ACL document: {}", e)))?;

        let version = format!("v{}", Utc::now().format("%Y%m%d%H%M%S"));

        let log = acl_logs::ActiveModel {
            user_id: Set(user.id),
            version: Set(version.clone()),
            file_path: Set(path.to_string_lossy().into_owned()),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        log.insert(&self.db).await?;

        self.index.insert(
            user.id,
            AclIndexEntry {
                file_path: path.clone(),
                version: version.clone(),
            },
        );

        info!("🔐 ACL {} written for user {}", version, user.username);
        Ok(document)
    }

    /// Index first, then the newest `acl_logs` row (repopulating the index),
    /// so documents survive a process restart.
    async fn lookup_entry(&self, user_id: i32) -> Result<Option<AclIndexEntry>, AppError> {
        if let Some(entry) = self.index.get(&user_id) {
            return Ok(Some(entry.clone()));
        }

        let newest = AclLogs::find()
            .filter(acl_logs::Column::UserId.eq(user_id))
            .order_by_desc(acl_logs::Column::CreatedAt)
            .one(&self.db)
            .await?;

        Ok(newest.map(|log| {
            let entry = AclIndexEntry {
                file_path: PathBuf::from(&log.file_path),
                version: log.version,
            };
            self.index.insert(user_id, entry.clone());
            entry
        }))
    }

    fn document_path(&self, username: &str) -> PathBuf {
        let safe: String = username
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        Path::new(&self.acl_dir).join(format!("{}.json", safe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_path_sanitizes_username() {
        let svc = AclService::new(
            sea_orm::DatabaseConnection::Disconnected,
            "/tmp/acl",
            Arc::new(DashMap::new()),
        );
        let path = svc.document_path("../../etc/passwd");
        assert_eq!(path, PathBuf::from("/tmp/acl/etcpasswd.json"));
        let path = svc.document_path("alice_01");
        assert_eq!(path, PathBuf::from("/tmp/acl/alice_01.json"));
    }
}
