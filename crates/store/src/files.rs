//! Upload and results directories plus the file metadata map.
//!
//! Inputs land at `<data_dir>/<file_id>.<ext>`; each job writes its
//! artifacts under `<data_dir>/results/<job_id>/`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use slidemill_core::error::CoreError;
use slidemill_core::types::{FileId, JobId, TenantId, Timestamp};

/// Metadata for one uploaded input file.
#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub id: FileId,
    pub tenant_id: TenantId,
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: u64,
    pub uploaded_at: Timestamp,
    #[serde(skip)]
    pub path: PathBuf,
}

/// Tenant-scoped registry of uploaded files.
pub struct FileStore {
    uploads_dir: PathBuf,
    results_dir: PathBuf,
    files: RwLock<HashMap<FileId, Arc<StoredFile>>>,
}

impl FileStore {
    /// Create the store, ensuring both directories exist.
    pub fn new(data_dir: &Path) -> std::io::Result<Self> {
        let uploads_dir = data_dir.to_path_buf();
        let results_dir = data_dir.join("results");
        std::fs::create_dir_all(&uploads_dir)?;
        std::fs::create_dir_all(&results_dir)?;
        Ok(Self {
            uploads_dir,
            results_dir,
            files: RwLock::new(HashMap::new()),
        })
    }

    /// Persist an uploaded blob and register its metadata.
    ///
    /// The on-disk name is the file id plus the original extension, so
    /// arbitrary client filenames never reach the filesystem.
    pub async fn save(
        &self,
        tenant: &str,
        filename: &str,
        content_type: Option<String>,
        bytes: &[u8],
    ) -> Result<Arc<StoredFile>, CoreError> {
        let id = Uuid::new_v4();
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        let path = self.uploads_dir.join(format!("{id}{ext}"));

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| CoreError::Internal(format!("failed to write upload: {e}")))?;

        let stored = Arc::new(StoredFile {
            id,
            tenant_id: tenant.to_string(),
            filename: filename.to_string(),
            content_type,
            bytes: bytes.len() as u64,
            uploaded_at: Utc::now(),
            path,
        });
        self.files.write().await.insert(id, Arc::clone(&stored));
        tracing::info!(file_id = %id, tenant, size = stored.bytes, "File uploaded");
        Ok(stored)
    }

    /// Tenant-scoped metadata lookup.
    pub async fn get(&self, tenant: &str, id: FileId) -> Result<Arc<StoredFile>, CoreError> {
        let files = self.files.read().await;
        let stored = files
            .get(&id)
            .ok_or(CoreError::NotFound { entity: "file", id })?;
        if stored.tenant_id != tenant {
            return Err(CoreError::Forbidden(format!(
                "file {id} belongs to another tenant"
            )));
        }
        Ok(Arc::clone(stored))
    }

    /// Disk path for an already-validated file id (executor use).
    pub async fn disk_path(&self, id: FileId) -> Option<PathBuf> {
        self.files.read().await.get(&id).map(|f| f.path.clone())
    }

    /// The artifact directory for one job. Created on first use by the
    /// executor, not here.
    pub fn job_dir(&self, job_id: JobId) -> PathBuf {
        self.results_dir.join(job_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileStore::new(dir.path()).unwrap();

        let stored = files
            .save("t1", "slide.png", Some("image/png".to_string()), b"pixels")
            .await
            .unwrap();

        let fetched = files.get("t1", stored.id).await.unwrap();
        assert_eq!(fetched.filename, "slide.png");
        assert_eq!(fetched.bytes, 6);
        assert!(fetched.path.ends_with(format!("{}.png", stored.id)));
        assert_eq!(tokio::fs::read(&fetched.path).await.unwrap(), b"pixels");
    }

    #[tokio::test]
    async fn get_is_tenant_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileStore::new(dir.path()).unwrap();
        let stored = files.save("t1", "a.png", None, b"x").await.unwrap();

        let err = files.get("t2", stored.id).await.unwrap_err();
        assert_eq!(err.kind(), "FORBIDDEN");

        let err = files.get("t1", Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn extensionless_uploads_keep_a_bare_id_name() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileStore::new(dir.path()).unwrap();
        let stored = files.save("t1", "blob", None, b"x").await.unwrap();
        assert!(stored.path.ends_with(stored.id.to_string()));
    }

    #[test]
    fn job_dir_is_under_results() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileStore::new(dir.path()).unwrap();
        let job_id = Uuid::new_v4();
        assert_eq!(
            files.job_dir(job_id),
            dir.path().join("results").join(job_id.to_string())
        );
    }
}
