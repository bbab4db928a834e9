//! Staging Store Implementation on the local filesystem
//!
//! Containers are directories under a root; blob names may contain `/` and
//! map to nested files.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    staging::{AccessPermissions, BlobReader, StagingStore},
};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufReader};
use tracing::debug;

/// Tokio-based staging store
///
/// Access URIs use the `file://` scheme with the permission flags and expiry
/// as query parameters. They are only meaningful to hub implementations
/// running on the same host.
#[derive(Debug, Clone)]
pub struct LocalStagingStore {
    root: PathBuf,
}

impl LocalStagingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_path(&self, container: &str) -> Result<PathBuf> {
        Ok(self.root.join(checked_relative(container)?))
    }

    fn blob_path(&self, container: &str, blob: &str) -> Result<PathBuf> {
        Ok(self.container_path(container)?.join(checked_relative(blob)?))
    }

    /// Path of `blob`, with its parent directories created.
    async fn writable_blob_path(&self, container: &str, blob: &str) -> Result<PathBuf> {
        let container_path = self.container_path(container)?;
        if !fs::try_exists(&container_path).await? {
            return Err(BridgeError::NotFound(format!("container {}", container)));
        }

        let path = self.blob_path(container, blob)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(path)
    }
}

/// Reject names that would escape the staging root.
fn checked_relative(name: &str) -> Result<&Path> {
    let path = Path::new(name);
    let is_plain = !name.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if is_plain {
        Ok(path)
    } else {
        Err(BridgeError::Permanent(format!("Invalid staging name: {:?}", name)))
    }
}

#[async_trait]
impl StagingStore for LocalStagingStore {
    async fn create_container(&self, container: &str) -> Result<()> {
        let path = self.container_path(container)?;
        fs::create_dir_all(&path).await?;
        debug!(path = ?path, "Created staging container");
        Ok(())
    }

    async fn put_blob(&self, container: &str, blob: &str, data: Bytes) -> Result<()> {
        let path = self.writable_blob_path(container, blob).await?;
        fs::write(&path, &data).await?;
        debug!(path = ?path, bytes = data.len(), "Wrote blob");
        Ok(())
    }

    async fn append_blob(&self, container: &str, blob: &str, data: Bytes) -> Result<()> {
        let path = self.writable_blob_path(container, blob).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn open_blob(&self, container: &str, blob: &str) -> Result<BlobReader> {
        let path = self.blob_path(container, blob)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BridgeError::NotFound(format!("{}/{}", container, blob)))
            }
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    async fn generate_access_uri(
        &self,
        container: &str,
        permissions: AccessPermissions,
        expires_at: DateTime<Utc>,
    ) -> Result<String> {
        let path = self.container_path(container)?;
        Ok(format!(
            "file://{}?sp={}&se={}",
            path.display(),
            permissions.as_flags(),
            expires_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ))
    }

    async fn delete_container(&self, container: &str) -> Result<()> {
        let path = self.container_path(container)?;
        match fs::remove_dir_all(&path).await {
            Ok(()) => {
                debug!(path = ?path, "Deleted staging container");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::io::AsyncBufReadExt;

    fn store() -> LocalStagingStore {
        let root = std::env::temp_dir().join(format!("staging-test-{}", uuid::Uuid::new_v4()));
        LocalStagingStore::new(root)
    }

    async fn read_lines(store: &LocalStagingStore, container: &str, blob: &str) -> Vec<String> {
        let mut lines = store.open_blob(container, blob).await.unwrap().lines();
        let mut out = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            out.push(line);
        }
        out
    }

    #[tokio::test]
    async fn test_put_overwrites_and_append_extends() {
        let store = store();
        store.create_container("run-1").await.unwrap();

        store
            .put_blob("run-1", "external-devices/page-000000.jsonl", Bytes::from("{\"a\":1}\n"))
            .await
            .unwrap();
        store
            .put_blob("run-1", "external-devices/page-000000.jsonl", Bytes::from("{\"b\":2}\n"))
            .await
            .unwrap();
        store
            .append_blob("run-1", "devices-to-import.txt", Bytes::from("one\n"))
            .await
            .unwrap();
        store
            .append_blob("run-1", "devices-to-import.txt", Bytes::from("two\n"))
            .await
            .unwrap();

        assert_eq!(
            read_lines(&store, "run-1", "external-devices/page-000000.jsonl").await,
            vec!["{\"b\":2}"]
        );
        assert_eq!(
            read_lines(&store, "run-1", "devices-to-import.txt").await,
            vec!["one", "two"]
        );

        store.delete_container("run-1").await.unwrap();
        assert!(!store.root().join("run-1").exists());
    }

    #[tokio::test]
    async fn test_missing_blob_and_container() {
        let store = store();

        assert!(store
            .open_blob("run-1", "devices.txt")
            .await
            .err()
            .is_some_and(|e| e.is_not_found()));
        assert!(store
            .put_blob("run-1", "devices.txt", Bytes::new())
            .await
            .unwrap_err()
            .is_not_found());
        // Deleting twice is fine.
        store.delete_container("run-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_escaping_names() {
        let store = store();
        store.create_container("run-1").await.unwrap();

        for name in ["../outside", "/etc/passwd", ""] {
            let result = store.put_blob("run-1", name, Bytes::new()).await;
            assert!(matches!(result, Err(BridgeError::Permanent(_))), "{}", name);
        }
        store.delete_container("run-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_access_uri_carries_permissions_and_expiry() {
        let store = LocalStagingStore::new("/var/lib/staging");
        let expires_at = Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap();

        let uri = store
            .generate_access_uri("run-1", AccessPermissions::READ_WRITE_DELETE, expires_at)
            .await
            .unwrap();

        assert_eq!(uri, "file:///var/lib/staging/run-1?sp=rwd&se=2024-05-02T08:00:00Z");
    }
}
