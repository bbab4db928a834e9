//! Staging Store Capability
//!
//! Intermediate object store used to shuttle device pages between the
//! pagination and bulk-job steps. One container per reconciliation run.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncBufRead;

use crate::error::Result;

/// Permissions granted by an access URI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPermissions {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

impl AccessPermissions {
    pub const READ_WRITE_DELETE: Self = Self {
        read: true,
        write: true,
        delete: true,
    };

    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
        delete: false,
    };

    /// Compact form, e.g. `rwd`
    pub fn as_flags(&self) -> String {
        let mut flags = String::with_capacity(3);
        if self.read {
            flags.push('r');
        }
        if self.write {
            flags.push('w');
        }
        if self.delete {
            flags.push('d');
        }
        flags
    }
}

/// Line-oriented reader over a blob
pub type BlobReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// Staging store trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::staging::StagingStore;
/// use tokio::io::AsyncBufReadExt;
///
/// async fn count_lines(store: &dyn StagingStore) -> Result<usize> {
///     let mut lines = store.open_blob("run-1", "devices.txt").await?.lines();
///     let mut count = 0;
///     while lines.next_line().await?.is_some() {
///         count += 1;
///     }
///     Ok(count)
/// }
/// ```
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Create `container` unless it already exists
    async fn create_container(&self, container: &str) -> Result<()>;

    /// Write `data` to a blob, replacing previous content
    async fn put_blob(&self, container: &str, blob: &str, data: Bytes) -> Result<()>;

    /// Append `data` to a blob, creating it when missing
    async fn append_blob(&self, container: &str, blob: &str, data: Bytes) -> Result<()>;

    /// Open a blob for sequential reading.
    ///
    /// Returns [`BridgeError::NotFound`](crate::error::BridgeError::NotFound)
    /// when the blob does not exist.
    async fn open_blob(&self, container: &str, blob: &str) -> Result<BlobReader>;

    /// Time-boxed URI granting `permissions` on the container
    async fn generate_access_uri(
        &self,
        container: &str,
        permissions: AccessPermissions,
        expires_at: DateTime<Utc>,
    ) -> Result<String>;

    /// Delete `container` and every blob in it; missing containers are fine
    async fn delete_container(&self, container: &str) -> Result<()>;
}
