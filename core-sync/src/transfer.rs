//! # Staging Transfer
//!
//! Moves device collections between the registries and the staging store.
//!
//! Staging layout inside one run's container:
//!
//! | Blob | Content |
//! |---|---|
//! | `external-devices/page-{index:06}.jsonl` | one external record per line |
//! | `devices.txt` | hub export output, one [`DeviceRecord`] per line |
//! | `devices-to-import.txt` | import batch, one [`DeviceRecord`] per line |
//! | `import-results.log` | hub import job output |
//!
//! Page blobs are written with overwrite semantics so a re-executed page
//! effect replaces rather than duplicates its data.

use bridge_traits::device::{DeviceRecord, ExternalDeviceRecord};
use bridge_traits::error::BridgeError;
use bridge_traits::hub::HubRegistry;
use bridge_traits::registry::ExternalRegistry;
use bridge_traits::staging::{BlobReader, StagingStore};
use bridge_traits::time::Clock;
use bytes::Bytes;
use core_runtime::config::{HUB_LISTING_PAGE_SIZE, PAGE_RETRIEVAL_BUDGET};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tracing::{debug, info};

use crate::differ::DeviceDiff;
use crate::error::{Result, SyncError};

pub const EXPORT_BLOB: &str = "devices.txt";
pub const IMPORT_BLOB: &str = "devices-to-import.txt";
pub const IMPORT_RESULTS_BLOB: &str = "import-results.log";

/// Lines per append when writing the import batch
const IMPORT_WRITE_CHUNK: usize = 500;

pub fn page_blob_name(page_index: u32) -> String {
    format!("external-devices/page-{:06}.jsonl", page_index)
}

/// Encode items as line-delimited JSON.
pub fn encode_lines<'a, T, I>(items: I) -> Result<Bytes>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut buffer = Vec::new();
    for item in items {
        serde_json::to_writer(&mut buffer, item)?;
        buffer.push(b'\n');
    }
    Ok(Bytes::from(buffer))
}

/// Stream a line-delimited JSON blob through `visit`.
///
/// Lines that do not start with `{` are skipped (blank lines, job logs).
/// Returns the number of records visited.
pub async fn read_lines<T, F>(
    staging: &dyn StagingStore,
    container: &str,
    blob: &str,
    visit: F,
) -> Result<u64>
where
    T: DeserializeOwned,
    F: FnMut(T) -> Result<()>,
{
    let reader = staging
        .open_blob(container, blob)
        .await
        .map_err(|e| staging_error(blob, e))?;
    visit_lines(reader, blob, visit).await
}

async fn visit_lines<T, F>(reader: BlobReader, blob: &str, mut visit: F) -> Result<u64>
where
    T: DeserializeOwned,
    F: FnMut(T) -> Result<()>,
{
    let mut lines = reader.lines();
    let mut visited = 0;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| SyncError::Staging(format!("Reading {} failed: {}", blob, e)))?
    {
        let line = line.trim();
        if !line.starts_with('{') {
            continue;
        }
        visit(serde_json::from_str(line)?)?;
        visited += 1;
    }

    Ok(visited)
}

/// Read up to `take` records starting at record offset `skip`.
pub async fn read_range<T>(
    staging: &dyn StagingStore,
    container: &str,
    blob: &str,
    skip: usize,
    take: usize,
) -> Result<Vec<T>>
where
    T: DeserializeOwned,
{
    let mut position = 0;
    let mut batch = Vec::with_capacity(take);
    // Lines past the window are still scanned; staging blobs are bounded.
    read_lines(staging, container, blob, |record: T| {
        if position >= skip && batch.len() < take {
            batch.push(record);
        }
        position += 1;
        Ok(())
    })
    .await?;
    Ok(batch)
}

/// Write the import batch, replacing any earlier attempt.
///
/// Returns the number of lines written.
pub async fn write_import_batch(
    staging: &dyn StagingStore,
    container: &str,
    diff: DeviceDiff,
) -> Result<usize> {
    let changes: Vec<DeviceRecord> = diff.into_changes().collect();

    staging
        .put_blob(container, IMPORT_BLOB, Bytes::new())
        .await
        .map_err(|e| staging_error(IMPORT_BLOB, e))?;
    for chunk in changes.chunks(IMPORT_WRITE_CHUNK) {
        staging
            .append_blob(container, IMPORT_BLOB, encode_lines(chunk)?)
            .await
            .map_err(|e| staging_error(IMPORT_BLOB, e))?;
    }

    debug!(container, lines = changes.len(), "Wrote import batch");
    Ok(changes.len())
}

/// Load the hub's device collection by direct listing.
pub async fn list_hub_devices(hub: &dyn HubRegistry) -> Result<Vec<DeviceRecord>> {
    let mut devices = Vec::new();
    let mut continuation = None;

    loop {
        let page = hub
            .list_devices(continuation.take(), HUB_LISTING_PAGE_SIZE)
            .await
            .map_err(SyncError::from)?;
        devices.extend(page.devices);
        match page.continuation {
            Some(token) => continuation = Some(token),
            None => break,
        }
    }

    Ok(devices)
}

pub(crate) fn staging_error(blob: &str, error: BridgeError) -> SyncError {
    match error {
        e if e.is_transient() => SyncError::Transient(format!("{}: {}", blob, e)),
        e => SyncError::Staging(format!("{}: {}", blob, e)),
    }
}

// ============================================================================
// Paged Bulk Transfer
// ============================================================================

/// Result of one bounded page-retrieval invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTransferResult {
    /// Records written by this invocation
    pub items_processed: u64,
    /// Last page index fetched by this invocation
    pub last_page_index: u32,
    pub has_more: bool,
}

/// Cursor carried by the orchestrator across page-retrieval invocations.
///
/// Only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCursor {
    pub next_page: u32,
    pub items_processed: u64,
    /// Highest page index fetched so far
    pub last_page_index: Option<u32>,
}

impl PageCursor {
    pub fn advance(&mut self, result: &PageTransferResult) {
        self.items_processed += result.items_processed;
        self.last_page_index = Some(result.last_page_index);
        self.next_page = result.last_page_index + 1;
    }

    /// Page indexes that may hold staged data
    pub fn fetched_pages(&self) -> Range<u32> {
        0..self.last_page_index.map_or(0, |last| last + 1)
    }
}

/// Copies external registry pages into staging under a wall-clock budget.
#[derive(Clone)]
pub struct PagedBulkTransfer {
    registry: Arc<dyn ExternalRegistry>,
    staging: Arc<dyn StagingStore>,
    clock: Arc<dyn Clock>,
    budget: Duration,
}

impl PagedBulkTransfer {
    pub fn new(
        registry: Arc<dyn ExternalRegistry>,
        staging: Arc<dyn StagingStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            staging,
            clock,
            budget: PAGE_RETRIEVAL_BUDGET,
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Fetch pages from `start_page` until the registry runs dry or the
    /// budget is spent.
    ///
    /// The budget is checked between pages, so a started page always
    /// finishes. Any fetch or write error aborts the invocation.
    pub async fn retrieve(&self, container: &str, start_page: u32) -> Result<PageTransferResult> {
        let started = self.clock.now();
        let mut page_index = start_page;
        let mut items_processed = 0;

        loop {
            let page = self.registry.list_page(page_index).await.map_err(|e| {
                SyncError::PageFetch {
                    page_index,
                    message: e.to_string(),
                }
            })?;

            if page.records.is_empty() {
                return Ok(PageTransferResult {
                    items_processed,
                    last_page_index: page_index,
                    has_more: false,
                });
            }

            let blob = page_blob_name(page_index);
            self.staging
                .put_blob(container, &blob, encode_lines(&page.records)?)
                .await
                .map_err(|e| staging_error(&blob, e))?;
            items_processed += page.records.len() as u64;

            debug!(
                registry = self.registry.name(),
                page_index,
                records = page.records.len(),
                "Staged external page"
            );

            if !page.has_more {
                return Ok(PageTransferResult {
                    items_processed,
                    last_page_index: page_index,
                    has_more: false,
                });
            }

            let elapsed = (self.clock.now() - started).to_std().unwrap_or(Duration::ZERO);
            if elapsed >= self.budget {
                info!(
                    registry = self.registry.name(),
                    page_index,
                    items_processed,
                    "Page retrieval budget spent, yielding"
                );
                return Ok(PageTransferResult {
                    items_processed,
                    last_page_index: page_index,
                    has_more: true,
                });
            }

            page_index += 1;
        }
    }

    /// Feed every staged external record of the fetched pages to `visit`.
    pub async fn for_each_staged<F>(
        &self,
        container: &str,
        pages: Range<u32>,
        mut visit: F,
    ) -> Result<u64>
    where
        F: FnMut(ExternalDeviceRecord) -> Result<()>,
    {
        let mut total = 0;
        for page_index in pages {
            let blob = page_blob_name(page_index);
            let reader = match self.staging.open_blob(container, &blob).await {
                Ok(reader) => reader,
                // Terminal empty pages are never written.
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(staging_error(&blob, e)),
            };
            total += visit_lines(reader, &blob, &mut visit).await?;
        }
        Ok(total)
    }
}
