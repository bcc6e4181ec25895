//! In-memory deployment store.
//!
//! Reference implementation used by tests and single-process runs.
//! Everything lives in process memory except the data directory, which
//! is created under the system temp dir and removed on release.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, StoreError};

use super::store::DeploymentStore;
use super::types::{ElementStatusPatch, HistoryEntry, HistoryStatus, StepStatusPatch};

#[derive(Default)]
struct Inner {
    entries: Vec<HistoryEntry>,
    status_patches: Vec<(String, StepStatusPatch)>,
    element_patches: Vec<(String, ElementStatusPatch)>,
    data_dir: Option<PathBuf>,
}

/// In-memory deployment store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every committed history entry, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.inner
            .lock()
            .map(|inner| inner.entries.clone())
            .unwrap_or_default()
    }

    /// Returns every recorded step-status patch.
    #[must_use]
    pub fn status_patches(&self) -> Vec<(String, StepStatusPatch)> {
        self.inner
            .lock()
            .map(|inner| inner.status_patches.clone())
            .unwrap_or_default()
    }

    /// Returns every recorded element-status patch.
    #[must_use]
    pub fn element_patches(&self) -> Vec<(String, ElementStatusPatch)> {
        self.inner
            .lock()
            .map(|inner| inner.element_patches.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::serialization("store mutex poisoned").into())
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn new_op_id(&self) -> Result<String> {
        Ok(format!("op-{}", Uuid::new_v4()))
    }

    async fn new_step_id(&self, op_id: &str) -> Result<String> {
        Ok(format!("{op_id}/step-{}", Uuid::new_v4()))
    }

    async fn status(&self, step_id: &str, patch: StepStatusPatch) -> Result<()> {
        debug!(step_id, status = %patch.status, "Step status recorded");
        self.lock()?
            .status_patches
            .push((step_id.to_string(), patch));
        Ok(())
    }

    async fn element_status(&self, step_id: &str, patch: ElementStatusPatch) -> Result<()> {
        debug!(step_id, element = %patch.element_id, status = %patch.status, "Element status recorded");
        self.lock()?
            .element_patches
            .push((step_id.to_string(), patch));
        Ok(())
    }

    async fn commit_entry(&self, entry: HistoryEntry) -> Result<()> {
        debug!(status = %entry.status, "History entry committed");
        self.lock()?.entries.push(entry);
        Ok(())
    }

    async fn last_entry(&self, filter: Option<HistoryStatus>) -> Result<Option<HistoryEntry>> {
        let inner = self.lock()?;
        Ok(inner
            .entries
            .iter()
            .rev()
            .find(|entry| filter.is_none_or(|status| entry.status == status))
            .cloned())
    }

    async fn data_dir(&self, _seed_from: Option<HistoryStatus>) -> Result<PathBuf> {
        let mut inner = self.lock()?;
        if let Some(dir) = &inner.data_dir {
            return Ok(dir.clone());
        }
        let dir = std::env::temp_dir().join(format!("cambium-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::DataDirUnavailable {
            message: e.to_string(),
        })?;
        inner.data_dir = Some(dir.clone());
        Ok(dir)
    }

    async fn release_data_dir(&self) -> Result<()> {
        let dir = self.lock()?.data_dir.take();
        if let Some(dir) = dir {
            // Best effort; a vanished directory is not an error.
            let _ = std::fs::remove_dir_all(&dir);
            debug!(?dir, "Released deployment data directory");
        }
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries().len())
            .finish()
    }
}
