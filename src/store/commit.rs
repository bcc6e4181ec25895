//! Commit-ordering enforcement over a deployment store.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{Result, StoreError};

use super::store::DeploymentStore;
use super::types::HistoryEntry;

/// Enforces the history commit-ordering invariant over a store.
///
/// The same terminal phase may not be committed twice in a row — that
/// is an engine bug, not a user error. Re-committing an unchanged
/// non-terminal entry is an idempotent no-op.
pub struct CommitGuard {
    store: Arc<dyn DeploymentStore>,
    last: Mutex<Option<HistoryEntry>>,
}

impl CommitGuard {
    /// Wraps a store.
    #[must_use]
    pub fn new(store: Arc<dyn DeploymentStore>) -> Self {
        Self {
            store,
            last: Mutex::new(None),
        }
    }

    /// Returns the wrapped store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DeploymentStore> {
        &self.store
    }

    /// Commits an entry, enforcing the ordering invariant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RepeatedTerminalCommit`] if the previous
    /// commit carried the same terminal phase, or the store's error.
    pub async fn commit(&self, entry: HistoryEntry) -> Result<()> {
        {
            let last = self
                .last
                .lock()
                .map_err(|_| StoreError::serialization("commit guard mutex poisoned"))?;
            if let Some(previous) = last.as_ref() {
                if entry.status.is_terminal() && previous.status == entry.status {
                    return Err(StoreError::RepeatedTerminalCommit {
                        status: entry.status.to_string(),
                    }
                    .into());
                }
                if !entry.status.is_terminal() && previous.same_content(&entry) {
                    debug!(status = %entry.status, "Skipping unchanged history commit");
                    return Ok(());
                }
            }
        }

        self.store.commit_entry(entry.clone()).await?;
        if let Ok(mut last) = self.last.lock() {
            *last = Some(entry);
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommitGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitGuard")
            .field("backend", &self.store.backend_type())
            .finish_non_exhaustive()
    }
}
