//! Deployment store trait definition.
//!
//! This module defines the common interface for deployment history
//! backends.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;

use super::types::{ElementStatusPatch, HistoryEntry, HistoryStatus, StepStatusPatch};

/// Trait for deployment history backends.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Mints a new deployment operation identifier.
    async fn new_op_id(&self) -> Result<String>;

    /// Mints a new step identifier within an operation.
    async fn new_step_id(&self, op_id: &str) -> Result<String>;

    /// Records a step's overall status.
    async fn status(&self, step_id: &str, patch: StepStatusPatch) -> Result<()>;

    /// Records one element's status within a step.
    async fn element_status(&self, step_id: &str, patch: ElementStatusPatch) -> Result<()>;

    /// Appends a history entry.
    async fn commit_entry(&self, entry: HistoryEntry) -> Result<()>;

    /// Returns the most recent entry, optionally filtered by phase.
    async fn last_entry(&self, filter: Option<HistoryStatus>) -> Result<Option<HistoryEntry>>;

    /// Acquires the deployment data directory for exclusive use,
    /// seeded from the last entry with the given phase if one exists.
    async fn data_dir(&self, seed_from: Option<HistoryStatus>) -> Result<PathBuf>;

    /// Releases the deployment data directory.
    async fn release_data_dir(&self) -> Result<()>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl DeploymentStore for Box<dyn DeploymentStore> {
    async fn new_op_id(&self) -> Result<String> {
        (**self).new_op_id().await
    }

    async fn new_step_id(&self, op_id: &str) -> Result<String> {
        (**self).new_step_id(op_id).await
    }

    async fn status(&self, step_id: &str, patch: StepStatusPatch) -> Result<()> {
        (**self).status(step_id, patch).await
    }

    async fn element_status(&self, step_id: &str, patch: ElementStatusPatch) -> Result<()> {
        (**self).element_status(step_id, patch).await
    }

    async fn commit_entry(&self, entry: HistoryEntry) -> Result<()> {
        (**self).commit_entry(entry).await
    }

    async fn last_entry(&self, filter: Option<HistoryStatus>) -> Result<Option<HistoryEntry>> {
        (**self).last_entry(filter).await
    }

    async fn data_dir(&self, seed_from: Option<HistoryStatus>) -> Result<PathBuf> {
        (**self).data_dir(seed_from).await
    }

    async fn release_data_dir(&self) -> Result<()> {
        (**self).release_data_dir().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
