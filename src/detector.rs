//! Change detection between the filesystem and the index registry.

use std::collections::BTreeMap;

use nexusync_core::plan::{compute_plan, SyncPlan};

use crate::config::{IndexConfig, InputDir};
use crate::error::Result;
use crate::source::DocumentSource;

/// Classifies scanned files as new/modified, unchanged, or deleted.
pub struct ChangeDetector {
    source: DocumentSource,
}

impl ChangeDetector {
    pub fn new(index: &IndexConfig, dirs: &[InputDir]) -> Result<Self> {
        Ok(Self {
            source: DocumentSource::with_dirs(index, dirs.to_vec())?,
        })
    }

    /// Fail with a configuration error if any input directory is missing.
    pub fn check_dirs(&self) -> Result<()> {
        self.source.check_dirs()
    }

    /// Scan the input directories and plan against `registered`
    /// (identity → fingerprint).
    ///
    /// Deletion considers the union of the configured directories, so a
    /// document indexed from a directory that was since dropped from the
    /// configuration is scheduled for deletion, while documents under a path
    /// that could not be read are retained. A missing directory is a
    /// configuration error raised before anything else happens.
    pub fn compute_plan(&self, registered: &BTreeMap<String, String>) -> Result<SyncPlan> {
        let scanned = self.source.scan()?;
        let plan = compute_plan(scanned, registered);
        tracing::debug!(
            to_upsert = plan.to_upsert.len(),
            to_delete = plan.to_delete.len(),
            unchanged = plan.unchanged.len(),
            retained = plan.retained.len(),
            "computed sync plan"
        );
        Ok(plan)
    }
}
