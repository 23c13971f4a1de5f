//! Sync planning: classify scanned files against the registry.
//!
//! The plan is computed purely from the current scan and the fingerprints
//! the registry already holds. Deletion is decided against the union of all
//! scanned directories: any registered identity absent from the scan is
//! scheduled for deletion, regardless of which directory originally
//! produced it. Identities under a path the scan failed to read are kept:
//! an unreadable file is not a deleted one.

use std::collections::{BTreeMap, HashSet};

use crate::models::{Scan, ScanFailure, SourceDocument};

/// The work a refresh has to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// New or modified documents, in scan order.
    pub to_upsert: Vec<SourceDocument>,
    /// Registered identities with no file in the current scan, sorted.
    pub to_delete: Vec<String>,
    /// Identities whose fingerprint matches the registry.
    pub unchanged: Vec<String>,
    /// Registered identities left alone because the scan could not read them.
    pub retained: Vec<String>,
    pub failures: Vec<ScanFailure>,
}

impl SyncPlan {
    /// Number of documents known to be on disk in this scan.
    pub fn scanned(&self) -> usize {
        self.to_upsert.len() + self.unchanged.len() + self.retained.len()
    }

    /// Whether `identity` was seen on disk, readable or not.
    pub fn on_disk(&self, identity: &str) -> bool {
        self.to_upsert.iter().any(|d| d.identity == identity)
            || self.unchanged.iter().any(|id| id == identity)
            || self.failures.iter().any(|f| f.covers(identity))
    }
}

/// Classify `scan` against `registered` (identity → fingerprint).
///
/// Duplicate identities in the scan (a file reached through two overlapping
/// input directories) are considered once.
pub fn compute_plan(scan: Scan, registered: &BTreeMap<String, String>) -> SyncPlan {
    let mut plan = SyncPlan::default();
    let mut seen: HashSet<String> = HashSet::with_capacity(scan.documents.len());

    for doc in scan.documents {
        if !seen.insert(doc.identity.clone()) {
            continue;
        }
        match registered.get(&doc.identity) {
            Some(fingerprint) if *fingerprint == doc.fingerprint => {
                plan.unchanged.push(doc.identity);
            }
            _ => plan.to_upsert.push(doc),
        }
    }

    for identity in registered.keys().filter(|id| !seen.contains(*id)) {
        if scan.failures.iter().any(|f| f.covers(identity)) {
            plan.retained.push(identity.clone());
        } else {
            plan.to_delete.push(identity.clone());
        }
    }
    plan.failures = scan.failures;

    plan
}
