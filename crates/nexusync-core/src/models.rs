//! Data models that flow through scanning, indexing, and retrieval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file observed during a scan of the configured input directories.
///
/// `identity` is the normalized absolute path and is the key used by the
/// registry and the vector store. `fingerprint` is a content hash of the
/// raw bytes, so touching a file without editing it changes nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub identity: String,
    pub file_path: String,
    pub fingerprint: String,
}

/// A path the scan could not read. Everything at or below `path` is of
/// unknown state for this scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFailure {
    /// Normalized like an identity.
    pub path: String,
    pub reason: String,
}

impl ScanFailure {
    /// Whether `identity` lies at or below the unreadable path.
    pub fn covers(&self, identity: &str) -> bool {
        let prefix = self.path.trim_end_matches('/');
        identity == self.path
            || identity
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// One pass over the input directories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan {
    /// Readable files, sorted by identity.
    pub documents: Vec<SourceDocument>,
    pub failures: Vec<ScanFailure>,
}

/// A document whose text has been extracted and is ready to be chunked.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub source: SourceDocument,
    pub text: String,
}

/// A chunk of a document's text. Stored in the vector store as a node.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub identity: String,
    pub file_path: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// Registry record for one indexed identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub file_path: String,
    pub fingerprint: String,
    /// Node ids in chunk order.
    pub node_ids: Vec<String>,
    pub indexed_at: DateTime<Utc>,
}

/// A node returned by a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredNode {
    pub node_id: String,
    pub identity: String,
    pub file_path: String,
    pub chunk_index: i64,
    pub text: String,
    pub score: f32,
}
