//! Persisted document registry.
//!
//! The registry is a JSON file (`registry.json`) in the persist directory
//! mapping each identity to its fingerprint and node ids, plus the
//! embedding model the index was built with. It is rewritten atomically
//! (write to a temp file, fsync, rename) on every mutation.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nexusync_core::models::RegistryEntry;
use serde::{Deserialize, Serialize};

use crate::error::{NexusError, Result};

pub const REGISTRY_FILE: &str = "registry.json";
pub const REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub version: u32,
    pub embedding_model: String,
    pub embedding_dims: usize,
    /// The embedding model the configuration named when a rebuild overrode
    /// it. While the configuration still names this model, the index keeps
    /// its own `embedding_model`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configured_model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub documents: BTreeMap<String, RegistryEntry>,
}

/// Result of reading a registry file.
#[derive(Debug)]
pub enum RegistryRead {
    Found(Registry),
    Missing,
    Invalid(String),
}

impl Registry {
    pub fn new(embedding_model: &str, embedding_dims: usize) -> Self {
        let now = Utc::now();
        Self {
            version: REGISTRY_VERSION,
            embedding_model: embedding_model.to_string(),
            embedding_dims,
            configured_model: None,
            created_at: now,
            updated_at: now,
            documents: BTreeMap::new(),
        }
    }

    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(REGISTRY_FILE)
    }

    /// identity → fingerprint, for change detection.
    pub fn fingerprints(&self) -> BTreeMap<String, String> {
        self.documents
            .iter()
            .map(|(id, entry)| (id.clone(), entry.fingerprint.clone()))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.documents.values().map(|e| e.node_ids.len()).sum()
    }

    pub fn read(dir: &Path) -> RegistryRead {
        let path = Self::path_in(dir);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return RegistryRead::Missing,
            Err(e) => return RegistryRead::Invalid(format!("{}: {}", path.display(), e)),
        };
        match serde_json::from_str::<Registry>(&content) {
            Ok(reg) if reg.version == REGISTRY_VERSION => RegistryRead::Found(reg),
            Ok(reg) => RegistryRead::Invalid(format!(
                "unsupported registry version {} (expected {})",
                reg.version, REGISTRY_VERSION
            )),
            Err(e) => RegistryRead::Invalid(format!("{}: {}", path.display(), e)),
        }
    }

    /// Atomically write the registry into `dir`.
    pub fn save(&mut self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .map_err(|e| NexusError::persistence(format!("{}: {}", dir.display(), e)))?;
        self.updated_at = Utc::now();

        let json = serde_json::to_vec_pretty(self)?;
        let target = Self::path_in(dir);
        let tmp = dir.join(format!("{}.tmp", REGISTRY_FILE));
        let write = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
            std::fs::rename(&tmp, &target)
        };
        write().map_err(|e| NexusError::persistence(format!("{}: {}", target.display(), e)))
    }
}
