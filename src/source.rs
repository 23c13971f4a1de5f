//! Filesystem document source.
//!
//! Walks the configured input directories, applies include/exclude globs,
//! and yields one [`SourceDocument`] per file with a stable identity (the
//! canonical absolute path) and a SHA-256 fingerprint of the raw bytes.
//! Hidden files and directories (leading `.`) are skipped, as are the
//! usual VCS and build directories. Entries that cannot be read are
//! reported as [`ScanFailure`]s rather than silently dropped, so the sync
//! planner does not mistake them for deletions.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use nexusync_core::models::{LoadedDocument, Scan, ScanFailure, SourceDocument};
use sha2::{Digest, Sha256};
use walkdir::{DirEntry, WalkDir};

use crate::config::{IndexConfig, InputDir};
use crate::error::{NexusError, Result};
use crate::extract::extract_text;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Scans input directories into source documents.
pub struct DocumentSource {
    dirs: Vec<InputDir>,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl DocumentSource {
    pub fn new(index: &IndexConfig) -> Result<Self> {
        Self::with_dirs(index, index.input_dirs.clone())
    }

    /// Like [`DocumentSource::new`] but scanning `dirs` instead of the configured ones.
    pub fn with_dirs(index: &IndexConfig, dirs: Vec<InputDir>) -> Result<Self> {
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(index.exclude_globs.iter().cloned());
        Ok(Self {
            dirs,
            include: build_globset(&index.include_globs)?,
            exclude: build_globset(&excludes)?,
            follow_symlinks: index.follow_symlinks,
        })
    }

    /// Fail with a configuration error if any input directory is missing.
    pub fn check_dirs(&self) -> Result<()> {
        for dir in &self.dirs {
            let path = dir.path();
            if !path.is_dir() {
                return Err(NexusError::config(format!(
                    "input directory does not exist or is not a directory: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// Scan every input directory, returning documents sorted by identity.
    ///
    /// Files reachable from several overlapping directories appear once.
    pub fn scan(&self) -> Result<Scan> {
        self.check_dirs()?;

        let mut scan = Scan::default();
        for dir in &self.dirs {
            self.scan_dir(dir, &mut scan);
        }

        scan.documents.sort_by(|a, b| a.identity.cmp(&b.identity));
        scan.documents.dedup_by(|a, b| a.identity == b.identity);
        Ok(scan)
    }

    fn scan_dir(&self, dir: &InputDir, scan: &mut Scan) {
        let root = dir.path();
        let mut walker = WalkDir::new(root).follow_links(self.follow_symlinks);
        if !dir.recursive() {
            walker = walker.max_depth(1);
        }

        for entry in walker.into_iter().filter_entry(|e| e.depth() == 0 || !is_hidden(e)) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(root);
                    tracing::warn!("cannot read {}: {}", path.display(), e);
                    scan.failures.push(scan_failure(path, e.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");
            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }

            match fingerprint_file(path) {
                Ok(doc) => scan.documents.push(doc),
                Err(e) => {
                    tracing::warn!("cannot read {}: {}", path.display(), e);
                    scan.failures.push(scan_failure(path, e.to_string()));
                }
            }
        }
    }
}

fn scan_failure(path: &Path, reason: String) -> ScanFailure {
    ScanFailure {
        path: identity_for(path).unwrap_or_else(|_| path.to_string_lossy().replace('\\', "/")),
        reason,
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Normalized identity for `path`: canonical, absolute, `/`-separated.
pub fn identity_for(path: &Path) -> Result<String> {
    let canonical: PathBuf = std::fs::canonicalize(path)?;
    Ok(canonical.to_string_lossy().replace('\\', "/"))
}

/// Hex SHA-256 of `bytes`.
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn fingerprint_file(path: &Path) -> Result<SourceDocument> {
    let bytes = std::fs::read(path)?;
    let identity = identity_for(path)?;
    Ok(SourceDocument {
        file_path: identity.clone(),
        identity,
        fingerprint: fingerprint(&bytes),
    })
}

/// Read and extract the text of `doc`.
///
/// The fingerprint is recomputed from the bytes actually read, so a file
/// edited between scan and load is indexed with the content it was indexed
/// from.
pub fn load_document(doc: &SourceDocument) -> Result<LoadedDocument> {
    let path = Path::new(&doc.identity);
    let bytes = std::fs::read(path)?;
    let text = extract_text(path, &bytes)
        .map_err(|e| NexusError::generation(format!("{}: {}", doc.file_path, e)))?;
    let mut source = doc.clone();
    source.fingerprint = fingerprint(&bytes);
    Ok(LoadedDocument { source, text })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| NexusError::config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| NexusError::config(format!("invalid glob set: {}", e)))
}
