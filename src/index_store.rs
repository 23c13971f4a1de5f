//! The persisted index: registry plus vector store.
//!
//! An [`IndexStore`] owns one registry file and one SQLite vector database.
//! Both are keyed by document identity. Every mutating call rewrites the
//! registry before returning. The vector store commits per identity, so a
//! crash can leave the two out of step by at most the identity being
//! written; [`IndexStore::drift`] reports such drift and the next refresh
//! repairs it.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use nexusync_core::chunk::{chunk_document, ChunkParams};
use nexusync_core::embedding::Embedder;
use nexusync_core::models::{RegistryEntry, ScoredNode, SourceDocument};
use nexusync_core::store::VectorStore;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::{NexusError, Result};
use crate::registry::{Registry, RegistryRead};
use crate::source::load_document;
use crate::vector_store::SqliteVectorStore;

/// Where an index lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLocation {
    pub persist_dir: PathBuf,
    pub vector_db_path: PathBuf,
}

impl IndexLocation {
    pub fn from_config(config: &Config) -> Self {
        Self {
            persist_dir: config.index.persist_dir.clone(),
            vector_db_path: config.vector_db_path(),
        }
    }

    /// Remove both halves of the index, including SQLite WAL side files.
    pub fn remove(&self) -> Result<()> {
        remove_if_exists(&Registry::path_in(&self.persist_dir))?;
        for suffix in ["", "-wal", "-shm"] {
            let mut path = self.vector_db_path.clone().into_os_string();
            path.push(suffix);
            remove_if_exists(Path::new(&path))?;
        }
        Ok(())
    }

    /// Move whatever exists of the index at `self` to `target`.
    pub fn move_to(&self, target: &IndexLocation) -> Result<()> {
        std::fs::create_dir_all(&target.persist_dir)?;
        if let Some(parent) = target.vector_db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let registry = Registry::path_in(&self.persist_dir);
        if registry.exists() {
            std::fs::rename(&registry, Registry::path_in(&target.persist_dir))
                .map_err(|e| NexusError::persistence(format!("moving registry: {}", e)))?;
        }
        for suffix in ["", "-wal", "-shm"] {
            let mut from = self.vector_db_path.clone().into_os_string();
            from.push(suffix);
            let mut to = target.vector_db_path.clone().into_os_string();
            to.push(suffix);
            if Path::new(&from).exists() {
                std::fs::rename(&from, &to)
                    .map_err(|e| NexusError::persistence(format!("moving vector store: {}", e)))?;
            }
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(NexusError::persistence(format!("{}: {}", path.display(), e))),
    }
}

/// Outcome of [`IndexStore::load_or_create`].
pub enum LoadOutcome {
    /// A complete, consistent index was found.
    Loaded(IndexStore),
    /// Nothing persisted yet; the returned store is empty and must be built.
    Absent(IndexStore),
    /// Something is on disk but cannot be trusted.
    Corrupt { reason: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpsertOutcome {
    /// Identities whose nodes were replaced.
    pub updated: Vec<String>,
    /// Identities skipped, with the reason.
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteOutcome {
    pub removed: Vec<String>,
    /// Identities whose vector-store transaction failed; their registry
    /// entries are kept.
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    /// Indexed identities.
    pub document_count: usize,
    /// Chunks across all identities, per the registry.
    pub node_count: usize,
    /// Nodes actually present in the vector store.
    pub vector_node_count: u64,
    pub persist_location: PathBuf,
    pub vector_store_location: PathBuf,
    pub embedding_model: String,
    pub embedding_dims: usize,
}

/// Identities present in only one half of the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Drift {
    /// In the registry but with no nodes in the vector store.
    pub missing_vectors: Vec<String>,
    /// Nodes in the vector store with no registry entry.
    pub orphaned_vectors: Vec<String>,
}

pub struct IndexStore {
    location: IndexLocation,
    registry: RwLock<Registry>,
    vectors: SqliteVectorStore,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkParams,
}

impl IndexStore {
    /// Open the index at `location`, classifying what is on disk.
    ///
    /// Returns a configuration error when the persisted index was built
    /// with a different embedding model than `embedder`; only a rebuild may
    /// change the embedding model.
    pub async fn load_or_create(
        location: IndexLocation,
        embedder: Arc<dyn Embedder>,
        chunking: ChunkParams,
    ) -> Result<LoadOutcome> {
        let registry = Registry::read(&location.persist_dir);
        let db_exists = location.vector_db_path.exists();

        let registry = match (registry, db_exists) {
            (RegistryRead::Invalid(reason), _) => return Ok(LoadOutcome::Corrupt { reason }),
            (RegistryRead::Found(_), false) => {
                return Ok(LoadOutcome::Corrupt {
                    reason: format!(
                        "registry found but vector store {} is missing",
                        location.vector_db_path.display()
                    ),
                })
            }
            (RegistryRead::Found(reg), true) => Some(reg),
            (RegistryRead::Missing, _) => None,
        };

        let vectors = SqliteVectorStore::open(&location.vector_db_path)
            .await
            .map_err(NexusError::persistence)?;

        let Some(registry) = registry else {
            let nodes = vectors.node_count().await.map_err(NexusError::persistence)?;
            if nodes > 0 {
                vectors.close().await;
                return Ok(LoadOutcome::Corrupt {
                    reason: format!(
                        "vector store holds {} nodes but the registry in {} is missing",
                        nodes,
                        location.persist_dir.display()
                    ),
                });
            }
            let registry = Registry::new(embedder.model_name(), embedder.dims());
            return Ok(LoadOutcome::Absent(Self::assemble(location, registry, vectors, embedder, chunking)));
        };

        if registry.embedding_model != embedder.model_name() {
            vectors.close().await;
            return Err(NexusError::config(format!(
                "index was built with embedding model '{}' but '{}' is configured; run `nexusync rebuild` to switch models",
                registry.embedding_model,
                embedder.model_name()
            )));
        }

        tracing::info!(
            documents = registry.documents.len(),
            nodes = registry.node_count(),
            "loaded index from {}",
            location.persist_dir.display()
        );
        Ok(LoadOutcome::Loaded(Self::assemble(location, registry, vectors, embedder, chunking)))
    }

    fn assemble(
        location: IndexLocation,
        registry: Registry,
        vectors: SqliteVectorStore,
        embedder: Arc<dyn Embedder>,
        chunking: ChunkParams,
    ) -> Self {
        Self {
            location,
            registry: RwLock::new(registry),
            vectors,
            embedder,
            chunking,
        }
    }

    /// Open this store's files again after [`IndexStore::close`].
    pub async fn reopen(&self) -> Result<IndexStore> {
        match Self::load_or_create(self.location.clone(), self.embedder.clone(), self.chunking).await? {
            LoadOutcome::Loaded(index) => Ok(index),
            LoadOutcome::Absent(index) => {
                index.close().await;
                Err(NexusError::persistence(format!(
                    "index at {} vanished",
                    self.location.persist_dir.display()
                )))
            }
            LoadOutcome::Corrupt { reason } => Err(NexusError::persistence(reason)),
        }
    }

    /// Record that this index overrides `model`, the configured embedding
    /// model. Saved with the next registry write.
    pub async fn set_configured_model(&self, model: Option<String>) {
        self.registry.write().await.configured_model = model;
    }

    /// Embed and insert every document. Fails with `EmptyCorpus` when
    /// `documents` is empty.
    pub async fn build_from_scratch(&self, documents: &[SourceDocument]) -> Result<UpsertOutcome> {
        if documents.is_empty() {
            return Err(NexusError::EmptyCorpus);
        }
        tracing::info!(documents = documents.len(), "building index");
        let outcome = self.upsert(documents).await?;
        // Persist even when every document failed, so the index is no longer Absent.
        self.registry.write().await.save(&self.location.persist_dir)?;
        Ok(outcome)
    }

    /// Replace the nodes of each document whose fingerprint differs from
    /// the registry. Documents that fail to load or embed are skipped and
    /// reported; a vector store failure aborts the call.
    pub async fn upsert(&self, documents: &[SourceDocument]) -> Result<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();
        let mut result = Ok(());

        for doc in documents {
            let current = self
                .registry
                .read()
                .await
                .documents
                .get(&doc.identity)
                .map(|e| e.fingerprint.clone());
            if current.as_deref() == Some(doc.fingerprint.as_str()) {
                continue;
            }

            match self.index_document(doc).await {
                Ok(()) => outcome.updated.push(doc.identity.clone()),
                Err(NexusError::Persistence(msg)) => {
                    result = Err(NexusError::Persistence(msg));
                    break;
                }
                Err(e) => {
                    tracing::warn!("skipping {}: {}", doc.file_path, e);
                    outcome.failed.push((doc.identity.clone(), e.to_string()));
                }
            }
        }

        if !outcome.updated.is_empty() {
            self.registry.write().await.save(&self.location.persist_dir)?;
        }
        result.map(|()| outcome)
    }

    async fn index_document(&self, doc: &SourceDocument) -> Result<()> {
        let loaded = load_document(doc)?;
        let chunks = chunk_document(&doc.identity, &doc.file_path, &loaded.text, self.chunking);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(NexusError::generation)?;
        if vectors.len() != chunks.len() {
            return Err(NexusError::generation(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                vectors.len()
            )));
        }
        self.check_dims(&vectors).await?;

        self.vectors
            .replace_nodes(&doc.identity, &chunks, &vectors)
            .await
            .map_err(NexusError::persistence)?;

        let entry = RegistryEntry {
            file_path: doc.file_path.clone(),
            fingerprint: loaded.source.fingerprint,
            node_ids: chunks.into_iter().map(|c| c.id).collect(),
            indexed_at: Utc::now(),
        };
        self.registry
            .write()
            .await
            .documents
            .insert(doc.identity.clone(), entry);
        tracing::debug!(identity = %doc.identity, "indexed");
        Ok(())
    }

    /// Record the dimensionality on first use; reject vectors that disagree.
    async fn check_dims(&self, vectors: &[Vec<f32>]) -> Result<()> {
        let Some(first) = vectors.first() else {
            return Ok(());
        };
        let mut registry = self.registry.write().await;
        if registry.embedding_dims == 0 {
            registry.embedding_dims = first.len();
        }
        let expected = registry.embedding_dims;
        match vectors.iter().find(|v| v.len() != expected) {
            Some(bad) => Err(NexusError::generation(format!(
                "embedding has {} dimensions, index expects {}",
                bad.len(),
                expected
            ))),
            None => Ok(()),
        }
    }

    /// Remove each identity's nodes and registry entry.
    ///
    /// Each identity is removed from the vector store in one statement and
    /// dropped from the registry only after that succeeds. Identities not
    /// in the registry are still purged from the vector store.
    pub async fn delete(&self, identities: &[String]) -> Result<DeleteOutcome> {
        let mut outcome = DeleteOutcome::default();

        for identity in identities {
            match self.vectors.delete_identity(identity).await {
                Ok(nodes) => {
                    self.registry.write().await.documents.remove(identity);
                    tracing::debug!(identity = %identity, nodes, "deleted");
                    outcome.removed.push(identity.clone());
                }
                Err(e) => {
                    tracing::warn!("failed to delete {}: {}", identity, e);
                    outcome.failed.push((identity.clone(), e.to_string()));
                }
            }
        }

        if !outcome.removed.is_empty() {
            self.registry.write().await.save(&self.location.persist_dir)?;
        }
        Ok(outcome)
    }

    /// The `top_k` nodes most similar to `query`.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredNode>> {
        let query_vec = self
            .embedder
            .embed_query(query)
            .await
            .map_err(NexusError::generation)?;
        self.vectors
            .search(&query_vec, top_k)
            .await
            .map_err(NexusError::persistence)
    }

    /// identity → fingerprint snapshot for change detection.
    pub async fn fingerprints(&self) -> std::collections::BTreeMap<String, String> {
        self.registry.read().await.fingerprints()
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let vector_node_count = self
            .vectors
            .node_count()
            .await
            .map_err(NexusError::persistence)?;
        let registry = self.registry.read().await;
        Ok(IndexStats {
            document_count: registry.documents.len(),
            node_count: registry.node_count(),
            vector_node_count,
            persist_location: self.location.persist_dir.clone(),
            vector_store_location: self.location.vector_db_path.clone(),
            embedding_model: registry.embedding_model.clone(),
            embedding_dims: registry.embedding_dims,
        })
    }

    /// Compare registry identities with those present in the vector store.
    pub async fn drift(&self) -> Result<Drift> {
        let in_vectors: BTreeSet<String> = self
            .vectors
            .identities()
            .await
            .map_err(NexusError::persistence)?
            .into_iter()
            .collect();
        let registry = self.registry.read().await;
        let in_registry: BTreeSet<&String> = registry.documents.keys().collect();

        Ok(Drift {
            missing_vectors: in_registry
                .iter()
                .filter(|id| !in_vectors.contains(id.as_str()))
                .map(|id| id.to_string())
                .collect(),
            orphaned_vectors: in_vectors
                .iter()
                .filter(|id| !in_registry.contains(id))
                .cloned()
                .collect(),
        })
    }

    /// Forget the registry entries of `identities` without touching the
    /// vector store, so the next upsert re-indexes them.
    pub async fn invalidate(&self, identities: &[String]) -> Result<()> {
        let mut registry = self.registry.write().await;
        for identity in identities {
            registry.documents.remove(identity);
        }
        registry.save(&self.location.persist_dir)
    }

    /// Release the database connections.
    pub async fn close(&self) {
        self.vectors.close().await;
    }
}
