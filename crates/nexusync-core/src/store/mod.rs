//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait is keyed by document identity: every node
//! belongs to exactly one identity, and replacing or deleting an identity
//! touches all of its nodes in one atomic step. Keying by identity rather
//! than by node id lets a later refresh repair a store that drifted from
//! the registry after an interrupted write.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`replace_nodes`](VectorStore::replace_nodes) | Atomically swap all nodes of an identity |
//! | [`delete_identity`](VectorStore::delete_identity) | Remove all nodes of an identity |
//! | [`search`](VectorStore::search) | Top-k cosine similarity search |
//! | [`node_count`](VectorStore::node_count) | Total stored nodes |
//! | [`identities`](VectorStore::identities) | Distinct identities present |

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, ScoredNode};

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Replace every node stored for `identity` with `chunks`.
    ///
    /// `vectors[i]` is the embedding of `chunks[i]`. Readers never observe a
    /// mix of old and new nodes for the identity.
    async fn replace_nodes(&self, identity: &str, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()>;

    /// Remove all nodes of `identity`, returning how many were removed.
    async fn delete_identity(&self, identity: &str) -> Result<u64>;

    /// The `limit` nodes most similar to `query_vec`, best first.
    async fn search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ScoredNode>>;

    async fn node_count(&self) -> Result<u64>;

    async fn identities(&self) -> Result<Vec<String>>;
}

/// Check that chunks and vectors line up before writing.
pub fn ensure_aligned(chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
    if chunks.len() != vectors.len() {
        anyhow::bail!(
            "chunk/vector count mismatch: {} chunks, {} vectors",
            chunks.len(),
            vectors.len()
        );
    }
    Ok(())
}
