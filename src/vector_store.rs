//! SQLite-backed [`VectorStore`].
//!
//! Nodes live in a single `nodes` table keyed by node id and indexed by
//! identity. Embeddings are little-endian `f32` BLOBs; search is a
//! brute-force cosine scan, which is adequate for the folder-sized corpora
//! this tool targets.

use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use nexusync_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use nexusync_core::models::{Chunk, ScoredNode};
use nexusync_core::store::{ensure_aligned, VectorStore};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        migrate(&pool).await?;

        Ok(Self { pool })
    }

    /// Close the pool, checkpointing the WAL into the main database file.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            node_id TEXT PRIMARY KEY,
            identity TEXT NOT NULL,
            file_path TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            UNIQUE(identity, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_nodes_identity ON nodes(identity)")
        .execute(pool)
        .await?;

    Ok(())
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn replace_nodes(&self, identity: &str, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        ensure_aligned(chunks, vectors)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM nodes WHERE identity = ?")
            .bind(identity)
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT INTO nodes (node_id, identity, file_path, chunk_index, text, hash, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(identity)
            .bind(&chunk.file_path)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_identity(&self, identity: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM nodes WHERE identity = ?")
            .bind(identity)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ScoredNode>> {
        let rows = sqlx::query(
            "SELECT node_id, identity, file_path, chunk_index, text, embedding FROM nodes",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<ScoredNode> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                ScoredNode {
                    node_id: row.get("node_id"),
                    identity: row.get("identity"),
                    file_path: row.get("file_path"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    score: cosine_similarity(query_vec, &blob_to_vec(&blob)),
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.identity.cmp(&b.identity))
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn node_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM nodes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn identities(&self) -> Result<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT identity FROM nodes ORDER BY identity")
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexusync_core::chunk::{chunk_document, ChunkParams};
    use tempfile::TempDir;

    fn chunks(identity: &str, text: &str) -> Vec<Chunk> {
        chunk_document(
            identity,
            identity,
            text,
            ChunkParams {
                chunk_size: 1,
                chunk_overlap: 0,
            },
        )
    }

    #[tokio::test]
    async fn replace_is_per_identity() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&tmp.path().join("v.sqlite")).await.unwrap();

        let a = chunks("/a", "one\n\ntwo");
        assert_eq!(a.len(), 2);
        store.replace_nodes("/a", &a, &[vec![1.0, 0.0], vec![0.5, 0.5]]).await.unwrap();
        store.replace_nodes("/b", &chunks("/b", "b"), &[vec![0.0, 1.0]]).await.unwrap();
        assert_eq!(store.node_count().await.unwrap(), 3);

        store.replace_nodes("/a", &chunks("/a", "new"), &[vec![1.0, 0.0]]).await.unwrap();
        assert_eq!(store.node_count().await.unwrap(), 2);
        assert_eq!(store.identities().await.unwrap(), vec!["/a", "/b"]);
    }

    #[tokio::test]
    async fn search_orders_by_cosine() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&tmp.path().join("v.sqlite")).await.unwrap();
        store.replace_nodes("/x", &chunks("/x", "x"), &[vec![1.0, 0.0]]).await.unwrap();
        store.replace_nodes("/y", &chunks("/y", "y"), &[vec![0.0, 1.0]]).await.unwrap();

        let hits = store.search(&[0.1, 1.0], 2).await.unwrap();
        assert_eq!(hits[0].file_path, "/y");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn delete_and_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("v.sqlite");
        {
            let store = SqliteVectorStore::open(&path).await.unwrap();
            store.replace_nodes("/x", &chunks("/x", "x"), &[vec![1.0]]).await.unwrap();
            store.replace_nodes("/y", &chunks("/y", "y"), &[vec![1.0]]).await.unwrap();
            assert_eq!(store.delete_identity("/x").await.unwrap(), 1);
            store.close().await;
        }
        let store = SqliteVectorStore::open(&path).await.unwrap();
        assert_eq!(store.identities().await.unwrap(), vec!["/y"]);
    }
}
