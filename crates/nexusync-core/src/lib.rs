//! # NexuSync Core
//!
//! Pure logic shared by the NexuSync indexer and chat server: document and
//! node models, chunking, sync planning, relevance filtering, the embedder
//! trait, and the vector store abstraction.
//!
//! This crate performs no filesystem or network I/O. Everything that touches
//! disks, SQLite, or model endpoints lives in the `nexusync` app crate.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod plan;
pub mod retrieval;
pub mod store;
