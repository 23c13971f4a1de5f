//! # NexuSync
//!
//! Keeps a vector index in sync with folders of documents and answers
//! questions over it.
//!
//! A refresh re-embeds only what changed: files are fingerprinted, compared
//! with the registry of what is already indexed, and new or modified
//! documents are upserted before deleted ones are removed. Query and chat
//! facades retrieve from the live index, and an HTTP API exposes both plus
//! index maintenance.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────┐   ┌────────────────────┐
//! │ DocumentSrc  │──▶│ ChangeDetector │──▶│ IndexStore         │
//! │ walk + hash  │   │ plan           │   │ registry + SQLite  │
//! └──────────────┘   └────────────────┘   └─────────┬──────────┘
//!                              SyncEngine (writer)  │
//!                      ┌────────────────────────────┤
//!                      ▼                            ▼
//!                ┌────────────┐               ┌──────────┐
//!                │ Query/Chat │◀──────────────│   HTTP   │
//!                └────────────┘               └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`source`] | Filesystem scanning, identities, fingerprints |
//! | [`extract`] | Text extraction from PDF and Office files |
//! | [`detector`] | Change detection against the registry |
//! | [`registry`] | Persisted identity → fingerprint/node map |
//! | [`vector_store`] | SQLite vector store |
//! | [`index_store`] | Registry and vector store as one index |
//! | [`sync`] | Refresh, rebuild, and the live index handle |
//! | [`embedding`] | Embedding backends |
//! | [`llm`] | Language-model backends |
//! | [`factory`] | Model resolution for open and rebuild |
//! | [`query`] | Question answering |
//! | [`chat`] | Conversational answering with memory |
//! | [`server`] | HTTP API |
//! | [`progress`] | Sync progress reporting |
//! | [`stats`] | Stats report |
//! | [`logging`] | Tracing subscriber setup |

pub mod chat;
pub mod config;
pub mod detector;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod factory;
pub mod index_store;
pub mod llm;
pub mod logging;
pub mod progress;
pub mod query;
pub mod registry;
pub mod server;
pub mod source;
pub mod stats;
pub mod sync;
pub mod vector_store;
