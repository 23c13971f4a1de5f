//! Model resolution.
//!
//! The sync engine asks a [`ModelFactory`] for its embedder and language
//! model at startup and again on every rebuild, so that a rebuild can switch
//! models. Tests supply their own factory with deterministic fakes.

use std::sync::Arc;

use nexusync_core::embedding::Embedder;

use crate::config::{EmbeddingConfig, LlmConfig};
use crate::embedding::create_embedder;
use crate::error::Result;
use crate::llm::{create_language_model, LanguageModel};

pub trait ModelFactory: Send + Sync {
    fn embedder(&self, config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>>;
    fn language_model(&self, config: &LlmConfig) -> Result<Arc<dyn LanguageModel>>;
}

/// Builds the HTTP/local backends named in the configuration.
pub struct ConfiguredModels;

impl ModelFactory for ConfiguredModels {
    fn embedder(&self, config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
        create_embedder(config)
    }

    fn language_model(&self, config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
        create_language_model(config)
    }
}
