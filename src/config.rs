use nexusync_core::chunk::ChunkParams;
use nexusync_core::retrieval::RelevanceFilter;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{NexusError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub input_dirs: Vec<InputDir>,
    #[serde(default = "default_persist_dir")]
    pub persist_dir: PathBuf,
    #[serde(default = "default_vector_db_dir")]
    pub vector_db_dir: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_persist_dir() -> PathBuf {
    PathBuf::from("index_storage")
}
fn default_vector_db_dir() -> PathBuf {
    PathBuf::from("vector_db")
}
fn default_collection() -> String {
    "my_collection".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

/// An input directory, written either as a bare path or as a table.
///
/// ```toml
/// input_dirs = ["docs", { path = "notes", recursive = false }]
/// ```
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum InputDir {
    Path(PathBuf),
    Table {
        path: PathBuf,
        #[serde(default = "default_recursive")]
        recursive: bool,
    },
}

fn default_recursive() -> bool {
    true
}

impl InputDir {
    pub fn path(&self) -> &Path {
        match self {
            InputDir::Path(p) => p,
            InputDir::Table { path, .. } => path,
        }
    }

    pub fn recursive(&self) -> bool {
        match self {
            InputDir::Path(_) => true,
            InputDir::Table { recursive, .. } => *recursive,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkParams {
        ChunkParams {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }
}

fn default_chunk_size() -> usize {
    1024
}
fn default_chunk_overlap() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: Some(3072),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_llm_model(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
            url: None,
        }
    }
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.4
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_similarity_cutoff")]
    pub similarity_cutoff: Option<f32>,
    #[serde(default)]
    pub required_keywords: Vec<String>,
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_cutoff: default_similarity_cutoff(),
            required_keywords: Vec::new(),
            exclude_keywords: Vec::new(),
        }
    }
}

impl RetrievalConfig {
    /// The post-retrieval filter these settings describe.
    pub fn filter(&self) -> RelevanceFilter {
        RelevanceFilter {
            similarity_cutoff: self.similarity_cutoff,
            required_keywords: self.required_keywords.clone(),
            exclude_keywords: self.exclude_keywords.clone(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_similarity_cutoff() -> Option<f32> {
    Some(0.2)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_memory_token_limit")]
    pub memory_token_limit: usize,
    #[serde(default = "default_qa_template")]
    pub qa_template: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            memory_token_limit: default_memory_token_limit(),
            qa_template: default_qa_template(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_memory_token_limit() -> usize {
    3000
}

pub const DEFAULT_QA_TEMPLATE: &str = "Context information is below.\n\
---------------------\n\
{context_str}\n\
---------------------\n\
Given the context information and not prior knowledge, answer the query.\n\
Query: {query_str}\n\
Answer: ";

fn default_qa_template() -> String {
    DEFAULT_QA_TEMPLATE.to_string()
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions \
about the user's documents. Use the following context to answer. If the context does not \
contain the answer, say so.\n\n{context_str}";

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:2024".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Model choices that `rebuild` may change.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ModelOverrides {
    pub embedding_model: Option<String>,
    pub llm_model: Option<String>,
    pub temperature: Option<f32>,
    pub input_dirs: Option<Vec<InputDir>>,
}

impl Config {
    /// A copy of this config with `overrides` applied and re-validated.
    ///
    /// Changing the embedding model drops an explicitly configured `dims`
    /// unless the model is unchanged, since dimensionality is model-specific.
    pub fn with_overrides(&self, overrides: &ModelOverrides) -> Result<Config> {
        let mut next = self.clone();
        if let Some(model) = &overrides.embedding_model {
            if *model != next.embedding.model {
                next.embedding.dims = None;
            }
            next.embedding.model = model.clone();
        }
        if let Some(model) = &overrides.llm_model {
            next.llm.model = model.clone();
        }
        if let Some(t) = overrides.temperature {
            next.llm.temperature = t;
        }
        if let Some(dirs) = &overrides.input_dirs {
            next.index.input_dirs = dirs.clone();
        }
        next.validate()?;
        Ok(next)
    }

    pub fn validate(&self) -> Result<()> {
        if self.index.input_dirs.is_empty() {
            return Err(NexusError::config("index.input_dirs must list at least one directory"));
        }
        if self.index.collection.trim().is_empty() {
            return Err(NexusError::config("index.collection must not be empty"));
        }

        if self.chunking.chunk_size == 0 {
            return Err(NexusError::config("chunking.chunk_size must be > 0"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(NexusError::config(
                "chunking.chunk_overlap must be smaller than chunking.chunk_size",
            ));
        }

        if self.retrieval.top_k < 1 {
            return Err(NexusError::config("retrieval.top_k must be >= 1"));
        }
        if let Some(cutoff) = self.retrieval.similarity_cutoff {
            if !(-1.0..=1.0).contains(&cutoff) {
                return Err(NexusError::config(
                    "retrieval.similarity_cutoff must be in [-1.0, 1.0]",
                ));
            }
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(NexusError::config("llm.temperature must be in [0.0, 2.0]"));
        }
        if self.embedding.model.trim().is_empty() {
            return Err(NexusError::config("embedding.model must not be empty"));
        }
        if self.llm.model.trim().is_empty() {
            return Err(NexusError::config("llm.model must not be empty"));
        }

        match self.embedding.provider.as_str() {
            "openai" | "ollama" | "local" => {}
            other => {
                return Err(NexusError::config(format!(
                    "Unknown embedding provider: '{}'. Must be openai, ollama, or local.",
                    other
                )))
            }
        }
        match self.llm.provider.as_str() {
            "openai" | "ollama" => {}
            other => {
                return Err(NexusError::config(format!(
                    "Unknown llm provider: '{}'. Must be openai or ollama.",
                    other
                )))
            }
        }
        if self.embedding.dims == Some(0) {
            return Err(NexusError::config("embedding.dims must be > 0"));
        }
        if self.embedding.batch_size == 0 {
            return Err(NexusError::config("embedding.batch_size must be > 0"));
        }

        for template in [&self.chat.qa_template, &self.chat.system_prompt] {
            if !template.contains("{context_str}") {
                return Err(NexusError::config(
                    "chat templates must contain a {context_str} placeholder",
                ));
            }
        }
        if !self.chat.qa_template.contains("{query_str}") {
            return Err(NexusError::config(
                "chat.qa_template must contain a {query_str} placeholder",
            ));
        }

        Ok(())
    }

    /// Location of the SQLite vector database for this collection.
    pub fn vector_db_path(&self) -> PathBuf {
        self.index
            .vector_db_dir
            .join(format!("{}.sqlite", self.index.collection))
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| NexusError::config(format!("Failed to parse config file: {}", e)))?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        NexusError::config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse_config("[index]\ninput_dirs = [\"docs\"]\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 1024);
        assert_eq!(config.chunking.chunk_overlap, 20);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.server.bind, "0.0.0.0:2024");
        assert_eq!(config.index.collection, "my_collection");
        assert!((config.llm.temperature - 0.4).abs() < f32::EPSILON);
        assert!(config.index.input_dirs[0].recursive());
        assert_eq!(config.vector_db_path(), PathBuf::from("vector_db/my_collection.sqlite"));
    }

    #[test]
    fn example_config_parses() {
        let config = parse_config(include_str!("../config/nexusync.example.toml")).unwrap();
        assert_eq!(config.index.input_dirs.len(), 2);
        assert_eq!(config.embedding.dims, Some(3072));
        assert!(config.chat.qa_template.contains("{query_str}"));
        assert_eq!(config.retrieval.filter().similarity_cutoff, Some(0.2));
    }

    #[test]
    fn input_dirs_accept_tables() {
        let config = parse_config(
            "[index]\ninput_dirs = [\"a\", { path = \"b\", recursive = false }]\n",
        )
        .unwrap();
        assert_eq!(config.index.input_dirs[1].path(), Path::new("b"));
        assert!(!config.index.input_dirs[1].recursive());
    }

    #[test]
    fn rejects_bad_values() {
        let cases = [
            "[index]\ninput_dirs = []\n",
            "[index]\ninput_dirs = [\"a\"]\n[chunking]\nchunk_size = 0\n",
            "[index]\ninput_dirs = [\"a\"]\n[chunking]\nchunk_size = 10\nchunk_overlap = 10\n",
            "[index]\ninput_dirs = [\"a\"]\n[retrieval]\ntop_k = 0\n",
            "[index]\ninput_dirs = [\"a\"]\n[embedding]\nprovider = \"huggingface\"\n",
            "[index]\ninput_dirs = [\"a\"]\n[chat]\nqa_template = \"no placeholders\"\n",
        ];
        for case in cases {
            let err = parse_config(case).unwrap_err();
            assert!(matches!(err, NexusError::Configuration(_)), "{}", case);
        }
    }

    #[test]
    fn overrides_replace_models_and_reset_dims() {
        let config = parse_config("[index]\ninput_dirs = [\"a\"]\n[embedding]\ndims = 3072\n").unwrap();
        let next = config
            .with_overrides(&ModelOverrides {
                embedding_model: Some("text-embedding-3-small".to_string()),
                llm_model: Some("gpt-4o".to_string()),
                temperature: Some(0.1),
                input_dirs: None,
            })
            .unwrap();
        assert_eq!(next.embedding.model, "text-embedding-3-small");
        assert_eq!(next.embedding.dims, None);
        assert_eq!(next.llm.model, "gpt-4o");
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }
}
