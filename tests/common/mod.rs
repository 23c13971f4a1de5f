//! Deterministic model fakes and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use nexusync::config::{parse_config, Config, EmbeddingConfig, LlmConfig};
use nexusync::factory::ModelFactory;
use nexusync::llm::{ChatMessage, LanguageModel, TokenStream};
use nexusync::progress::NoProgress;
use nexusync::sync::SyncEngine;
use nexusync_core::embedding::Embedder;
use tokio::sync::mpsc;

pub const DIMS: usize = 64;

/// Text containing this marker fails to embed.
pub const EMBED_FAIL: &str = "EMBED_FAIL";

/// Bag-of-words embedder: each lowercase word bumps one hashed dimension.
pub struct HashEmbedder {
    model: String,
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

fn word_slot(word: &str) -> usize {
    // FNV-1a
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % DIMS as u64) as usize
}

pub fn embed_text(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        v[word_slot(&word.to_lowercase())] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if texts.iter().any(|t| t.contains(EMBED_FAIL)) {
            bail!("embedding backend rejected input");
        }
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }
}

/// Replies with every message it was given, joined, word by word.
pub struct EchoModel {
    model: String,
    fail: bool,
}

impl EchoModel {
    fn reply(&self, messages: &[ChatMessage]) -> Result<String> {
        if self.fail {
            bail!("language model unavailable");
        }
        // The system message carries the retrieved context in chat mode.
        let context: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        Ok(format!("Echo: {}", context.join(" | ")))
    }
}

#[async_trait]
impl LanguageModel for EchoModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        self.reply(messages)
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        let reply = self.reply(messages)?;
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for (i, word) in reply.split(' ').enumerate() {
                let token = if i == 0 { word.to_string() } else { format!(" {}", word) };
                if tx.send(Ok(token)).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

/// Hands out fakes named after the configured models.
#[derive(Default)]
pub struct FakeModels {
    pub fail_llm: bool,
}

impl ModelFactory for FakeModels {
    fn embedder(&self, config: &EmbeddingConfig) -> nexusync::error::Result<Arc<dyn Embedder>> {
        Ok(Arc::new(HashEmbedder::new(&config.model)))
    }

    fn language_model(&self, config: &LlmConfig) -> nexusync::error::Result<Arc<dyn LanguageModel>> {
        Ok(Arc::new(EchoModel {
            model: config.model.clone(),
            fail: self.fail_llm,
        }))
    }
}

/// A config whose index lives under `root`, scanning `dirs`.
pub fn test_config(root: &Path, dirs: &[&Path]) -> Config {
    let dirs: Vec<String> = dirs
        .iter()
        .map(|d| format!("\"{}\"", d.display()))
        .collect();
    let toml = format!(
        r#"
[index]
input_dirs = [{dirs}]
persist_dir = "{persist}"
vector_db_dir = "{vectors}"
collection = "test"

[embedding]
provider = "ollama"
model = "hash-embed"

[llm]
provider = "ollama"
model = "echo"

[retrieval]
top_k = 3
similarity_cutoff = 0.0
"#,
        dirs = dirs.join(", "),
        persist = root.join("index_storage").display(),
        vectors = root.join("vector_db").display(),
    );
    parse_config(&toml).expect("test config parses")
}

pub async fn open_engine(config: Config) -> nexusync::error::Result<Arc<SyncEngine>> {
    SyncEngine::open(config, Arc::new(FakeModels::default()), &NoProgress)
        .await
        .map(Arc::new)
}

pub fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

pub fn identity(path: &Path) -> String {
    nexusync::source::identity_for(path).unwrap()
}
