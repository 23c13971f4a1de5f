//! Conversational question answering.
//!
//! Each turn retrieves fresh context for the new message and sends the
//! language model a system prompt carrying that context, the most recent
//! exchanges that fit in `chat.memory_token_limit`, and the message itself.
//! History lives in memory only and is dropped when the index is rebuilt.

use std::sync::{Arc, Mutex, MutexGuard};

use nexusync_core::chunk::CHARS_PER_TOKEN;
use nexusync_core::retrieval::render_template;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{NexusError, Result};
use crate::llm::ChatMessage;
use crate::query::{final_only, retrieve_filtered, spawn_answer_stream, Answer, AnswerEvent, Retrieved};
use crate::sync::SyncEngine;

/// One completed turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exchange {
    pub query: String,
    pub response: String,
}

impl Exchange {
    fn tokens(&self) -> usize {
        estimate_tokens(&self.query) + estimate_tokens(&self.response)
    }
}

fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

#[derive(Debug, Default)]
struct ChatMemory {
    exchanges: Vec<Exchange>,
    /// Engine generation the exchanges refer to.
    generation: u64,
}

impl ChatMemory {
    /// Newest exchanges whose estimated size fits in `limit` tokens, oldest first.
    fn window(&self, limit: usize) -> &[Exchange] {
        let mut used = 0;
        let mut start = self.exchanges.len();
        for (i, exchange) in self.exchanges.iter().enumerate().rev() {
            used += exchange.tokens();
            if used > limit {
                break;
            }
            start = i;
        }
        &self.exchanges[start..]
    }

    fn sync_generation(&mut self, generation: u64) {
        if self.generation != generation {
            if !self.exchanges.is_empty() {
                tracing::info!("index was rebuilt; clearing chat history");
            }
            self.exchanges.clear();
            self.generation = generation;
        }
    }
}

/// A chat session over the live index. Clones share the same history.
#[derive(Clone)]
pub struct ChatFacade {
    engine: Arc<SyncEngine>,
    top_k: Option<usize>,
    memory: Arc<Mutex<ChatMemory>>,
}

impl ChatFacade {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            top_k: None,
            memory: Arc::new(Mutex::new(ChatMemory::default())),
        }
    }

    /// Retrieve this many nodes per turn instead of `retrieval.top_k`.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    fn memory(&self) -> MutexGuard<'_, ChatMemory> {
        self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn chat(&self, message: &str) -> Answer {
        match self.try_chat(message).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!("chat failed: {}", e);
                Answer::failed(&e)
            }
        }
    }

    async fn try_chat(&self, message: &str) -> Result<Answer> {
        let retrieved = retrieve_filtered(&self.engine, message, self.top_k).await?;
        let messages = self.messages(&retrieved, message);
        let response = retrieved
            .llm
            .generate(&messages)
            .await
            .map_err(NexusError::generation)?;
        self.record(message, &response);
        Ok(Answer {
            answer: response,
            sources: retrieved.sources(),
            error: None,
        })
    }

    /// Stream a reply: zero or more `Token`s, then exactly one `Final`.
    /// The exchange is recorded once generation completes.
    pub async fn chat_stream(&self, message: &str) -> mpsc::Receiver<AnswerEvent> {
        let retrieved = match retrieve_filtered(&self.engine, message, self.top_k).await {
            Ok(retrieved) => retrieved,
            Err(e) => {
                tracing::error!("chat failed: {}", e);
                return final_only(Answer::failed(&e));
            }
        };
        let messages = self.messages(&retrieved, message);
        let session = self.clone();
        let query = message.to_string();
        spawn_answer_stream(retrieved.llm.clone(), messages, retrieved.sources(), move |response| {
            session.record(&query, response)
        })
    }

    /// Forget every exchange of this session.
    pub fn clear_history(&self) {
        self.memory().exchanges.clear();
        tracing::info!("chat history cleared");
    }

    /// All exchanges since the last clear, oldest first.
    pub fn history(&self) -> Vec<Exchange> {
        self.memory().exchanges.clone()
    }

    fn messages(&self, retrieved: &Retrieved, message: &str) -> Vec<ChatMessage> {
        let system = render_template(&retrieved.chat.system_prompt, &retrieved.context(), message);
        let mut memory = self.memory();
        memory.sync_generation(retrieved.generation);

        let mut messages = vec![ChatMessage::system(system)];
        for exchange in memory.window(retrieved.chat.memory_token_limit) {
            messages.push(ChatMessage::user(exchange.query.clone()));
            messages.push(ChatMessage::assistant(exchange.response.clone()));
        }
        messages.push(ChatMessage::user(message));
        messages
    }

    fn record(&self, query: &str, response: &str) {
        self.memory().exchanges.push(Exchange {
            query: query.to_string(),
            response: response.to_string(),
        });
    }
}
