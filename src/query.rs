//! Single-shot question answering over the live index.
//!
//! Retrieval embeds the query, takes the `top_k` nearest nodes, and passes
//! them through the configured [`RelevanceFilter`](nexusync_core::retrieval::RelevanceFilter).
//! Only surviving nodes reach the prompt and the reported sources.
//!
//! Failures never escape as `Err`: they are folded into an [`Answer`] whose
//! `error` is set, so callers always have something to show.

use std::sync::Arc;

use nexusync_core::models::ScoredNode;
use nexusync_core::retrieval::{build_context, collect_sources, render_template};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::ChatConfig;
use crate::error::{NexusError, Result};
use crate::llm::{ChatMessage, LanguageModel};
use crate::sync::SyncEngine;

const EVENT_BUFFER: usize = 64;

/// Returned by the query engine when no node survives filtering.
pub const EMPTY_RESPONSE: &str = "Empty Response";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    /// Distinct file paths of the nodes used, in retrieval order.
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Answer {
    pub fn failed(err: &NexusError) -> Self {
        Self {
            answer: format!("An error occurred while processing your request: {}", err),
            sources: Vec::new(),
            error: Some(err.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// One item of a streamed answer: any number of tokens, then one `Final`.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerEvent {
    Token(String),
    Final(Answer),
}

/// What retrieval hands to prompt construction.
pub(crate) struct Retrieved {
    pub nodes: Vec<ScoredNode>,
    pub llm: Arc<dyn LanguageModel>,
    pub chat: ChatConfig,
    pub generation: u64,
}

impl Retrieved {
    pub fn context(&self) -> String {
        build_context(&self.nodes)
    }

    pub fn sources(&self) -> Vec<String> {
        collect_sources(&self.nodes)
    }
}

/// Search the live index and apply the relevance filter.
///
/// The state read guard is released before returning, so generation never
/// blocks a rebuild swap.
pub(crate) async fn retrieve_filtered(
    engine: &SyncEngine,
    query: &str,
    top_k: Option<usize>,
) -> Result<Retrieved> {
    if query.trim().is_empty() {
        return Err(NexusError::config("query must not be empty"));
    }
    let state = engine.read().await;
    let top_k = resolve_top_k(top_k, state.config.retrieval.top_k)?;

    let hits = state.index.search(query, top_k).await?;
    let found = hits.len();
    let nodes = state.config.retrieval.filter().apply(hits);
    tracing::debug!(found, kept = nodes.len(), top_k, "retrieved nodes");

    Ok(Retrieved {
        nodes,
        llm: state.llm.clone(),
        chat: state.config.chat.clone(),
        generation: state.generation,
    })
}

fn resolve_top_k(requested: Option<usize>, configured: usize) -> Result<usize> {
    match requested.unwrap_or(configured) {
        0 => Err(NexusError::config("top_k must be >= 1")),
        k => Ok(k),
    }
}

/// A receiver that yields only `answer` as the final event.
pub(crate) fn final_only(answer: Answer) -> mpsc::Receiver<AnswerEvent> {
    let (tx, rx) = mpsc::channel(1);
    // Capacity 1 and a fresh channel: this cannot fail.
    let _ = tx.try_send(AnswerEvent::Final(answer));
    rx
}

/// Drive `llm.stream` into an event channel.
///
/// Tokens are forwarded in generation order; the final event follows the
/// last token. Dropping the receiver drops the token stream, which stops
/// the backend. `on_complete` runs with the full text only when generation
/// succeeded.
pub(crate) fn spawn_answer_stream<F>(
    llm: Arc<dyn LanguageModel>,
    messages: Vec<ChatMessage>,
    sources: Vec<String>,
    on_complete: F,
) -> mpsc::Receiver<AnswerEvent>
where
    F: FnOnce(&str) + Send + 'static,
{
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    tokio::spawn(async move {
        let mut tokens = match llm.stream(&messages).await {
            Ok(tokens) => tokens,
            Err(e) => {
                let err = NexusError::generation(e);
                tracing::error!("streaming failed to start: {}", err);
                let _ = tx.send(AnswerEvent::Final(Answer::failed(&err))).await;
                return;
            }
        };

        let mut full = String::new();
        while let Some(item) = tokens.recv().await {
            match item {
                Ok(token) => {
                    full.push_str(&token);
                    if tx.send(AnswerEvent::Token(token)).await.is_err() {
                        tracing::debug!("answer receiver dropped");
                        return;
                    }
                }
                Err(e) => {
                    let err = NexusError::generation(e);
                    tracing::error!("streaming failed: {}", err);
                    let _ = tx.send(AnswerEvent::Final(Answer::failed(&err))).await;
                    return;
                }
            }
        }

        on_complete(&full);
        let _ = tx
            .send(AnswerEvent::Final(Answer {
                answer: full,
                sources,
                error: None,
            }))
            .await;
    });

    rx
}

/// Question answering without conversational memory.
#[derive(Clone)]
pub struct QueryFacade {
    engine: Arc<SyncEngine>,
}

impl QueryFacade {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    /// The `top_k` nearest nodes with their scores, unfiltered. Does not
    /// call the language model.
    pub async fn retrieve(&self, query: &str, top_k: Option<usize>) -> Result<Vec<ScoredNode>> {
        if query.trim().is_empty() {
            return Err(NexusError::config("query must not be empty"));
        }
        let state = self.engine.read().await;
        let top_k = resolve_top_k(top_k, state.config.retrieval.top_k)?;
        state.index.search(query, top_k).await
    }

    pub async fn ask(&self, query: &str, top_k: Option<usize>) -> Answer {
        match self.try_ask(query, top_k).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!("query failed: {}", e);
                Answer::failed(&e)
            }
        }
    }

    async fn try_ask(&self, query: &str, top_k: Option<usize>) -> Result<Answer> {
        let retrieved = retrieve_filtered(&self.engine, query, top_k).await?;
        if retrieved.nodes.is_empty() {
            return Ok(Answer {
                answer: EMPTY_RESPONSE.to_string(),
                ..Default::default()
            });
        }
        let answer = retrieved
            .llm
            .generate(&qa_messages(&retrieved, query))
            .await
            .map_err(NexusError::generation)?;
        Ok(Answer {
            answer,
            sources: retrieved.sources(),
            error: None,
        })
    }

    /// Stream the answer: zero or more `Token`s, then exactly one `Final`.
    pub async fn stream(&self, query: &str, top_k: Option<usize>) -> mpsc::Receiver<AnswerEvent> {
        let retrieved = match retrieve_filtered(&self.engine, query, top_k).await {
            Ok(retrieved) => retrieved,
            Err(e) => {
                tracing::error!("query failed: {}", e);
                return final_only(Answer::failed(&e));
            }
        };
        if retrieved.nodes.is_empty() {
            return final_only(Answer {
                answer: EMPTY_RESPONSE.to_string(),
                ..Default::default()
            });
        }
        let messages = qa_messages(&retrieved, query);
        spawn_answer_stream(retrieved.llm.clone(), messages, retrieved.sources(), |_| {})
    }
}

fn qa_messages(retrieved: &Retrieved, query: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(render_template(
        &retrieved.chat.qa_template,
        &retrieved.context(),
        query,
    ))]
}
