//! Query and chat behavior against a small indexed corpus.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{identity, open_engine, test_config, write, FakeModels};
use nexusync::chat::ChatFacade;
use nexusync::config::{Config, ModelOverrides};
use nexusync::progress::NoProgress;
use nexusync::query::{AnswerEvent, QueryFacade, EMPTY_RESPONSE};
use nexusync::sync::SyncEngine;
use tempfile::TempDir;
use tokio::sync::mpsc;

const FRANCE: &str = "The capital of France is Paris.\n\n\
Paris is also the largest city of France and sits on the Seine.";

struct Corpus {
    _tmp: TempDir,
    france: String,
    bananas: String,
    config: Config,
}

fn corpus() -> Corpus {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    let france = write(&docs, "france.txt", FRANCE);
    let bananas = write(&docs, "bananas.txt", "Bananas are a yellow fruit rich in potassium.");

    let mut config = test_config(tmp.path(), &[docs.as_path()]);
    // Small chunks so the France document yields several nodes.
    config.chunking.chunk_size = 12;
    config.chunking.chunk_overlap = 0;

    Corpus {
        france: identity(&france),
        bananas: identity(&bananas),
        config,
        _tmp: tmp,
    }
}

async fn collect(mut rx: mpsc::Receiver<AnswerEvent>) -> Vec<AnswerEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn assert_stream_contract(events: &[AnswerEvent]) -> String {
    let (last, tokens) = events.split_last().expect("at least one event");
    let mut streamed = String::new();
    for event in tokens {
        match event {
            AnswerEvent::Token(t) => streamed.push_str(t),
            AnswerEvent::Final(_) => panic!("final event before the end"),
        }
    }
    match last {
        AnswerEvent::Final(answer) => {
            if answer.error.is_none() {
                assert_eq!(answer.answer, streamed);
            }
        }
        AnswerEvent::Token(_) => panic!("stream did not end with a final event"),
    }
    streamed
}

fn unique(sources: &[String]) -> bool {
    sources.iter().collect::<HashSet<_>>().len() == sources.len()
}

#[tokio::test]
async fn answer_cites_the_source_document() {
    let corpus = corpus();
    let engine = open_engine(corpus.config.clone()).await.unwrap();
    let query = QueryFacade::new(engine);

    let answer = query.ask("What is the capital of France?", None).await;
    assert!(answer.error.is_none(), "{:?}", answer.error);
    assert!(answer.answer.contains("Paris"));
    assert!(answer.sources.contains(&corpus.france));
    assert!(unique(&answer.sources));
}

#[tokio::test]
async fn several_chunks_of_one_file_give_one_source() {
    let corpus = corpus();
    let engine = open_engine(corpus.config.clone()).await.unwrap();
    let query = QueryFacade::new(engine);

    let nodes = query.retrieve("Paris France capital city", Some(10)).await.unwrap();
    let france_nodes = nodes.iter().filter(|n| n.identity == corpus.france).count();
    assert!(france_nodes >= 2, "expected several France chunks, got {}", france_nodes);

    let answer = query.ask("Paris France capital city", Some(10)).await;
    assert_eq!(
        answer.sources.iter().filter(|s| **s == corpus.france).count(),
        1
    );
}

#[tokio::test]
async fn retrieve_orders_by_score() {
    let corpus = corpus();
    let engine = open_engine(corpus.config.clone()).await.unwrap();

    let nodes = QueryFacade::new(engine)
        .retrieve("yellow bananas", Some(10))
        .await
        .unwrap();
    assert_eq!(nodes[0].identity, corpus.bananas);
    assert!(nodes.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn stream_yields_tokens_then_one_final() {
    let corpus = corpus();
    let engine = open_engine(corpus.config.clone()).await.unwrap();

    let events = collect(
        QueryFacade::new(engine)
            .stream("What is the capital of France?", None)
            .await,
    )
    .await;
    assert!(events.len() > 1);
    let streamed = assert_stream_contract(&events);
    assert!(streamed.contains("Paris"));
    match events.last() {
        Some(AnswerEvent::Final(answer)) => assert!(answer.sources.contains(&corpus.france)),
        other => panic!("unexpected last event: {:?}", other),
    }
}

#[tokio::test]
async fn cutoff_can_filter_out_everything() {
    let mut corpus = corpus();
    corpus.config.retrieval.similarity_cutoff = Some(0.999);
    let engine = open_engine(corpus.config.clone()).await.unwrap();

    let answer = QueryFacade::new(engine).ask("unrelated words entirely", None).await;
    assert_eq!(answer.answer, EMPTY_RESPONSE);
    assert!(answer.sources.is_empty());
    assert!(answer.error.is_none());
}

#[tokio::test]
async fn excluded_keywords_drop_nodes() {
    let mut corpus = corpus();
    corpus.config.retrieval.exclude_keywords = vec!["potassium".to_string()];
    let engine = open_engine(corpus.config.clone()).await.unwrap();

    let answer = QueryFacade::new(engine).ask("yellow bananas", Some(10)).await;
    assert!(!answer.sources.contains(&corpus.bananas));
}

#[tokio::test]
async fn empty_query_is_an_answer_shaped_error() {
    let corpus = corpus();
    let engine = open_engine(corpus.config.clone()).await.unwrap();

    let answer = QueryFacade::new(engine).ask("   ", None).await;
    assert!(answer.is_error());
    assert!(answer.sources.is_empty());
}

#[tokio::test]
async fn model_failure_is_reported_not_raised() {
    let corpus = corpus();
    let engine = Arc::new(
        SyncEngine::open(
            corpus.config.clone(),
            Arc::new(FakeModels { fail_llm: true }),
            &NoProgress,
        )
        .await
        .unwrap(),
    );
    let query = QueryFacade::new(engine.clone());

    let answer = query.ask("What is the capital of France?", None).await;
    assert!(answer.error.unwrap().contains("language model unavailable"));

    let events = collect(query.stream("What is the capital of France?", None).await).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        AnswerEvent::Final(answer) => assert!(answer.is_error()),
        other => panic!("unexpected event: {:?}", other),
    }

    let chat = ChatFacade::new(engine);
    assert!(chat.chat("hello").await.is_error());
    assert!(chat.history().is_empty());
}

#[tokio::test]
async fn chat_remembers_previous_turns() {
    let corpus = corpus();
    let engine = open_engine(corpus.config.clone()).await.unwrap();
    let chat = ChatFacade::new(engine);

    let first = chat.chat("Tell me about France").await;
    assert!(first.sources.contains(&corpus.france));

    // The echo model repeats every message it receives, memory included.
    let second = chat.chat("And its capital?").await;
    assert!(second.answer.contains("Tell me about France"));

    let history = chat.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].query, "Tell me about France");
    assert_eq!(history[1].response, second.answer);

    chat.clear_history();
    assert!(chat.history().is_empty());
    let third = chat.chat("Anything else?").await;
    assert!(!third.answer.contains("Tell me about France"));
}

#[tokio::test]
async fn chat_stream_records_the_exchange() {
    let corpus = corpus();
    let engine = open_engine(corpus.config.clone()).await.unwrap();
    let chat = ChatFacade::new(engine);

    let events = collect(chat.chat_stream("What is the capital of France?").await).await;
    let streamed = assert_stream_contract(&events);

    let history = chat.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].response, streamed);
}

#[tokio::test]
async fn rebuild_clears_chat_memory() {
    let corpus = corpus();
    let engine = open_engine(corpus.config.clone()).await.unwrap();
    let chat = ChatFacade::new(engine.clone());

    chat.chat("Tell me about France").await;
    engine
        .rebuild(&ModelOverrides::default(), &NoProgress)
        .await
        .unwrap();

    let reply = chat.chat("What did I ask before?").await;
    assert!(!reply.answer.contains("Tell me about France"));
    assert_eq!(chat.history().len(), 1);
}

#[tokio::test]
async fn memory_is_token_budgeted() {
    let mut corpus = corpus();
    corpus.config.chat.memory_token_limit = 10;
    let engine = open_engine(corpus.config.clone()).await.unwrap();
    let chat = ChatFacade::new(engine);

    chat.chat("first question about France").await;
    // Each echoed reply is far larger than ten tokens, so nothing fits.
    let reply = chat.chat("second question").await;
    assert!(!reply.answer.contains("first question about France"));
    assert_eq!(chat.history().len(), 2);
}
