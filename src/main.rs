//! # NexuSync CLI (`nexusync`)
//!
//! Builds and incrementally syncs a vector index over local folders, answers
//! questions against it, and serves the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! nexusync --config ./config/nexusync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nexusync build` | Load the index, building it if none exists |
//! | `nexusync refresh` | Sync the index with the input directories |
//! | `nexusync rebuild` | Rebuild from scratch, optionally switching models |
//! | `nexusync stats` | Show index statistics |
//! | `nexusync query "<q>"` | Answer one question |
//! | `nexusync retrieve "<q>"` | Show the nearest nodes without generating |
//! | `nexusync chat` | Interactive streaming chat |
//! | `nexusync serve` | Start the HTTP server |
//! | `nexusync completions <shell>` | Print shell completions |

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use nexusync::chat::ChatFacade;
use nexusync::config::{self, InputDir, ModelOverrides};
use nexusync::factory::ConfiguredModels;
use nexusync::logging;
use nexusync::progress::ProgressMode;
use nexusync::query::{AnswerEvent, QueryFacade};
use nexusync::server;
use nexusync::stats::print_stats;
use nexusync::sync::SyncEngine;

/// NexuSync: keep a vector index in sync with your documents and chat with them.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/nexusync.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "nexusync",
    about = "NexuSync: incremental document indexing and retrieval-augmented chat",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/nexusync.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the index, building it from the input directories if none exists.
    Build,

    /// Index new and modified documents and drop deleted ones.
    Refresh,

    /// Rebuild the index from scratch.
    ///
    /// The new index is built alongside the old one, which stays in place
    /// if the rebuild fails. This is the only way to change the embedding
    /// model of an existing index.
    Rebuild {
        #[arg(long)]
        embedding_model: Option<String>,
        #[arg(long)]
        llm_model: Option<String>,
        #[arg(long)]
        temperature: Option<f32>,
        /// Replace the configured input directories (repeatable).
        #[arg(long = "input-dir")]
        input_dirs: Vec<PathBuf>,
    },

    /// Show index statistics.
    Stats,

    /// Answer a single question, streaming the reply.
    Query {
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Print the nearest nodes and their scores without calling the language model.
    Retrieve {
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Interactive chat. `/reset` clears history, `/history` prints it, `/quit` exits.
    Chat {
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Print shell completions.
    Completions { shell: Shell },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "nexusync", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
    let reporter = progress.reporter();

    // Rebuild never loads the existing index, so it can replace one that
    // `open` rejects.
    let command = match cli.command {
        Commands::Rebuild {
            embedding_model,
            llm_model,
            temperature,
            input_dirs,
        } => {
            let overrides = ModelOverrides {
                embedding_model,
                llm_model,
                temperature,
                input_dirs: (!input_dirs.is_empty())
                    .then(|| input_dirs.into_iter().map(InputDir::Path).collect()),
            };
            let (engine, report) =
                SyncEngine::recreate(cfg, &overrides, Arc::new(ConfiguredModels), reporter.as_ref()).await?;
            println!(
                "Rebuilt index: {} documents with {} ({} failed)",
                report.indexed,
                report.embedding_model,
                report.failed.len()
            );
            for (identity, reason) in &report.failed {
                println!("  failed: {} ({})", identity, reason);
            }
            engine.close().await;
            return Ok(());
        }
        other => other,
    };

    let engine = Arc::new(SyncEngine::open(cfg.clone(), Arc::new(ConfiguredModels), reporter.as_ref()).await?);

    match command {
        Commands::Build | Commands::Stats => {
            print_stats(&engine.stats().await?);
        }
        Commands::Refresh => {
            let report = engine.refresh(reporter.as_ref()).await?;
            println!(
                "Refreshed: {} added, {} updated, {} deleted, {} unchanged, {} failed",
                report.added.len(),
                report.updated.len(),
                report.deleted.len(),
                report.unchanged,
                report.failed.len()
            );
            for (identity, reason) in &report.failed {
                println!("  failed: {} ({})", identity, reason);
            }
            if let Some(m) = &report.mismatch {
                println!(
                    "Warning: {} documents indexed but {} files on disk",
                    m.indexed, m.on_disk
                );
            }
        }
        Commands::Query { query, top_k } => {
            let facade = QueryFacade::new(engine.clone());
            let events = facade.stream(&query, top_k).await;
            print_stream(events).await?;
        }
        Commands::Retrieve { query, top_k } => {
            let facade = QueryFacade::new(engine.clone());
            let nodes = facade.retrieve(&query, top_k).await?;
            if nodes.is_empty() {
                println!("No results.");
            }
            for (i, node) in nodes.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} (chunk {})",
                    i + 1,
                    node.score,
                    node.file_path,
                    node.chunk_index
                );
                println!("    {}", snippet(&node.text, 200));
            }
        }
        Commands::Chat { top_k } => {
            run_chat(engine.clone(), top_k).await?;
        }
        Commands::Serve => {
            server::run_server(engine.clone(), &cfg.server.bind).await?;
        }
        Commands::Rebuild { .. } | Commands::Completions { .. } => {}
    }

    engine.close().await;
    Ok(())
}

/// Print tokens as they arrive, then the sources.
async fn print_stream(mut events: tokio::sync::mpsc::Receiver<AnswerEvent>) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    let mut streamed = false;
    while let Some(event) = events.recv().await {
        match event {
            AnswerEvent::Token(token) => {
                streamed = true;
                write!(stdout, "{}", token)?;
                stdout.flush()?;
            }
            AnswerEvent::Final(answer) => {
                if let Some(error) = &answer.error {
                    writeln!(stdout)?;
                    anyhow::bail!("{}", error);
                }
                if !streamed {
                    write!(stdout, "{}", answer.answer)?;
                }
                writeln!(stdout)?;
                if !answer.sources.is_empty() {
                    writeln!(stdout, "\nSources:")?;
                    for source in &answer.sources {
                        writeln!(stdout, "  - {}", source)?;
                    }
                }
            }
        }
    }
    Ok(())
}

async fn run_chat(engine: Arc<SyncEngine>, top_k: Option<usize>) -> anyhow::Result<()> {
    let mut chat = ChatFacade::new(engine);
    if let Some(k) = top_k {
        chat = chat.with_top_k(k);
    }

    println!("Chat started. Commands: /reset, /history, /quit");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let message = line.trim();
        match message {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                chat.clear_history();
                println!("History cleared.");
            }
            "/history" => {
                for exchange in chat.history() {
                    println!("you: {}", exchange.query);
                    println!("bot: {}", exchange.response);
                }
            }
            _ => {
                if let Err(e) = print_stream(chat.chat_stream(message).await).await {
                    eprintln!("error: {}", e);
                }
            }
        }
    }
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}
