//! Sync progress reporting.
//!
//! Reports what a refresh or build is doing: how many files were scanned,
//! what the plan contains, and the fate of every document. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use serde::Serialize;

/// What happened to one document during a sync.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "lowercase")]
pub enum Transition {
    Added,
    Updated,
    Deleted,
    Failed(String),
}

/// A single progress event.
#[derive(Clone, Debug)]
pub enum SyncEvent {
    /// Input directories were walked; `files` documents found.
    Scanned { files: u64 },
    /// The plan was computed.
    Planned {
        upsert: u64,
        delete: u64,
        unchanged: u64,
    },
    /// One identity changed state.
    Document {
        identity: String,
        transition: Transition,
    },
}

/// Receives sync progress. Implementations write to stderr (human or JSON).
pub trait SyncReporter: Send + Sync {
    fn report(&self, event: SyncEvent);
}

/// Human-friendly progress on stderr: "sync  planned  12 to index, 1 to delete, 1,024 unchanged".
pub struct StderrProgress;

impl SyncReporter for StderrProgress {
    fn report(&self, event: SyncEvent) {
        let line = match &event {
            SyncEvent::Scanned { files } => {
                format!("sync  scanned  {} files\n", format_number(*files))
            }
            SyncEvent::Planned {
                upsert,
                delete,
                unchanged,
            } => format!(
                "sync  planned  {} to index, {} to delete, {} unchanged\n",
                format_number(*upsert),
                format_number(*delete),
                format_number(*unchanged)
            ),
            SyncEvent::Document {
                identity,
                transition,
            } => match transition {
                Transition::Added => format!("  + {}\n", identity),
                Transition::Updated => format!("  ~ {}\n", identity),
                Transition::Deleted => format!("  - {}\n", identity),
                Transition::Failed(reason) => format!("  ! {}  ({})\n", identity, reason),
            },
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncReporter for JsonProgress {
    fn report(&self, event: SyncEvent) {
        let obj = match &event {
            SyncEvent::Scanned { files } => serde_json::json!({
                "event": "scanned",
                "files": files
            }),
            SyncEvent::Planned {
                upsert,
                delete,
                unchanged,
            } => serde_json::json!({
                "event": "planned",
                "upsert": upsert,
                "delete": delete,
                "unchanged": unchanged
            }),
            SyncEvent::Document {
                identity,
                transition,
            } => serde_json::json!({
                "event": "document",
                "identity": identity,
                "transition": transition
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncReporter for NoProgress {
    fn report(&self, _event: SyncEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
