//! The sync engine: one live index per process.
//!
//! [`SyncEngine`] owns the active [`EngineState`] (configuration, index, and
//! language model) behind an async `RwLock`, plus a writer mutex that
//! serializes every mutation. Readers hold a read guard only while they
//! touch the index, so:
//!
//! - `refresh` mutates the live index one identity at a time; each identity
//!   is replaced in a single vector-store transaction, so readers always see
//!   a consistent node set per document.
//! - `rebuild` builds a complete new index into staging locations while
//!   readers keep using the old one, then takes the write lock only to swap
//!   the files and the state. Readers see either the old or the new index.
//! - [`SyncEngine::recreate`] does the same without a live engine, for an
//!   index that cannot be opened.
//!
//! A rebuild that overrides the embedding model records the model it
//! replaced in the registry; later opens keep the rebuilt model while the
//! configuration still names the replaced one.
//!
//! Every rebuild bumps [`EngineState::generation`]; chat sessions compare it
//! to drop history that refers to the previous index.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use nexusync_core::chunk::ChunkParams;
use nexusync_core::embedding::Embedder;
use nexusync_core::models::ScanFailure;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard};

use crate::config::{Config, ModelOverrides};
use crate::detector::ChangeDetector;
use crate::error::{NexusError, Result};
use crate::factory::ModelFactory;
use crate::index_store::{IndexLocation, IndexStats, IndexStore, LoadOutcome, UpsertOutcome};
use crate::llm::LanguageModel;
use crate::progress::{SyncEvent, SyncReporter, Transition};
use crate::registry::{Registry, RegistryRead};
use crate::source::DocumentSource;

const STAGING_SUFFIX: &str = "rebuild";
const BACKUP_SUFFIX: &str = "previous";

/// Everything a reader needs, swapped as one unit on rebuild.
pub struct EngineState {
    pub config: Config,
    pub index: IndexStore,
    pub llm: Arc<dyn LanguageModel>,
    /// Incremented by every rebuild.
    pub generation: u64,
}

/// Document counts disagree between the index and the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountMismatch {
    pub indexed: usize,
    pub on_disk: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: usize,
    pub failed: Vec<(String, String)>,
    /// Files seen on disk.
    pub scanned: usize,
    pub mismatch: Option<CountMismatch>,
}

impl RefreshReport {
    pub fn upserted(&self) -> usize {
        self.added.len() + self.updated.len()
    }

    pub fn is_noop(&self) -> bool {
        self.upserted() == 0 && self.deleted.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub indexed: usize,
    pub failed: Vec<(String, String)>,
    pub embedding_model: String,
    pub llm_model: String,
    pub generation: u64,
}

pub struct SyncEngine {
    factory: Arc<dyn ModelFactory>,
    state: RwLock<EngineState>,
    writer: Mutex<()>,
    /// The embedding model named by the configuration the engine started from.
    configured_model: String,
}

/// A complete index built beside the live one, closed and ready to move.
struct Staged {
    location: IndexLocation,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LanguageModel>,
    outcome: UpsertOutcome,
}

impl SyncEngine {
    /// Load the persisted index, building it first if none exists.
    ///
    /// Fails with a configuration error for missing input directories or a
    /// changed embedding model, `EmptyCorpus` when an initial build finds no
    /// documents, and a persistence error for an index that cannot be
    /// trusted.
    pub async fn open(
        config: Config,
        factory: Arc<dyn ModelFactory>,
        reporter: &dyn SyncReporter,
    ) -> Result<Self> {
        config.validate()?;
        let source = DocumentSource::new(&config.index)?;
        source.check_dirs()?;

        let configured_model = config.embedding.model.clone();
        let location = IndexLocation::from_config(&config);
        let config = adopt_rebuilt_model(config, &location)?;

        let embedder = factory.embedder(&config.embedding)?;
        let llm = factory.language_model(&config.llm)?;

        let index = match IndexStore::load_or_create(location.clone(), embedder, config.chunking.params())
            .await?
        {
            LoadOutcome::Loaded(index) => index,
            LoadOutcome::Absent(index) => {
                let scan = source.scan()?;
                reporter.report(SyncEvent::Scanned {
                    files: scan.documents.len() as u64,
                });
                report_failures(&scan_failures(&scan.failures), reporter);
                match index.build_from_scratch(&scan.documents).await {
                    Ok(outcome) => {
                        report_build(&outcome, reporter);
                        tracing::info!(
                            indexed = outcome.updated.len(),
                            failed = outcome.failed.len() + scan.failures.len(),
                            "initial index build complete"
                        );
                        index
                    }
                    Err(e) => {
                        index.close().await;
                        return Err(e);
                    }
                }
            }
            LoadOutcome::Corrupt { reason } => {
                return Err(NexusError::persistence(format!(
                    "index at {} is corrupt ({}); run `nexusync rebuild` to recreate it",
                    location.persist_dir.display(),
                    reason
                )))
            }
        };

        Ok(Self::assemble(factory, configured_model, config, index, llm, 0))
    }

    /// Build a fresh index and install it over whatever is on disk, without
    /// loading the existing index first.
    ///
    /// This is how an index that [`SyncEngine::open`] rejects, as corrupt or
    /// as built with another embedding model, gets replaced. Whatever was on
    /// disk is kept aside until the new index opens and is put back if it
    /// does not.
    pub async fn recreate(
        config: Config,
        overrides: &ModelOverrides,
        factory: Arc<dyn ModelFactory>,
        reporter: &dyn SyncReporter,
    ) -> Result<(Self, RebuildReport)> {
        config.validate()?;
        let configured_model = config.embedding.model.clone();
        let config = config.with_overrides(overrides)?;

        let Staged {
            location: staging,
            embedder,
            llm,
            outcome,
        } = stage(&config, &configured_model, factory.as_ref(), reporter).await?;

        let live = IndexLocation::from_config(&config);
        let index = install(&staging, &live, embedder, config.chunking.params()).await?;

        let report = rebuild_report(outcome, &config, 0);
        log_rebuild(&report);
        let engine = Self::assemble(factory, configured_model, config, index, llm, 0);
        Ok((engine, report))
    }

    fn assemble(
        factory: Arc<dyn ModelFactory>,
        configured_model: String,
        config: Config,
        index: IndexStore,
        llm: Arc<dyn LanguageModel>,
        generation: u64,
    ) -> Self {
        Self {
            factory,
            state: RwLock::new(EngineState {
                config,
                index,
                llm,
                generation,
            }),
            writer: Mutex::new(()),
            configured_model,
        }
    }

    /// Shared access to the live state. Hold the guard only while querying
    /// the index; a pending rebuild swap waits for it.
    pub async fn read(&self) -> RwLockReadGuard<'_, EngineState> {
        self.state.read().await
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        self.read().await.index.stats().await
    }

    /// Bring the index in line with the configured input directories.
    ///
    /// New and modified documents are upserted before deletions run. A
    /// document that fails to load or embed is reported and skipped; a
    /// persistence failure aborts the refresh. Nothing is written before
    /// the input directories have been checked.
    pub async fn refresh(&self, reporter: &dyn SyncReporter) -> Result<RefreshReport> {
        let _writer = self.writer.lock().await;
        let state = self.read().await;
        let index = &state.index;

        let detector = ChangeDetector::new(&state.config.index, &state.config.index.input_dirs)?;
        detector.check_dirs()?;

        let drift = index.drift().await?;
        if !drift.missing_vectors.is_empty() {
            tracing::warn!(
                count = drift.missing_vectors.len(),
                "registry entries without vectors; re-indexing them"
            );
            index.invalidate(&drift.missing_vectors).await?;
        }

        let registered = index.fingerprints().await;
        let plan = detector.compute_plan(&registered)?;

        // Orphans whose file is still on disk are healed by the upsert,
        // which replaces every node of the identity.
        let orphaned: Vec<String> = drift
            .orphaned_vectors
            .into_iter()
            .filter(|identity| !plan.on_disk(identity))
            .collect();

        reporter.report(SyncEvent::Scanned {
            files: plan.scanned() as u64,
        });
        reporter.report(SyncEvent::Planned {
            upsert: plan.to_upsert.len() as u64,
            delete: (plan.to_delete.len() + orphaned.len()) as u64,
            unchanged: plan.unchanged.len() as u64,
        });

        let mut report = RefreshReport {
            unchanged: plan.unchanged.len(),
            scanned: plan.scanned(),
            ..Default::default()
        };

        let unreadable = scan_failures(&plan.failures);
        report_failures(&unreadable, reporter);
        report.failed.extend(unreadable);

        let upserted = index.upsert(&plan.to_upsert).await?;
        for identity in upserted.updated {
            let transition = if registered.contains_key(&identity) {
                report.updated.push(identity.clone());
                Transition::Updated
            } else {
                report.added.push(identity.clone());
                Transition::Added
            };
            tracing::info!(identity = %identity, ?transition, "document indexed");
            reporter.report(SyncEvent::Document {
                identity,
                transition,
            });
        }
        report_failures(&upserted.failed, reporter);
        report.failed.extend(upserted.failed);

        let mut to_delete = plan.to_delete;
        if !orphaned.is_empty() {
            tracing::warn!(
                count = orphaned.len(),
                "vector store holds unregistered documents that are gone from disk; removing them"
            );
            to_delete.extend(orphaned);
        }
        let deleted = index.delete(&to_delete).await?;
        for identity in deleted.removed {
            tracing::info!(identity = %identity, "document deleted");
            reporter.report(SyncEvent::Document {
                identity: identity.clone(),
                transition: Transition::Deleted,
            });
            report.deleted.push(identity);
        }
        report_failures(&deleted.failed, reporter);
        report.failed.extend(deleted.failed);

        let stats = index.stats().await?;
        if stats.document_count != report.scanned {
            tracing::warn!(
                indexed = stats.document_count,
                on_disk = report.scanned,
                "indexed document count does not match files on disk"
            );
            report.mismatch = Some(CountMismatch {
                indexed: stats.document_count,
                on_disk: report.scanned,
            });
        }

        tracing::info!(
            added = report.added.len(),
            updated = report.updated.len(),
            deleted = report.deleted.len(),
            unchanged = report.unchanged,
            failed = report.failed.len(),
            "refresh complete"
        );
        Ok(report)
    }

    /// Recreate the index from scratch, optionally switching models or
    /// input directories.
    ///
    /// The new index is built into staging locations first. On any failure
    /// before the swap, including an empty corpus, the live index is left
    /// untouched. If the swap itself fails, the previous files are put back
    /// and reopened before the error is returned.
    pub async fn rebuild(
        &self,
        overrides: &ModelOverrides,
        reporter: &dyn SyncReporter,
    ) -> Result<RebuildReport> {
        let _writer = self.writer.lock().await;

        let config = self.read().await.config.with_overrides(overrides)?;
        let Staged {
            location: staging,
            embedder,
            llm,
            outcome,
        } = stage(&config, &self.configured_model, self.factory.as_ref(), reporter).await?;
        let live = IndexLocation::from_config(&config);

        let mut state = self.state.write().await;
        state.index.close().await;
        let index = match install(&staging, &live, embedder, config.chunking.params()).await {
            Ok(index) => index,
            Err(e) => {
                let reopened = state.index.reopen().await;
                match reopened {
                    Ok(previous) => state.index = previous,
                    Err(reopen) => tracing::error!("previous index could not be reopened: {}", reopen),
                }
                return Err(e);
            }
        };

        let report = rebuild_report(outcome, &config, state.generation + 1);
        *state = EngineState {
            config,
            index,
            llm,
            generation: report.generation,
        };
        log_rebuild(&report);
        Ok(report)
    }

    /// Release database connections.
    pub async fn close(&self) {
        self.read().await.index.close().await;
    }
}

/// Keep using an embedding model chosen by a rebuild override for as long
/// as the configuration still names the model that rebuild replaced.
fn adopt_rebuilt_model(config: Config, location: &IndexLocation) -> Result<Config> {
    let RegistryRead::Found(registry) = Registry::read(&location.persist_dir) else {
        return Ok(config);
    };
    if registry.embedding_model == config.embedding.model
        || registry.configured_model.as_deref() != Some(config.embedding.model.as_str())
    {
        return Ok(config);
    }
    tracing::info!(
        configured = %config.embedding.model,
        index = %registry.embedding_model,
        "using the embedding model the index was rebuilt with"
    );
    config.with_overrides(&ModelOverrides {
        embedding_model: Some(registry.embedding_model),
        ..Default::default()
    })
}

/// Scan and embed everything for `config` into the staging location.
async fn stage(
    config: &Config,
    configured_model: &str,
    factory: &dyn ModelFactory,
    reporter: &dyn SyncReporter,
) -> Result<Staged> {
    let scan = DocumentSource::new(&config.index)?.scan()?;
    if scan.documents.is_empty() {
        return Err(NexusError::EmptyCorpus);
    }
    reporter.report(SyncEvent::Scanned {
        files: scan.documents.len() as u64,
    });
    let unreadable = scan_failures(&scan.failures);
    report_failures(&unreadable, reporter);

    let embedder = factory.embedder(&config.embedding)?;
    let llm = factory.language_model(&config.llm)?;

    let staging = sibling(&IndexLocation::from_config(config), STAGING_SUFFIX);
    staging.remove()?;

    let index = match IndexStore::load_or_create(staging.clone(), embedder.clone(), config.chunking.params())
        .await?
    {
        LoadOutcome::Absent(index) => index,
        LoadOutcome::Loaded(index) => {
            index.close().await;
            return Err(NexusError::persistence("staging index was not empty"));
        }
        LoadOutcome::Corrupt { reason } => {
            return Err(NexusError::persistence(format!("staging index: {}", reason)))
        }
    };
    if config.embedding.model != configured_model {
        index
            .set_configured_model(Some(configured_model.to_string()))
            .await;
    }

    let outcome = index.build_from_scratch(&scan.documents).await;
    index.close().await;
    let mut outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            let _ = staging.remove();
            remove_sibling_dirs(&staging);
            return Err(e);
        }
    };
    report_build(&outcome, reporter);
    outcome.failed.extend(unreadable);

    Ok(Staged {
        location: staging,
        embedder,
        llm,
        outcome,
    })
}

/// Move the index at `staging` into `live` and open it.
///
/// Whatever `live` held is set aside first and put back if the new index
/// cannot be moved in or opened. No store may have `live` open.
async fn install(
    staging: &IndexLocation,
    live: &IndexLocation,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkParams,
) -> Result<IndexStore> {
    let backup = sibling(live, BACKUP_SUFFIX);
    backup.remove()?;
    if let Err(e) = live.move_to(&backup) {
        restore(live, &backup, false);
        return Err(e);
    }
    if let Err(e) = staging.move_to(live) {
        restore(live, &backup, true);
        return Err(e);
    }

    let opened = match IndexStore::load_or_create(live.clone(), embedder, chunking).await {
        Ok(LoadOutcome::Loaded(index)) => Ok(index),
        Ok(LoadOutcome::Absent(index)) => {
            index.close().await;
            Err(NexusError::persistence("rebuilt index vanished during swap"))
        }
        Ok(LoadOutcome::Corrupt { reason }) => {
            Err(NexusError::persistence(format!("rebuilt index: {}", reason)))
        }
        Err(e) => Err(e),
    };
    match opened {
        Ok(index) => {
            if let Err(e) = backup.remove() {
                tracing::warn!("could not remove previous index: {}", e);
            }
            remove_sibling_dirs(&backup);
            remove_sibling_dirs(staging);
            Ok(index)
        }
        Err(e) => {
            restore(live, &backup, true);
            Err(e)
        }
    }
}

/// Put the files set aside in `backup` back at `live`.
fn restore(live: &IndexLocation, backup: &IndexLocation, clear_live: bool) {
    if clear_live {
        if let Err(e) = live.remove() {
            tracing::error!("could not clear {}: {}", live.persist_dir.display(), e);
        }
    }
    match backup.move_to(live) {
        Ok(()) => remove_sibling_dirs(backup),
        Err(e) => tracing::error!(
            "could not restore the previous index from {}: {}",
            backup.persist_dir.display(),
            e
        ),
    }
}

fn rebuild_report(outcome: UpsertOutcome, config: &Config, generation: u64) -> RebuildReport {
    RebuildReport {
        indexed: outcome.updated.len(),
        failed: outcome.failed,
        embedding_model: config.embedding.model.clone(),
        llm_model: config.llm.model.clone(),
        generation,
    }
}

fn log_rebuild(report: &RebuildReport) {
    tracing::info!(
        indexed = report.indexed,
        failed = report.failed.len(),
        embedding_model = %report.embedding_model,
        llm_model = %report.llm_model,
        "rebuild complete"
    );
}

fn scan_failures(failures: &[ScanFailure]) -> Vec<(String, String)> {
    failures
        .iter()
        .map(|f| (f.path.clone(), f.reason.clone()))
        .collect()
}

fn report_build(outcome: &UpsertOutcome, reporter: &dyn SyncReporter) {
    for identity in &outcome.updated {
        reporter.report(SyncEvent::Document {
            identity: identity.clone(),
            transition: Transition::Added,
        });
    }
    report_failures(&outcome.failed, reporter);
}

fn report_failures(failed: &[(String, String)], reporter: &dyn SyncReporter) {
    for (identity, reason) in failed {
        reporter.report(SyncEvent::Document {
            identity: identity.clone(),
            transition: Transition::Failed(reason.clone()),
        });
    }
}

/// Sibling directories of the live ones, e.g. `index_storage.rebuild/`.
fn sibling(live: &IndexLocation, suffix: &str) -> IndexLocation {
    let persist_dir = with_suffix(&live.persist_dir, suffix);
    let vector_db_path = match (live.vector_db_path.parent(), live.vector_db_path.file_name()) {
        (Some(dir), Some(name)) => with_suffix(dir, suffix).join(name),
        _ => with_suffix(&live.vector_db_path, suffix),
    };
    IndexLocation {
        persist_dir,
        vector_db_path,
    }
}

fn with_suffix(path: &std::path::Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_sibling_dirs(location: &IndexLocation) {
    let mut dirs = BTreeSet::new();
    dirs.insert(location.persist_dir.clone());
    if let Some(parent) = location.vector_db_path.parent() {
        dirs.insert(parent.to_path_buf());
    }
    for dir in dirs {
        // Only succeeds when empty; anything else stays for inspection.
        let _ = std::fs::remove_dir(dir);
    }
}
