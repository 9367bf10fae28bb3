//! The per-run orchestrator
//!
//! One run: acquire the lock, list repositories, then for each repository
//! update its mirror, classify the update, replicate if anything changed, and
//! clean up scratch state. A failing repository or target is counted and
//! logged but never aborts the batch; only configuration, listing, and lock
//! failures are fatal. The lock is scoped to the run and released on every
//! exit path.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::fingerprint::{classify, fingerprint, UpdateOutcome};
use crate::github::{RepoLister, RepoRef};
use crate::lock::RunLock;
use crate::mirror::MirrorStore;
use crate::replicate::{ReplicationTarget, Replicator};

/// Statistics for one completed run
#[derive(Debug, Clone)]
pub struct RunStats {
    pub total: usize,
    pub replicated: usize,
    pub skipped_unchanged: usize,
    pub failed: usize,
    pub duration: Duration,
    pub master_root: PathBuf,
    pub targets: Vec<PathBuf>,
}

/// Drives a single backup run from listing to final cleanup
pub struct BackupRun {
    config: Arc<Config>,
    lister: Box<dyn RepoLister>,
    store: MirrorStore,
    replicator: Replicator,
    stop_requested: Arc<AtomicBool>,
}

impl BackupRun {
    pub fn new(config: Config, lister: Box<dyn RepoLister>) -> Self {
        let config = Arc::new(config);

        let store = MirrorStore::new(
            config.master_root(),
            config.scratch_root(),
            Duration::from_secs(config.run.network_timeout),
        );

        let targets = config
            .target_paths()
            .into_iter()
            .map(ReplicationTarget::new)
            .collect();
        let replicator = Replicator::new(config.storage.namespace.clone(), targets);

        Self {
            config,
            lister,
            store,
            replicator,
            stop_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between repositories; setting it finishes the in-flight
    /// repository, then cleans up and releases the lock.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop_requested.clone()
    }

    /// Execute the full run. Per-repository failures are swallowed into the
    /// statistics; the returned error covers only fatal conditions (lock
    /// conflict, listing failure).
    pub async fn execute(&self) -> Result<RunStats> {
        let start = Instant::now();

        let _lock = RunLock::acquire(std::path::Path::new(&self.config.run.lock_file))?;

        info!(
            "Starting backup run for {} (master store: {})",
            self.config.github.account,
            self.store.master_root().display()
        );

        let repos = self
            .lister
            .list()
            .await
            .context("Failed to list repositories")?;

        let mut stats = RunStats {
            total: repos.len(),
            replicated: 0,
            skipped_unchanged: 0,
            failed: 0,
            duration: Duration::ZERO,
            master_root: self.store.master_root().to_path_buf(),
            targets: self
                .replicator
                .targets()
                .iter()
                .map(|t| t.mount_path.clone())
                .collect(),
        };

        if repos.is_empty() {
            info!("Account has no repositories, nothing to do");
        }

        for repo in &repos {
            if self.stop_requested.load(Ordering::SeqCst) {
                warn!("Stop requested, finishing run early");
                break;
            }

            match self.process_repository(repo).await {
                RepoResult::Replicated => stats.replicated += 1,
                RepoResult::Unchanged => stats.skipped_unchanged += 1,
                RepoResult::Failed => stats.failed += 1,
            }
        }

        // Working trees are never part of the durable store; the master
        // mirror directory is exempt from any cleanup.
        self.store.cleanup_scratch().await;

        stats.duration = start.elapsed();
        info!(
            "Run completed in {:.2}s: {} total, {} replicated, {} unchanged, {} failed",
            stats.duration.as_secs_f64(),
            stats.total,
            stats.replicated,
            stats.skipped_unchanged,
            stats.failed
        );

        Ok(stats)
    }

    async fn process_repository(&self, repo: &RepoRef) -> RepoResult {
        let mirror_path = self.store.mirror_path(&repo.name);

        // Compare against the last state that actually reached a target, not
        // the mirror itself: a repository that was fetched but never
        // replicated must stay changed until a target receives it.
        let before = if self.store.mirror_exists(&repo.name) {
            self.store.recorded_fingerprint(&repo.name).await
        } else {
            None
        };

        let (existed_before, update) = self.store.ensure_mirror(repo).await;
        if let Err(e) = update {
            warn!("Mirror update failed, skipping repository: {}", e);
            return RepoResult::Failed;
        }

        let after = fingerprint(&mirror_path).await;
        let outcome = classify(before.as_ref(), &after, !existed_before);
        debug!("Classified {} as {:?}", repo.name, outcome);

        match outcome {
            UpdateOutcome::Unchanged => {
                debug!("No change detected for {}, skipping replication", repo.name);
                RepoResult::Unchanged
            }
            UpdateOutcome::Failed => {
                if let Err(e) = &after {
                    warn!("Post-update fingerprint failed for {}: {}", repo.name, e);
                }
                RepoResult::Failed
            }
            UpdateOutcome::New | UpdateOutcome::Changed => {
                let report = self
                    .replicator
                    .replicate(&repo.name, &self.store, self.config.storage.working_copies)
                    .await;

                // Working tree cleanup happens per repository regardless of
                // replication outcome.
                self.store.remove_working_tree(&repo.name).await;

                if report.any_target_succeeded() {
                    if let Ok(fp) = &after {
                        self.store.record_fingerprint(&repo.name, fp).await;
                    }
                    RepoResult::Replicated
                } else {
                    warn!("No target received {}, counting as failed", repo.name);
                    RepoResult::Failed
                }
            }
        }
    }
}

enum RepoResult {
    Replicated,
    Unchanged,
    Failed,
}
