//! Replication of changed mirrors to secondary storage targets
//!
//! Targets are removable drives; each one is revalidated on every run and an
//! unplugged drive is a recorded warning, not a failure. Targets are synced
//! strictly one at a time so a drive removal mid-run cannot interleave with
//! writes to another target. Tree mirroring uses `rsync -a --delete` for
//! exact-mirror semantics: files absent from the source are deleted at the
//! destination.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::mirror::MirrorStore;

const MIRRORS_DIR: &str = "mirrors";
const CHECKOUTS_DIR: &str = "checkouts";

/// A removable or secondary storage location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationTarget {
    pub mount_path: PathBuf,
}

impl ReplicationTarget {
    pub fn new(mount_path: PathBuf) -> Self {
        Self { mount_path }
    }

    /// Drives come and go; validity is rechecked on every run
    pub fn is_mounted(&self) -> bool {
        self.mount_path.is_dir()
    }
}

/// Per-target replication failures. The remaining targets are still tried.
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("mirror sync to {dest} failed: {reason}")]
    MirrorSync { dest: PathBuf, reason: String },
    #[error("working tree sync to {dest} failed: {reason}")]
    WorkingTreeSync { dest: PathBuf, reason: String },
    #[error("working tree checkout failed: {reason}")]
    Checkout { reason: String },
}

/// Outcome of replicating one repository across all configured targets
#[derive(Debug, Default)]
pub struct ReplicationReport {
    successes: usize,
    pub skipped_unmounted: Vec<PathBuf>,
    pub per_target_errors: Vec<(PathBuf, ReplicationError)>,
}

impl ReplicationReport {
    /// At least one target received a complete copy. The run treats this as
    /// success for the repository even if other targets failed.
    pub fn any_target_succeeded(&self) -> bool {
        self.successes > 0
    }
}

/// Pushes mirrors (and optionally working trees) to every configured target
pub struct Replicator {
    namespace: String,
    targets: Vec<ReplicationTarget>,
}

impl Replicator {
    pub fn new(namespace: String, targets: Vec<ReplicationTarget>) -> Self {
        Self { namespace, targets }
    }

    pub fn targets(&self) -> &[ReplicationTarget] {
        &self.targets
    }

    /// Replicate one repository to every target, strictly sequentially.
    ///
    /// The working tree, when requested, is checked out lazily on first need
    /// and reused across targets; the caller removes it after the repository
    /// is done.
    pub async fn replicate(
        &self,
        name: &str,
        store: &MirrorStore,
        want_working_tree: bool,
    ) -> ReplicationReport {
        let mut report = ReplicationReport::default();
        let mirror_path = store.mirror_path(name);
        let mut working_tree: Option<PathBuf> = None;

        for target in &self.targets {
            if !target.is_mounted() {
                warn!(
                    "Target {} is not mounted, skipping",
                    target.mount_path.display()
                );
                report.skipped_unmounted.push(target.mount_path.clone());
                continue;
            }

            let mirror_dest = target
                .mount_path
                .join(&self.namespace)
                .join(MIRRORS_DIR)
                .join(format!("{}.git", name));

            if let Err(reason) = sync_tree(&mirror_path, &mirror_dest).await {
                warn!(
                    "Mirror sync failed for {} -> {}: {}",
                    name,
                    mirror_dest.display(),
                    reason
                );
                report.per_target_errors.push((
                    target.mount_path.clone(),
                    ReplicationError::MirrorSync {
                        dest: mirror_dest,
                        reason,
                    },
                ));
                continue;
            }

            if want_working_tree {
                // Checkout once per run, shared by all targets.
                if working_tree.is_none() {
                    match store.checkout_working_tree(name).await {
                        Ok(path) => working_tree = Some(path),
                        Err(e) => {
                            report.per_target_errors.push((
                                target.mount_path.clone(),
                                ReplicationError::Checkout {
                                    reason: e.to_string(),
                                },
                            ));
                            continue;
                        }
                    }
                }

                let Some(tree) = working_tree.as_deref() else {
                    continue;
                };
                let tree_dest = target
                    .mount_path
                    .join(&self.namespace)
                    .join(CHECKOUTS_DIR)
                    .join(name);

                if let Err(reason) = sync_tree(tree, &tree_dest).await {
                    warn!(
                        "Working tree sync failed for {} -> {}: {}",
                        name,
                        tree_dest.display(),
                        reason
                    );
                    report.per_target_errors.push((
                        target.mount_path.clone(),
                        ReplicationError::WorkingTreeSync {
                            dest: tree_dest,
                            reason,
                        },
                    ));
                    continue;
                }
            }

            debug!("Replicated {} to {}", name, target.mount_path.display());
            report.successes += 1;
        }

        info!(
            "Replication of {}: {} target(s) succeeded, {} failed, {} unmounted",
            name,
            report.successes,
            report.per_target_errors.len(),
            report.skipped_unmounted.len()
        );

        report
    }
}

/// Mirror `source` into `dest` with exact-mirror semantics
async fn sync_tree(source: &Path, dest: &Path) -> Result<(), String> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create destination directory: {}", e))?;
    }

    // Trailing slash: sync the contents of source into dest, not source
    // itself as a subdirectory.
    let source_arg = format!("{}/", source.display());

    let output = Command::new("rsync")
        .arg("-a")
        .arg("--delete")
        .arg(&source_arg)
        .arg(dest)
        .output()
        .await
        .map_err(|e| format!("failed to execute rsync: {}", e))?;

    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::binary_available;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_target_mount_detection() {
        let temp = TempDir::new().unwrap();

        let mounted = ReplicationTarget::new(temp.path().to_path_buf());
        assert!(mounted.is_mounted());

        let unmounted = ReplicationTarget::new(temp.path().join("not-plugged-in"));
        assert!(!unmounted.is_mounted());
    }

    #[test]
    fn test_report_success_accounting() {
        let mut report = ReplicationReport::default();
        assert!(!report.any_target_succeeded());

        report.per_target_errors.push((
            PathBuf::from("/mnt/a"),
            ReplicationError::MirrorSync {
                dest: PathBuf::from("/mnt/a/x"),
                reason: "disk full".to_string(),
            },
        ));
        assert!(!report.any_target_succeeded());

        report.successes += 1;
        assert!(report.any_target_succeeded());
    }

    #[tokio::test]
    async fn test_unmounted_targets_are_skipped_not_failed() {
        let temp = TempDir::new().unwrap();
        let store = MirrorStore::new(
            temp.path().join("mirrors"),
            temp.path().join("scratch"),
            Duration::from_secs(30),
        );

        let replicator = Replicator::new(
            "repovault".to_string(),
            vec![ReplicationTarget::new(temp.path().join("gone"))],
        );

        let report = replicator.replicate("repo", &store, false).await;
        assert!(!report.any_target_succeeded());
        assert!(report.per_target_errors.is_empty());
        assert_eq!(report.skipped_unmounted.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_tree_is_an_exact_mirror() {
        if !binary_available("rsync") {
            eprintln!("rsync not available, skipping");
            return;
        }

        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        let dest = temp.path().join("dest");

        std::fs::create_dir_all(source.join("sub")).unwrap();
        std::fs::write(source.join("a.txt"), "alpha").unwrap();
        std::fs::write(source.join("sub/b.txt"), "beta").unwrap();

        sync_tree(&source, &dest).await.expect("first sync failed");
        assert_eq!(std::fs::read_to_string(dest.join("a.txt")).unwrap(), "alpha");
        assert_eq!(
            std::fs::read_to_string(dest.join("sub/b.txt")).unwrap(),
            "beta"
        );

        // Stale destination files are deleted on the next sync
        std::fs::write(dest.join("stale.txt"), "old").unwrap();
        std::fs::remove_file(source.join("a.txt")).unwrap();

        sync_tree(&source, &dest).await.expect("second sync failed");
        assert!(!dest.join("stale.txt").exists());
        assert!(!dest.join("a.txt").exists());
        assert!(dest.join("sub/b.txt").exists());

        // Idempotent: syncing again with no changes leaves identical contents
        sync_tree(&source, &dest).await.expect("third sync failed");
        assert_eq!(
            std::fs::read_to_string(dest.join("sub/b.txt")).unwrap(),
            "beta"
        );
    }
}
