//! The durable master store of bare repository mirrors
//!
//! One bare mirror per repository lives at `<master_root>/<name>.git`. The
//! store is the source of truth across runs: it is created on first
//! encounter, updated in place with pruning fetches afterwards, and never
//! deleted by the core. A crashed run simply re-detects state from the store
//! on the next invocation.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::fingerprint::Fingerprint;
use crate::github::RepoRef;

/// Per-repository mirror failures. These are recovered by skipping the
/// repository and continuing the batch.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("clone failed for {name}: {reason}")]
    CloneFailed { name: String, reason: String },
    #[error("fetch failed for {name}: {reason}")]
    FetchFailed { name: String, reason: String },
}

/// Owns the master mirror directory and the scratch space for working trees
pub struct MirrorStore {
    master_root: PathBuf,
    scratch_root: PathBuf,
    network_timeout: Duration,
}

impl MirrorStore {
    pub fn new(master_root: PathBuf, scratch_root: PathBuf, network_timeout: Duration) -> Self {
        Self {
            master_root,
            scratch_root,
            network_timeout,
        }
    }

    pub fn master_root(&self) -> &Path {
        &self.master_root
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Deterministic mirror path for a repository name
    pub fn mirror_path(&self, name: &str) -> PathBuf {
        self.master_root.join(format!("{}.git", name))
    }

    fn working_tree_path(&self, name: &str) -> PathBuf {
        self.scratch_root.join(name)
    }

    /// Marker holding the fingerprint of the last replicated state. It sits
    /// beside the mirror directory so target syncs never carry it along.
    fn fingerprint_path(&self, name: &str) -> PathBuf {
        self.master_root.join(format!("{}.fingerprint", name))
    }

    /// Fingerprint of the last state that actually reached a target.
    ///
    /// A missing marker means the mirror has never been replicated; an
    /// unreadable one is `Unknown`. Either way the repository classifies as
    /// changed on the next run.
    pub async fn recorded_fingerprint(&self, name: &str) -> Option<Fingerprint> {
        let path = self.fingerprint_path(name);
        if !path.exists() {
            return None;
        }

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let digest = content.trim();
                if digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()) {
                    Some(Fingerprint::Digest(digest.to_string()))
                } else {
                    warn!(
                        "Fingerprint marker {} is unreadable, treating as unknown",
                        path.display()
                    );
                    Some(Fingerprint::Unknown)
                }
            }
            Err(e) => {
                warn!(
                    "Failed to read fingerprint marker {}: {}",
                    path.display(),
                    e
                );
                Some(Fingerprint::Unknown)
            }
        }
    }

    /// Record the replicated fingerprint for `name`. Only a real digest is
    /// persisted; failure to record is not fatal, the repository just
    /// re-replicates on the next run.
    pub async fn record_fingerprint(&self, name: &str, fingerprint: &Fingerprint) {
        let Fingerprint::Digest(digest) = fingerprint else {
            return;
        };

        let path = self.fingerprint_path(name);
        if let Err(e) = tokio::fs::write(&path, format!("{}\n", digest)).await {
            warn!(
                "Failed to record fingerprint marker {}: {}",
                path.display(),
                e
            );
        }
    }

    /// Check whether a mirror already exists for this name
    pub fn mirror_exists(&self, name: &str) -> bool {
        self.mirror_path(name).join("HEAD").exists()
    }

    /// Create or update the mirror for `repo`.
    ///
    /// Returns whether a mirror existed before the call, along with the
    /// operation result. A failed first clone removes its target directory so
    /// a later run cannot mistake the leftovers for a valid mirror; a failed
    /// fetch leaves the existing mirror untouched.
    pub async fn ensure_mirror(&self, repo: &RepoRef) -> (bool, Result<(), MirrorError>) {
        let existed = self.mirror_exists(&repo.name);
        let result = if existed {
            self.fetch_mirror(repo).await
        } else {
            self.clone_mirror(repo).await
        };
        (existed, result)
    }

    async fn clone_mirror(&self, repo: &RepoRef) -> Result<(), MirrorError> {
        let path = self.mirror_path(&repo.name);
        info!("Cloning mirror: {} -> {}", repo.clone_url, path.display());

        if let Err(e) = tokio::fs::create_dir_all(&self.master_root).await {
            return Err(MirrorError::CloneFailed {
                name: repo.name.clone(),
                reason: format!("failed to create master store directory: {}", e),
            });
        }

        let run = self
            .run_git(
                &["clone", "--mirror", repo.clone_url.as_str()],
                Some(&path),
                &self.master_root,
            )
            .await;

        if let Err(reason) = run {
            // Do not leave a half-created mirror behind.
            if path.exists() {
                if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                    warn!(
                        "Failed to remove partial clone at {}: {}",
                        path.display(),
                        e
                    );
                }
            }
            return Err(MirrorError::CloneFailed {
                name: repo.name.clone(),
                reason,
            });
        }

        Ok(())
    }

    async fn fetch_mirror(&self, repo: &RepoRef) -> Result<(), MirrorError> {
        let path = self.mirror_path(&repo.name);
        debug!("Fetching mirror: {}", path.display());

        self.run_git(&["fetch", "--prune"], None, &path)
            .await
            .map_err(|reason| MirrorError::FetchFailed {
                name: repo.name.clone(),
                reason,
            })
    }

    /// Run a git command with the network timeout, returning stderr text on
    /// failure
    async fn run_git(
        &self,
        args: &[&str],
        extra_path: Option<&Path>,
        cwd: &Path,
    ) -> Result<(), String> {
        let mut command = Command::new("git");
        command.args(args);
        if let Some(path) = extra_path {
            command.arg(path);
        }
        command.current_dir(cwd);
        command.kill_on_drop(true);

        let output = match timeout(self.network_timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(format!("failed to execute git: {}", e)),
            Err(_) => {
                return Err(format!(
                    "timed out after {}s",
                    self.network_timeout.as_secs()
                ))
            }
        };

        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }
        Ok(())
    }

    /// Materialize a working tree for `name` in scratch space, reusing one
    /// checked out earlier in the same run.
    pub async fn checkout_working_tree(&self, name: &str) -> Result<PathBuf> {
        let tree_path = self.working_tree_path(name);
        if tree_path.join(".git").exists() {
            debug!("Reusing working tree: {}", tree_path.display());
            return Ok(tree_path);
        }

        tokio::fs::create_dir_all(&self.scratch_root)
            .await
            .context("Failed to create scratch directory")?;

        let mirror = self.mirror_path(name);
        info!("Checking out working tree: {}", tree_path.display());

        let output = Command::new("git")
            .arg("clone")
            .arg(&mirror)
            .arg(&tree_path)
            .output()
            .await
            .context("Failed to execute git clone for working tree")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("working tree checkout failed for {}: {}", name, stderr.trim());
        }

        Ok(tree_path)
    }

    /// Remove the scratch working tree for `name`, if any
    pub async fn remove_working_tree(&self, name: &str) {
        let tree_path = self.working_tree_path(name);
        if tree_path.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&tree_path).await {
                warn!(
                    "Failed to remove working tree {}: {}",
                    tree_path.display(),
                    e
                );
            }
        }
    }

    /// Remove the scratch root entirely. The master store is exempt from any
    /// cleanup.
    pub async fn cleanup_scratch(&self) {
        if self.scratch_root.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&self.scratch_root).await {
                warn!(
                    "Failed to remove scratch root {}: {}",
                    self.scratch_root.display(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> MirrorStore {
        MirrorStore::new(
            temp.path().join("mirrors"),
            temp.path().join("scratch"),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_mirror_path_is_deterministic() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let path = store.mirror_path("hello-world");
        assert_eq!(path, temp.path().join("mirrors").join("hello-world.git"));
        assert_eq!(path, store.mirror_path("hello-world"));
    }

    #[test]
    fn test_mirror_exists_requires_head() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        assert!(!store.mirror_exists("repo"));

        // A bare directory without HEAD is not a valid mirror
        std::fs::create_dir_all(store.mirror_path("repo")).unwrap();
        assert!(!store.mirror_exists("repo"));

        std::fs::write(store.mirror_path("repo").join("HEAD"), "ref: refs/heads/main\n").unwrap();
        assert!(store.mirror_exists("repo"));
    }

    #[tokio::test]
    async fn test_failed_clone_removes_target_directory() {
        if !crate::health::binary_available("git") {
            eprintln!("git not available, skipping");
            return;
        }

        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let repo = RepoRef {
            name: "ghost".to_string(),
            clone_url: temp.path().join("no-such-upstream").display().to_string(),
        };

        let (existed, result) = store.ensure_mirror(&repo).await;
        assert!(!existed);
        assert!(matches!(result, Err(MirrorError::CloneFailed { .. })));
        assert!(
            !store.mirror_path("ghost").exists(),
            "partial clone directory must be cleaned up"
        );
    }

    #[tokio::test]
    async fn test_fingerprint_marker_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        std::fs::create_dir_all(store.master_root()).unwrap();

        // No marker yet: never replicated
        assert!(store.recorded_fingerprint("repo").await.is_none());

        let digest = Fingerprint::Digest("ab".repeat(32));
        store.record_fingerprint("repo", &digest).await;
        assert_eq!(store.recorded_fingerprint("repo").await, Some(digest));

        // Unknown is never persisted
        store.record_fingerprint("other", &Fingerprint::Unknown).await;
        assert!(store.recorded_fingerprint("other").await.is_none());
    }

    #[tokio::test]
    async fn test_garbage_fingerprint_marker_reads_as_unknown() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        std::fs::create_dir_all(store.master_root()).unwrap();

        std::fs::write(
            temp.path().join("mirrors").join("repo.fingerprint"),
            "not a digest",
        )
        .unwrap();

        assert_eq!(
            store.recorded_fingerprint("repo").await,
            Some(Fingerprint::Unknown)
        );
    }

    #[tokio::test]
    async fn test_cleanup_scratch_leaves_master_store() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        std::fs::create_dir_all(store.master_root()).unwrap();
        std::fs::create_dir_all(store.scratch_root()).unwrap();
        std::fs::write(store.scratch_root().join("junk"), "x").unwrap();

        store.cleanup_scratch().await;

        assert!(!store.scratch_root().exists());
        assert!(store.master_root().exists());
    }
}
