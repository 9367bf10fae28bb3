//! Shared helpers for integration tests
//!
//! Builds small upstream git repositories on disk so runs can exercise the
//! real clone/fetch/replicate pipeline without any network access.

use async_trait::async_trait;
use repovault::github::ListError;
use repovault::{Config, RepoLister, RepoRef};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Skip guard: the pipeline tests need the real git and rsync binaries
pub fn have_binaries() -> bool {
    ["git", "rsync"].iter().all(|bin| {
        Command::new("which")
            .arg(bin)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    })
}

/// Run git in `dir`, panicking on failure
pub fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=Test User",
            "-c",
            "user.email=test@example.com",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to execute git");

    assert!(
        output.status.success(),
        "git {:?} failed in {}: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Create an upstream repository with one initial commit
pub fn init_upstream(root: &Path, name: &str) -> PathBuf {
    let path = root.join(name);
    std::fs::create_dir_all(&path).expect("Failed to create upstream dir");

    git(&path, &["init"]);
    git(&path, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    commit_file(&path, "README.md", "initial", "initial commit");

    path
}

/// Add a file and commit it
pub fn commit_file(repo: &Path, file: &str, content: &str, message: &str) {
    std::fs::write(repo.join(file), content).expect("Failed to write file");
    git(repo, &["add", "."]);
    git(repo, &["commit", "-m", message]);
}

/// Canned repository listing for driving runs without a network
pub struct StaticLister {
    pub repos: Vec<RepoRef>,
}

#[async_trait]
impl RepoLister for StaticLister {
    async fn list(&self) -> Result<Vec<RepoRef>, ListError> {
        Ok(self.repos.clone())
    }
}

/// A `RepoRef` pointing at a local upstream directory
pub fn local_repo(upstream: &Path) -> RepoRef {
    RepoRef {
        name: upstream
            .file_name()
            .expect("upstream path has no name")
            .to_string_lossy()
            .to_string(),
        clone_url: upstream.display().to_string(),
    }
}

/// Minimal valid config rooted in a temp directory with one target
pub fn test_config(temp: &TempDir, targets: &[&Path]) -> Config {
    let mut config = Config::default();
    config.github.account = "octocat".to_string();
    config.storage.master_root = temp.path().join("mirrors").display().to_string();
    config.storage.scratch_root = temp.path().join("scratch").display().to_string();
    config.storage.targets = targets.iter().map(|t| t.display().to_string()).collect();
    config.run.lock_file = temp.path().join("run.lock").display().to_string();
    config
}
