//! RepoVault - Incremental Git Repository Backup
//!
//! RepoVault backs up a user's remote repositories to local and removable
//! storage. Each run keeps a durable master store of bare mirrors up to date
//! with incremental fetches, detects change via reference fingerprints, and
//! replicates only changed repositories to the configured targets.
//!
//! ## Core Features
//!
//! - **GitHub Integration**: Automatic repository discovery via the GitHub API
//! - **Change Detection**: Reference-set fingerprinting skips unchanged repositories
//! - **Multi-Target Replication**: Best-effort mirroring to removable drives
//! - **Crash Safety**: PID-file run lock with stale-owner reclaim
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`github`]: Repository listing via the GitHub API
//! - [`mirror`]: The durable master store of bare mirrors
//! - [`fingerprint`]: Change detection over reference sets
//! - [`replicate`]: Replication to secondary storage targets
//! - [`runner`]: The per-run orchestrator

pub mod config;
pub mod fingerprint;
pub mod github;
pub mod health;
pub mod lock;
pub mod mirror;
pub mod replicate;
pub mod runner;

pub use config::Config;
pub use fingerprint::{classify, Fingerprint, UpdateOutcome};
pub use github::{GitHubLister, RepoLister, RepoRef};
pub use lock::RunLock;
pub use mirror::MirrorStore;
pub use replicate::{ReplicationReport, ReplicationTarget, Replicator};
pub use runner::{BackupRun, RunStats};
