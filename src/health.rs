//! System health checks for RepoVault
//!
//! Pre-flight checks verifying the external tools and storage locations a
//! backup run depends on.

use crate::Config;
use std::path::Path;
use std::process::Command;

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Git installation status
    pub git: CheckResult,
    /// Rsync installation status
    pub rsync: CheckResult,
    /// Master store directory status
    pub master_store: CheckResult,
    /// API credential status (warning only, unauthenticated listing works)
    pub credential: CheckResult,
    /// Replication target mount status (warning only, drives are removable)
    pub targets: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

#[allow(dead_code)]
impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: true,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

/// Check if a command is available in PATH
pub fn binary_available(command: &str) -> bool {
    Command::new("which")
        .arg(command)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

impl HealthCheck {
    /// Run all health checks
    pub fn run(config: &Config) -> Self {
        Self {
            git: Self::check_binary("git"),
            rsync: Self::check_binary("rsync"),
            master_store: Self::check_master_store(config),
            credential: Self::check_credential(config),
            targets: Self::check_targets(config),
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.git.passed && self.rsync.passed && self.master_store.passed
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| r.is_warning)
            .collect()
    }

    /// All checks with display names, in report order
    pub fn all_checks(&self) -> Vec<(&'static str, &CheckResult)> {
        vec![
            ("Git", &self.git),
            ("Rsync", &self.rsync),
            ("Master store", &self.master_store),
            ("API credential", &self.credential),
            ("Replication targets", &self.targets),
        ]
    }

    fn check_binary(name: &str) -> CheckResult {
        if binary_available(name) {
            CheckResult::ok(format!("{} is installed", name))
        } else {
            CheckResult::error_with_details(
                format!("{} is not installed", name),
                format!("Install {} and make sure it is in PATH", name),
            )
        }
    }

    fn check_master_store(config: &Config) -> CheckResult {
        let root = config.master_root();

        if root.exists() {
            if is_writable(&root) {
                CheckResult::ok(format!("Master store exists: {}", root.display()))
            } else {
                CheckResult::error(format!("Master store is not writable: {}", root.display()))
            }
        } else {
            // Created on first run; only the parent needs to be usable
            match root.parent() {
                Some(parent) if parent.exists() || parent.as_os_str().is_empty() => {
                    CheckResult::ok(format!(
                        "Master store will be created at: {}",
                        root.display()
                    ))
                }
                _ => CheckResult::warning_with_details(
                    format!("Master store parent does not exist: {}", root.display()),
                    "It will be created on the first run if permissions allow",
                ),
            }
        }
    }

    fn check_credential(config: &Config) -> CheckResult {
        if config.resolve_token().is_some() {
            CheckResult::ok("API credential configured")
        } else {
            CheckResult::warning_with_details(
                "No API credential configured",
                "Unauthenticated requests have a lower rate ceiling; set github.token or GITHUB_TOKEN",
            )
        }
    }

    fn check_targets(config: &Config) -> CheckResult {
        let targets = config.target_paths();
        if targets.is_empty() {
            return CheckResult::error("No replication targets configured");
        }

        let unmounted: Vec<String> = targets
            .iter()
            .filter(|t| !t.is_dir())
            .map(|t| t.display().to_string())
            .collect();

        if unmounted.is_empty() {
            CheckResult::ok(format!("All {} target(s) mounted", targets.len()))
        } else {
            CheckResult::warning_with_details(
                format!(
                    "{} of {} target(s) not currently mounted",
                    unmounted.len(),
                    targets.len()
                ),
                unmounted.join("\n"),
            )
        }
    }
}

fn is_writable(path: &Path) -> bool {
    let probe = path.join(".repovault-write-probe");
    match std::fs::write(&probe, b"") {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}
