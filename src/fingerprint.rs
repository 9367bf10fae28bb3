//! Change detection over a mirror's reference set
//!
//! A fingerprint is a SHA-256 digest over the sorted set of
//! `(reference, commit-id)` pairs a mirror holds. Two fingerprints are equal
//! iff the reference sets are identical, which lets a run skip replication
//! for unchanged repositories without comparing any file contents.
//!
//! Classification is deliberately conservative: replicating when nothing
//! changed is acceptable, skipping a real change is not. Any ambiguity
//! resolves toward `Changed`.

use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;

/// Digest of a mirror's reference set at a point in time.
///
/// `Unknown` records that a fingerprint could not be computed; it compares
/// equal to nothing, so it always classifies as changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    Digest(String),
    Unknown,
}

/// Outcome of a mirror update, derived from fingerprint comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// First encounter of this repository
    New,
    /// Reference set differs from the previous run, or equality could not
    /// be proven
    Changed,
    /// Reference set is identical to the pre-update fingerprint
    Unchanged,
    /// Post-update fingerprint could not be computed
    Failed,
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("git show-ref failed in {path}: {stderr}")]
    ShowRef { path: String, stderr: String },
    #[error("failed to run git in {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Compute the digest for an ordered sequence of `(reference, commit-id)`
/// pairs. The pairs are sorted by reference name, so the digest is stable
/// regardless of enumeration order.
pub fn digest_refs(pairs: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = pairs.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (reference, commit) in sorted {
        hasher.update(commit.as_bytes());
        hasher.update(b" ");
        hasher.update(reference.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Fingerprint the reference set of the mirror at `mirror_path`
pub async fn fingerprint(mirror_path: &Path) -> Result<Fingerprint, DetectError> {
    let output = Command::new("git")
        .args(["show-ref"])
        .current_dir(mirror_path)
        .output()
        .await
        .map_err(|source| DetectError::Spawn {
            path: mirror_path.display().to_string(),
            source,
        })?;

    // show-ref exits 1 with no output for a repository with no refs; that
    // is a valid (empty) reference set, not a failure.
    if !output.status.success() && !(output.stdout.is_empty() && output.stderr.is_empty()) {
        return Err(DetectError::ShowRef {
            path: mirror_path.display().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let pairs: Vec<(String, String)> = stdout
        .lines()
        .filter_map(|line| {
            let (commit, reference) = line.split_once(' ')?;
            Some((reference.to_string(), commit.to_string()))
        })
        .collect();

    Ok(Fingerprint::Digest(digest_refs(&pairs)))
}

/// Classify a mirror update by comparing fingerprints.
///
/// A first clone is always `New` regardless of fingerprint comparability.
/// An uncomputable post-update fingerprint is `Failed`, never silently
/// treated as equal.
pub fn classify(
    before: Option<&Fingerprint>,
    after: &Result<Fingerprint, DetectError>,
    was_new: bool,
) -> UpdateOutcome {
    if was_new {
        return UpdateOutcome::New;
    }

    let after = match after {
        Ok(fp) => fp,
        Err(_) => return UpdateOutcome::Failed,
    };

    match (before, after) {
        (Some(Fingerprint::Digest(b)), Fingerprint::Digest(a)) if b == a => {
            UpdateOutcome::Unchanged
        }
        // Absent or unknown pre-update fingerprint: cannot prove equality
        _ => UpdateOutcome::Changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(r, c)| (r.to_string(), c.to_string()))
            .collect()
    }

    fn spawn_error() -> DetectError {
        DetectError::Spawn {
            path: "/nowhere".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "git missing"),
        }
    }

    #[test]
    fn test_digest_is_order_insensitive() {
        let a = digest_refs(&refs(&[
            ("refs/heads/main", "aaaa"),
            ("refs/tags/v1", "bbbb"),
        ]));
        let b = digest_refs(&refs(&[
            ("refs/tags/v1", "bbbb"),
            ("refs/heads/main", "aaaa"),
        ]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_digest_distinguishes_ref_sets() {
        let base = digest_refs(&refs(&[("refs/heads/main", "aaaa")]));

        // Different commit
        let moved = digest_refs(&refs(&[("refs/heads/main", "bbbb")]));
        assert_ne!(base, moved);

        // Extra ref
        let extra = digest_refs(&refs(&[
            ("refs/heads/main", "aaaa"),
            ("refs/tags/v1", "aaaa"),
        ]));
        assert_ne!(base, extra);

        // Empty set has its own stable digest
        let empty = digest_refs(&[]);
        assert_eq!(empty, digest_refs(&[]));
        assert_ne!(empty, base);
    }

    #[test]
    fn test_classify_new_wins_over_everything() {
        let fp = Fingerprint::Digest("abc".to_string());
        assert_eq!(
            classify(Some(&fp), &Ok(fp.clone()), true),
            UpdateOutcome::New
        );
        assert_eq!(classify(None, &Err(spawn_error()), true), UpdateOutcome::New);
    }

    #[test]
    fn test_classify_failed_after() {
        let fp = Fingerprint::Digest("abc".to_string());
        assert_eq!(
            classify(Some(&fp), &Err(spawn_error()), false),
            UpdateOutcome::Failed
        );
    }

    #[test]
    fn test_classify_missing_or_unknown_before_is_changed() {
        let after = Ok(Fingerprint::Digest("abc".to_string()));
        assert_eq!(classify(None, &after, false), UpdateOutcome::Changed);
        assert_eq!(
            classify(Some(&Fingerprint::Unknown), &after, false),
            UpdateOutcome::Changed
        );
    }

    #[test]
    fn test_classify_equal_digests_is_unchanged() {
        let before = Fingerprint::Digest("abc".to_string());
        let after = Ok(Fingerprint::Digest("abc".to_string()));
        assert_eq!(classify(Some(&before), &after, false), UpdateOutcome::Unchanged);
    }

    #[test]
    fn test_classify_different_digests_is_changed() {
        let before = Fingerprint::Digest("abc".to_string());
        let after = Ok(Fingerprint::Digest("def".to_string()));
        assert_eq!(classify(Some(&before), &after, false), UpdateOutcome::Changed);
    }
}
