//! Repository listing via the GitHub API
//!
//! The lister is the only network collaborator besides git itself. It is kept
//! behind the [`RepoLister`] trait so the orchestrator can be exercised with a
//! canned repository set in tests.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;

const PER_PAGE: usize = 100;

/// A repository as the backup run sees it. Immutable once listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    /// Unique name, derived from the clone URL
    pub name: String,
    /// Full clone URL
    pub clone_url: String,
}

impl RepoRef {
    /// Derive a repository name from its clone URL: the final path segment
    /// with any `.git` suffix removed.
    pub fn from_clone_url(clone_url: &str) -> Option<Self> {
        let trimmed = clone_url.trim_end_matches('/');
        let last = trimmed.rsplit(&['/', ':'][..]).next()?;
        let name = last.trim_end_matches(".git");
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            clone_url: clone_url.to_string(),
        })
    }
}

/// Listing failures abort the run: without a repository set there is nothing
/// to back up.
#[derive(Debug, Error)]
pub enum ListError {
    #[error("transport error while listing repositories: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("listing API returned HTTP {status} for {url}")]
    Status { status: u16, url: String },
}

/// Trait for repository listing backends
#[async_trait]
pub trait RepoLister: Send + Sync {
    /// List all repositories the run should back up. An empty result is not
    /// an error; the run reports "nothing to do".
    async fn list(&self) -> Result<Vec<RepoRef>, ListError>;
}

/// Subset of the GitHub repository object the lister needs
#[derive(Debug, Deserialize)]
struct ApiRepo {
    name: String,
    clone_url: String,
    #[serde(default)]
    fork: bool,
}

/// GitHub API lister with optional bearer credential
pub struct GitHubLister {
    http: reqwest::Client,
    api_url: String,
    account: String,
    token: Option<String>,
    exclude_patterns: Vec<String>,
    include_forks: bool,
}

impl GitHubLister {
    pub fn new(config: &Config) -> Self {
        let token = config.resolve_token();
        if token.is_none() {
            warn!("No API token configured; unauthenticated requests have a lower rate ceiling");
        }

        Self {
            http: reqwest::Client::new(),
            api_url: config.github.api_url.trim_end_matches('/').to_string(),
            account: config.github.account.clone(),
            token,
            exclude_patterns: config.github.exclude_patterns.clone(),
            include_forks: config.github.include_forks,
        }
    }

    async fn fetch_page(&self, page: usize) -> Result<Vec<ApiRepo>, ListError> {
        let url = format!(
            "{}/users/{}/repos?per_page={}&page={}",
            self.api_url, self.account, PER_PAGE, page
        );
        debug!("Fetching repository page: {}", url);

        let mut request = self
            .http
            .get(&url)
            .header("User-Agent", "repovault")
            .header("Accept", "application/vnd.github+json");

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ListError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        Ok(response.json::<Vec<ApiRepo>>().await?)
    }
}

#[async_trait]
impl RepoLister for GitHubLister {
    async fn list(&self) -> Result<Vec<RepoRef>, ListError> {
        let mut repos = Vec::new();
        let mut page = 1usize;

        // Fetch every page; silent truncation would be a data-loss bug.
        loop {
            let page_repos = self.fetch_page(page).await?;
            let page_len = page_repos.len();

            for repo in page_repos {
                if repo.fork && !self.include_forks {
                    debug!("Excluding fork repository: {}", repo.name);
                    continue;
                }
                if matches_exclusion_pattern(&repo.name, &self.exclude_patterns) {
                    debug!("Excluding repository due to pattern match: {}", repo.name);
                    continue;
                }
                match RepoRef::from_clone_url(&repo.clone_url) {
                    Some(repo_ref) => repos.push(repo_ref),
                    None => warn!(
                        "Skipping repository with unusable clone URL: {}",
                        repo.clone_url
                    ),
                }
            }

            if page_len < PER_PAGE {
                break;
            }
            page += 1;
        }

        info!("Found {} repositories for {}", repos.len(), self.account);
        Ok(repos)
    }
}

/// Check if a repository name matches any exclusion pattern
fn matches_exclusion_pattern(name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        // Simple glob pattern matching
        if pattern.contains('*') {
            let pattern_regex = pattern.replace('.', r"\.").replace('*', ".*");

            regex::Regex::new(&format!("^{}$", pattern_regex))
                .map(|re| re.is_match(name))
                .unwrap_or(false)
        } else {
            name == pattern
        }
    })
}
