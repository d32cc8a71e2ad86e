//! Contract and policy retrieval.
//!
//! Contracts load from the local filesystem or from a Git host; policy
//! modules load from a local directory ([`FsPolicyStore`]) or from the
//! contract's remote policy repository ([`GitPolicyStore`]). Remote access
//! goes through the Git host's contents REST API with a bounded-timeout
//! client and an optional personal access token for private repositories.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use slc_core::contract::{Contract, GitSource, PolicySource};
use slc_core::document::{parse_contract, ContractFormat};
use slc_core::policy::PolicyStore;

use crate::error::{Error, Result};

/// Default contents API base for github.com repositories.
pub const GITHUB_API_BASE: &str = "https://api.github.com";

/// Default timeout for credential-assisted HTTP calls.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Extracts `(owner, repo)` from a Git host URL such as
/// `https://github.com/decombine/policies`.
///
/// # Errors
///
/// Returns [`Error::Configuration`] when the URL does not parse or does not
/// carry an owner and repository.
pub fn parse_git_url(url: &str) -> Result<(String, String)> {
    let parsed = url::Url::parse(url)
        .map_err(|e| Error::configuration(format!("invalid git url {url}: {e}")))?;

    let mut segments = parsed
        .path_segments()
        .into_iter()
        .flatten()
        .filter(|segment| !segment.is_empty());
    match (segments.next(), segments.next()) {
        (Some(owner), Some(repo)) => Ok((owner.to_string(), repo.to_string())),
        _ => Err(Error::configuration(format!("invalid git url: {url}"))),
    }
}

/// Loads and validates a contract document from the local filesystem.
///
/// The format is detected from the path suffix (`.json`, `.yaml`, `.toml`).
///
/// # Errors
///
/// Returns an error when the file cannot be read, the suffix is not a known
/// format, or the document fails validation.
pub fn contract_from_path(path: impl AsRef<Path>) -> Result<Contract> {
    let path = path.as_ref();
    let format = path
        .to_str()
        .and_then(ContractFormat::from_path)
        .ok_or_else(|| {
            Error::configuration(format!(
                "unknown or unsupported contract format: {}",
                path.display()
            ))
        })?;
    let input = std::fs::read(path)?;
    Ok(parse_contract(&input, format)?)
}

/// A client for the Git host's repository contents API.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentsEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
}

impl GitHubClient {
    /// Creates a client, optionally authenticated with a personal access
    /// token for private repositories.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the HTTP client cannot be
    /// built.
    pub fn new(token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("slc-runtime/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::configuration(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            api_base: GITHUB_API_BASE.to_string(),
            token,
        })
    }

    /// Overrides the contents API base, e.g. for a GitHub Enterprise host.
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn contents_request(&self, url: &str, branch: &str, path: &str) -> Result<reqwest::RequestBuilder> {
        let (owner, repo) = parse_git_url(url)?;
        let endpoint = format!(
            "{}/repos/{owner}/{repo}/contents/{}",
            self.api_base,
            path.trim_start_matches('/')
        );
        let mut request = self.http.get(endpoint).query(&[("ref", branch)]);
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }
        Ok(request)
    }

    /// Fetches a single file's raw content from a repository.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for malformed URLs and
    /// [`Error::Network`] for transport or API failures.
    pub async fn file(&self, url: &str, branch: &str, path: &str) -> Result<String> {
        let response = self
            .contents_request(url, branch, path)?
            .header(reqwest::header::ACCEPT, "application/vnd.github.raw+json")
            .send()
            .await
            .map_err(|e| Error::network(format!("failed to fetch {path}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::network(format!(
                "failed to fetch {path}: status {}",
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| Error::network(format!("failed to read {path}: {e}")))
    }

    /// Fetches every file directly under a repository directory, keyed by
    /// repository path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for malformed URLs and
    /// [`Error::Network`] for transport or API failures.
    pub async fn directory(
        &self,
        url: &str,
        branch: &str,
        path: &str,
    ) -> Result<HashMap<String, String>> {
        let response = self
            .contents_request(url, branch, path)?
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| Error::network(format!("failed to list {path}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::network(format!(
                "failed to list {path}: status {}",
                response.status()
            )));
        }

        let entries: Vec<ContentsEntry> = response
            .json()
            .await
            .map_err(|e| Error::network(format!("failed to parse listing of {path}: {e}")))?;

        let mut contents = HashMap::new();
        for entry in entries.into_iter().filter(|e| e.entry_type == "file") {
            let content = self.file(url, branch, &entry.path).await?;
            contents.insert(entry.path, content);
        }
        Ok(contents)
    }
}

/// Retrieves and validates a contract document from a Git repository.
///
/// # Errors
///
/// Returns an error when retrieval fails, the path suffix is not a known
/// format, or the document fails validation.
pub async fn contract_from_git(client: &GitHubClient, source: &GitSource) -> Result<Contract> {
    let format = ContractFormat::from_path(&source.path).ok_or_else(|| {
        Error::configuration(format!(
            "unknown or unsupported contract format: {}",
            source.path
        ))
    })?;
    let content = client.file(&source.url, &source.branch, &source.path).await?;
    Ok(parse_contract(content.as_bytes(), format)?)
}

/// A policy store reading modules from a local directory.
///
/// Useful for testing and development; condition paths resolve relative to
/// the root.
#[derive(Debug, Clone)]
pub struct FsPolicyStore {
    root: PathBuf,
}

impl FsPolicyStore {
    /// Creates a store rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl PolicyStore for FsPolicyStore {
    async fn fetch(&self, path: &str) -> slc_core::Result<String> {
        let full = self.root.join(path.trim_start_matches('/'));
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| slc_core::Error::policy_fetch(path, e.to_string()))
    }
}

/// A policy store reading modules from the contract's remote policy
/// repository.
///
/// Condition paths resolve relative to the policy source's directory.
#[derive(Debug, Clone)]
pub struct GitPolicyStore {
    client: GitHubClient,
    policy: PolicySource,
}

impl GitPolicyStore {
    /// Creates a store for the given policy source.
    #[must_use]
    pub fn new(client: GitHubClient, policy: PolicySource) -> Self {
        Self { client, policy }
    }

    fn resolve(&self, path: &str) -> String {
        let directory = self.policy.directory.trim_matches('/');
        let path = path.trim_start_matches('/');
        if directory.is_empty() {
            path.to_string()
        } else {
            format!("{directory}/{path}")
        }
    }

    /// Fetches every policy module under the configured directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the listing or a file fetch fails.
    pub async fn fetch_directory(&self) -> Result<HashMap<String, String>> {
        self.client
            .directory(&self.policy.url, &self.policy.branch, &self.policy.directory)
            .await
    }
}

#[async_trait]
impl PolicyStore for GitPolicyStore {
    async fn fetch(&self, path: &str) -> slc_core::Result<String> {
        self.client
            .file(&self.policy.url, &self.policy.branch, &self.resolve(path))
            .await
            .map_err(|e| slc_core::Error::policy_fetch(path, e.to_string()))
    }
}
