//! Remote source of truth: the authenticated user's starred repositories.

use crate::ProviderError;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

const PER_PAGE: usize = 100;
const USER_AGENT: &str = "stargraph";

/// A starred repository as reported by the remote source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteRepository {
    pub full_name: String,
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub language: Option<String>,
    pub topics: Vec<String>,
    pub stars: i64,
    pub forks: i64,
    pub pushed_at: Option<String>,
    pub archived: bool,
    pub visibility: Option<String>,
    pub owner_type: Option<String>,
    pub starred_at: Option<String>,
}

#[async_trait::async_trait]
pub trait StarSource: Send + Sync {
    /// The complete starred set; partial results are an error.
    async fn fetch_starred(&self) -> Result<Vec<RemoteRepository>, ProviderError>;
    async fn fetch_languages(&self, full_name: &str)
        -> Result<BTreeMap<String, u64>, ProviderError>;
    async fn fetch_readme(&self, full_name: &str) -> Result<Option<String>, ProviderError>;
}

#[derive(Clone)]
pub struct GithubConfig {
    pub api_url: String,
    pub token: Option<String>,
    /// Stars of this user instead of the token's owner.
    pub user: Option<String>,
}

#[derive(Clone)]
pub struct GithubClient {
    client: Client,
    cfg: GithubConfig,
}

#[derive(Deserialize)]
struct StarredEntry {
    starred_at: Option<String>,
    repo: ApiRepository,
}

#[derive(Deserialize)]
struct ApiOwner {
    login: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Deserialize)]
struct ApiRepository {
    full_name: String,
    name: String,
    owner: ApiOwner,
    description: Option<String>,
    html_url: Option<String>,
    language: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    stargazers_count: i64,
    #[serde(default)]
    forks_count: i64,
    pushed_at: Option<String>,
    #[serde(default)]
    archived: bool,
    visibility: Option<String>,
}

impl From<StarredEntry> for RemoteRepository {
    fn from(entry: StarredEntry) -> Self {
        let repo = entry.repo;
        RemoteRepository {
            full_name: repo.full_name,
            owner: repo.owner.login,
            name: repo.name,
            description: repo.description,
            url: repo.html_url,
            language: repo.language,
            topics: repo.topics,
            stars: repo.stargazers_count,
            forks: repo.forks_count,
            pushed_at: repo.pushed_at,
            archived: repo.archived,
            visibility: repo.visibility,
            owner_type: repo.owner.kind,
            starred_at: entry.starred_at,
        }
    }
}

impl GithubClient {
    pub fn new(cfg: GithubConfig) -> Self {
        Self {
            client: Client::new(),
            cfg,
        }
    }

    fn get(&self, url: String) -> RequestBuilder {
        let builder = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.cfg.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn starred_url(&self, page: usize) -> String {
        let base = match &self.cfg.user {
            Some(user) => format!("{}/users/{}/starred", self.cfg.api_url, user),
            None => format!("{}/user/starred", self.cfg.api_url),
        };
        format!("{base}?per_page={PER_PAGE}&page={page}")
    }
}

#[async_trait::async_trait]
impl StarSource for GithubClient {
    async fn fetch_starred(&self) -> Result<Vec<RemoteRepository>, ProviderError> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let resp = self
                .get(self.starred_url(page))
                .header("Accept", "application/vnd.github.star+json")
                .send()
                .await
                .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(ProviderError::RequestFailed(format!(
                    "starred page {} returned status {}",
                    page,
                    resp.status()
                )));
            }
            let entries: Vec<StarredEntry> = resp
                .json()
                .await
                .map_err(|e| ProviderError::Decode(e.to_string()))?;
            let count = entries.len();
            all.extend(entries.into_iter().map(RemoteRepository::from));
            debug!(page, count, "fetched starred page");
            if count < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    async fn fetch_languages(
        &self,
        full_name: &str,
    ) -> Result<BTreeMap<String, u64>, ProviderError> {
        let resp = self
            .get(format!("{}/repos/{}/languages", self.cfg.api_url, full_name))
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ProviderError::RequestFailed(format!(
                "languages for {} returned status {}",
                full_name,
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }

    async fn fetch_readme(&self, full_name: &str) -> Result<Option<String>, ProviderError> {
        let resp = self
            .get(format!("{}/repos/{}/readme", self.cfg.api_url, full_name))
            .header("Accept", "application/vnd.github.raw+json")
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ProviderError::RequestFailed(format!(
                "readme for {} returned status {}",
                full_name,
                resp.status()
            )));
        }
        let text = resp
            .text()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(Some(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starred_entry_maps_owner_and_counts() {
        let raw = r#"{
            "starred_at": "2024-05-01T10:00:00Z",
            "repo": {
                "full_name": "tokio-rs/tokio",
                "name": "tokio",
                "owner": {"login": "tokio-rs", "type": "Organization"},
                "description": "A runtime",
                "html_url": "https://github.com/tokio-rs/tokio",
                "language": "Rust",
                "topics": ["async", "rust"],
                "stargazers_count": 25000,
                "forks_count": 2300,
                "pushed_at": "2024-06-01T00:00:00Z",
                "archived": false,
                "visibility": "public"
            }
        }"#;
        let entry: StarredEntry = serde_json::from_str(raw).unwrap();
        let remote = RemoteRepository::from(entry);
        assert_eq!(remote.owner, "tokio-rs");
        assert_eq!(remote.owner_type.as_deref(), Some("Organization"));
        assert_eq!(remote.stars, 25000);
        assert_eq!(remote.starred_at.as_deref(), Some("2024-05-01T10:00:00Z"));
    }

    #[test]
    fn starred_url_targets_named_user() {
        let client = GithubClient::new(GithubConfig {
            api_url: "https://api.github.com".into(),
            token: None,
            user: Some("octocat".into()),
        });
        assert_eq!(
            client.starred_url(2),
            "https://api.github.com/users/octocat/starred?per_page=100&page=2"
        );
    }
}
