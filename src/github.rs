//! GitHub release metadata client.
//!
//! Fetches the latest release of a repository from the GitHub REST API:
//!
//! ```text
//! https://github.com/{owner}/{repo}
//!   -> GET {api}/repos/{owner}/{repo}/releases/latest
//! ```
//!
//! Rate-limit headers are logged when present and otherwise ignored. A `GITHUB_TOKEN`
//! raises the anonymous limit and is sent as a bearer token.

use crate::config::Settings;
use crate::error::{MicasaError, Result};
use reqwest::Url;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Latest-release metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tag_name: Option<String>,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl ReleaseInfo {
    /// The release tag, falling back to the release name.
    pub fn version(&self) -> Option<&str> {
        self.tag_name
            .as_deref()
            .or(self.name.as_deref())
            .filter(|v| !v.is_empty())
    }
}

/// One downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
    /// `sha256:<hex>` when GitHub computed one
    #[serde(default)]
    pub digest: Option<String>,
}

impl Asset {
    /// The expected SHA-256 of the asset, if the release records one.
    pub fn sha256(&self) -> Option<&str> {
        self.digest.as_deref()?.strip_prefix("sha256:")
    }
}

/// Split `https://github.com/{owner}/{repo}` into owner and repository.
///
/// A trailing `.git` is dropped and extra path segments are ignored.
pub fn parse_repo_url(repo_url: &str) -> Result<(String, String)> {
    let url = Url::parse(repo_url).map_err(|e| {
        MicasaError::InvalidArgument(format!("invalid repository URL '{}': {}", repo_url, e))
    })?;

    let segments: Vec<&str> = url
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    if segments.len() < 2 {
        return Err(MicasaError::InvalidArgument(format!(
            "repository URL '{}' must name an owner and a repository",
            repo_url
        )));
    }

    let repo = segments[1].strip_suffix(".git").unwrap_or(segments[1]);
    Ok((segments[0].to_string(), repo.to_string()))
}

/// Client for the GitHub releases API.
#[derive(Debug, Clone)]
pub struct GithubReleaseFetcher {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GithubReleaseFetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(settings.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            api_base: settings.github_api.clone(),
            token: settings.github_token.clone(),
        })
    }

    /// The HTTP client, shared with asset downloads.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// API endpoint for the latest release of `repo_url`.
    pub fn latest_release_url(&self, repo_url: &str) -> Result<String> {
        let (owner, repo) = parse_repo_url(repo_url)?;
        Ok(format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_base, owner, repo
        ))
    }

    /// Fetch the latest release of the repository at `repo_url`.
    ///
    /// # Errors
    ///
    /// - [`MicasaError::InvalidArgument`] if the URL has fewer than two path segments
    /// - [`MicasaError::Network`] on a non-success status
    /// - [`MicasaError::Json`] if the body is not a release document
    /// - [`MicasaError::Cancelled`] if `cancel` fires first
    pub async fn fetch_latest_release(
        &self,
        repo_url: &str,
        cancel: &CancellationToken,
    ) -> Result<ReleaseInfo> {
        let url = self.latest_release_url(repo_url)?;
        debug!("...fetching release info from {}...", url);

        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MicasaError::Cancelled),
            response = request.send() => response?,
        };

        log_rate_limit(response.headers());

        let status = response.status();
        if !status.is_success() {
            return Err(MicasaError::Network(format!(
                "GET {} returned {}",
                url, status
            )));
        }

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MicasaError::Cancelled),
            body = response.text() => body?,
        };

        let release: ReleaseInfo = serde_json::from_str(&body)?;
        debug!(
            "...latest release of {} is {} with {} assets",
            repo_url,
            release.version().unwrap_or("<unnamed>"),
            release.assets.len()
        );

        Ok(release)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RateLimit {
    used: u64,
    limit: u64,
    remaining: u64,
    reset: i64,
}

fn parse_rate_limit(headers: &HeaderMap) -> Option<RateLimit> {
    let number = |name: &str| -> Option<i64> {
        headers.get(name)?.to_str().ok()?.trim().parse().ok()
    };

    Some(RateLimit {
        used: number("x-ratelimit-used")?.try_into().ok()?,
        limit: number("x-ratelimit-limit")?.try_into().ok()?,
        remaining: number("x-ratelimit-remaining")?.try_into().ok()?,
        reset: number("x-ratelimit-reset")?,
    })
}

fn log_rate_limit(headers: &HeaderMap) {
    let Some(rate) = parse_rate_limit(headers) else {
        return;
    };

    let reset = chrono::DateTime::from_timestamp(rate.reset, 0)
        .map(|utc| {
            utc.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| rate.reset.to_string());

    if rate.remaining == 0 {
        warn!(
            "GitHub API rate limit exhausted ({} of {} used), resets at {}",
            rate.used, rate.limit, reset
        );
    } else {
        debug!(
            "GitHub API rate limit: {} of {} used, {} remaining, resets at {}",
            rate.used, rate.limit, rate.remaining, reset
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use reqwest::header::HeaderValue;

    const BAT_RELEASE: &str = include_str!("../tests/fixtures/github/bat.json");

    fn fetcher_for(server: &Server, token: Option<&str>) -> GithubReleaseFetcher {
        let mut settings = Settings::with_home("/nonexistent");
        settings.github_api = server.url();
        settings.github_token = token.map(str::to_string);
        GithubReleaseFetcher::new(&settings).unwrap()
    }

    #[test]
    fn test_parse_repo_url() {
        assert_eq!(
            parse_repo_url("https://github.com/sharkdp/bat").unwrap(),
            ("sharkdp".to_string(), "bat".to_string())
        );
        assert_eq!(
            parse_repo_url("https://github.com/neovim/neovim.git/").unwrap(),
            ("neovim".to_string(), "neovim".to_string())
        );
        assert_eq!(
            parse_repo_url("https://github.com/BurntSushi/ripgrep/releases").unwrap(),
            ("BurntSushi".to_string(), "ripgrep".to_string())
        );
    }

    #[test]
    fn test_parse_repo_url_rejects_short_paths() {
        for url in ["https://github.com/sharkdp", "https://github.com/", "not a url"] {
            let err = parse_repo_url(url).unwrap_err();
            assert!(matches!(err, MicasaError::InvalidArgument(_)), "{}", url);
        }
    }

    #[test]
    fn test_release_fixture_deserializes() {
        let release: ReleaseInfo = serde_json::from_str(BAT_RELEASE).unwrap();
        assert_eq!(release.name.as_deref(), Some("v0.26.1"));
        assert_eq!(release.version(), Some("v0.26.1"));
        assert_eq!(release.assets.len(), 21);
        assert!(
            release
                .assets
                .iter()
                .any(|a| a.name == "bat-musl_0.26.1_arm64.deb")
        );
        let first = &release.assets[0];
        assert_eq!(
            first.download_url,
            "https://github.com/sharkdp/bat/releases/download/v0.26.1/bat-musl_0.26.1_amd64.deb"
        );
        assert_eq!(first.sha256().map(str::len), Some(64));
    }

    #[test]
    fn test_rate_limit_requires_every_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-used", HeaderValue::from_static("12"));
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("60"));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("48"));
        assert_eq!(parse_rate_limit(&headers), None);

        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1764710062"));
        assert_eq!(
            parse_rate_limit(&headers),
            Some(RateLimit {
                used: 12,
                limit: 60,
                remaining: 48,
                reset: 1764710062
            })
        );
    }

    #[tokio::test]
    async fn test_fetch_latest_release() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/sharkdp/bat/releases/latest")
            .match_header("user-agent", mockito::Matcher::Regex("^micasa/".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("x-ratelimit-used", "1")
            .with_header("x-ratelimit-limit", "60")
            .with_header("x-ratelimit-remaining", "59")
            .with_header("x-ratelimit-reset", "1764710062")
            .with_body(BAT_RELEASE)
            .create_async()
            .await;

        let release = fetcher_for(&server, None)
            .fetch_latest_release("https://github.com/sharkdp/bat", &CancellationToken::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(release.assets.len(), 21);
    }

    #[tokio::test]
    async fn test_token_sent_as_bearer() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/sharkdp/fd/releases/latest")
            .match_header("authorization", "Bearer ghp_secret")
            .with_status(200)
            .with_body(r#"{"name": "v10.3.0", "tag_name": "v10.3.0", "assets": []}"#)
            .create_async()
            .await;

        let release = fetcher_for(&server, Some("ghp_secret"))
            .fetch_latest_release("https://github.com/sharkdp/fd", &CancellationToken::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(release.assets.is_empty());
    }

    #[tokio::test]
    async fn test_non_success_status_fails() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/repos/nobody/nothing/releases/latest")
            .with_status(404)
            .with_body(r#"{"message": "Not Found"}"#)
            .create_async()
            .await;

        let err = fetcher_for(&server, None)
            .fetch_latest_release("https://github.com/nobody/nothing", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, MicasaError::Network(ref msg) if msg.contains("404")));
    }

    #[tokio::test]
    async fn test_null_body_fails() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/repos/sharkdp/bat/releases/latest")
            .with_status(200)
            .with_body("null")
            .create_async()
            .await;

        let err = fetcher_for(&server, None)
            .fetch_latest_release("https://github.com/sharkdp/bat", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, MicasaError::Json(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let server = Server::new_async().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fetcher_for(&server, None)
            .fetch_latest_release("https://github.com/sharkdp/bat", &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, MicasaError::Cancelled));
    }
}
