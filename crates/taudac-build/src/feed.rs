use std::env;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

const DEFAULT_API_ROOT: &str = "https://api.github.com/repos";
const SHORT_HASH_LEN: usize = 8;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// One commit as the resolver sees it: abbreviated hash plus the first
/// line of the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub short_hash: String,
    pub summary: String,
}

#[derive(Debug, Deserialize)]
struct ApiCommit {
    sha: String,
    commit: ApiCommitBody,
}

#[derive(Debug, Deserialize)]
struct ApiCommitBody {
    message: String,
}

/// Read-only view over a GitHub repository's commit history, one request
/// per page. Authentication is optional; without it the API quota is
/// small, which matters once the backward walk gets long.
pub struct CommitFeed {
    api_root: String,
    owner: String,
    repo: String,
    token: Option<String>,
    client: reqwest::blocking::Client,
}

impl CommitFeed {
    pub fn new(owner: &str, repo: &str, token: Option<String>) -> Result<Self> {
        let token = token
            .filter(|t| !t.is_empty())
            .or_else(|| env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()));
        if token.is_none() {
            tracing::warn!(
                "no API token configured; unauthenticated requests have a \
                 low per-minute quota"
            );
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("taudac-build/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_root: DEFAULT_API_ROOT.into(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            token,
            client,
        })
    }

    #[cfg(test)]
    fn with_api_root(mut self, root: &str) -> Self {
        self.api_root = root.trim_end_matches('/').to_string();
        self
    }

    /// Fetch one page of commits, newest first, scoped to a revision
    /// expression. An exhausted history (`HEAD~n` past the root commit)
    /// comes back as an empty page, not an error.
    pub fn page(&self, per_page: usize, rev: &str) -> Result<Vec<CommitRecord>> {
        let url = format!("{}/{}/{}/commits", self.api_root, self.owner, self.repo);
        let mut req = self.client.get(&url).query(&[
            ("per_page", per_page.to_string()),
            ("sha", rev.to_string()),
        ]);
        if let Some(t) = self.token.as_deref() {
            req = req.bearer_auth(t);
        }

        let res = req
            .send()
            .map_err(|e| Error::Transport(format!("GET {url} failed: {e}")))?;
        let status = res.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::RateLimited);
        }
        if status == reqwest::StatusCode::NOT_FOUND
            || status == reqwest::StatusCode::UNPROCESSABLE_ENTITY
        {
            tracing::debug!(%rev, "commit history exhausted");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            // The API wraps error details in {"message": "..."}.
            let detail = res
                .text()
                .ok()
                .and_then(|body| serde_json::from_str::<serde_json::Value>(&body).ok())
                .and_then(|v| v.get("message")?.as_str().map(str::to_string));
            return Err(Error::Transport(match detail {
                Some(msg) => format!("GET {url} returned {status}: {msg}"),
                None => format!("GET {url} returned status {status}"),
            }));
        }

        let commits: Vec<ApiCommit> = res
            .json()
            .map_err(|e| Error::Transport(format!("bad commit listing payload: {e}")))?;
        Ok(commits
            .into_iter()
            .map(|c| CommitRecord {
                short_hash: c.sha.chars().take(SHORT_HASH_LEN).collect(),
                summary: c
                    .commit
                    .message
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect())
    }

    /// Lazy walk backward from HEAD, one commit (one request) per step.
    /// The caller owns termination; the cap turns a runaway walk into
    /// `ScanLimitExceeded` instead of an unbounded paging loop.
    pub fn walk(&self, scan_limit: usize) -> CommitWalk<'_> {
        CommitWalk {
            feed: self,
            next: 0,
            limit: scan_limit,
            done: false,
        }
    }
}

pub struct CommitWalk<'a> {
    feed: &'a CommitFeed,
    next: usize,
    limit: usize,
    done: bool,
}

impl Iterator for CommitWalk<'_> {
    type Item = Result<CommitRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.next >= self.limit {
            self.done = true;
            return Some(Err(Error::ScanLimitExceeded { limit: self.limit }));
        }
        let rev = format!("HEAD~{}", self.next);
        match self.feed.page(1, &rev) {
            Ok(mut commits) => {
                if commits.is_empty() {
                    self.done = true;
                    None
                } else {
                    self.next += 1;
                    Some(Ok(commits.remove(0)))
                }
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_against(server: &mockito::ServerGuard) -> CommitFeed {
        CommitFeed::new("raspberrypi", "rpi-firmware", Some("test-token".into()))
            .expect("client must build")
            .with_api_root(&server.url())
    }

    #[test]
    fn decodes_commit_listing() {
        let mut server = mockito::Server::new();
        let body = serde_json::json!([
            {
                "sha": "0123456789abcdef0123456789abcdef01234567",
                "commit": { "message": "kernel: Bump to 5.10.63\n\nSee: #4711" }
            }
        ]);
        let m = server
            .mock("GET", "/raspberrypi/rpi-firmware/commits")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create();

        let page = feed_against(&server).page(1, "HEAD").expect("page fetch");
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].short_hash, "01234567");
        assert_eq!(page[0].summary, "kernel: Bump to 5.10.63");
        m.assert();
    }

    #[test]
    fn forbidden_maps_to_rate_limited() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/raspberrypi/rpi-firmware/commits")
            .match_query(mockito::Matcher::Any)
            .with_status(403)
            .with_body(r#"{"message":"API rate limit exceeded"}"#)
            .create();

        let err = feed_against(&server).page(1, "HEAD").unwrap_err();
        assert!(matches!(err, Error::RateLimited));
    }

    #[test]
    fn server_errors_surface_the_api_message() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/raspberrypi/rpi-firmware/commits")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .with_body(r#"{"message":"upstream hiccup"}"#)
            .create();

        let err = feed_against(&server).page(1, "HEAD").unwrap_err();
        match err {
            Error::Transport(msg) => assert!(msg.contains("upstream hiccup"), "msg: {msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn exhausted_history_is_an_empty_page() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/raspberrypi/rpi-firmware/commits")
            .match_query(mockito::Matcher::Any)
            .with_status(422)
            .with_body(r#"{"message":"No commit found for SHA: HEAD~3"}"#)
            .create();

        let page = feed_against(&server).page(1, "HEAD~3").expect("not an error");
        assert!(page.is_empty());
    }
}
