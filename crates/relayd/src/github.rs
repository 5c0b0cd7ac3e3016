//! The GitHub REST collaborator: issues, pull requests and comments.

use std::time::Duration;

use async_trait::async_trait;
use relay_core::{GitHubConfig, IssueRef, PullRequestRef};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

const DEFAULT_ATTEMPTS: usize = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("github client configuration error: {message}")]
    Config { message: String },
    #[error("github api {operation} request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("github api {operation} failed with status {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("failed to decode github {operation} response: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("no commits between {base} and {head}")]
    NoCommits { base: String, head: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestDraft {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

#[async_trait]
pub trait GitHubApi: Send + Sync {
    async fn get_issue(&self, number: u64) -> Result<IssueRef, GitHubError>;
    async fn create_pull_request(
        &self,
        draft: &PullRequestDraft,
    ) -> Result<PullRequestRef, GitHubError>;
    async fn add_comment(&self, issue_number: u64, body: &str) -> Result<(), GitHubError>;
}

#[derive(Debug, Clone)]
pub struct HttpGitHubClient {
    http: reqwest::Client,
    api_base: String,
    owner: String,
    repo: String,
    attempts: usize,
    base_delay: Duration,
}

#[derive(Deserialize)]
struct IssueResponse {
    number: u64,
    title: String,
    body: Option<String>,
    html_url: String,
}

impl HttpGitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self, GitHubError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("relayd"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            reqwest::header::HeaderValue::from_static("2022-11-28"),
        );
        let token = config.token.trim();
        if !token.is_empty() {
            let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| GitHubError::Config {
                    message: "token contains characters not allowed in a header".to_string(),
                })?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| GitHubError::Config {
                message: err.to_string(),
            })?;

        Ok(Self {
            http,
            api_base: config.api_base_url.trim_end_matches('/').to_string(),
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            attempts: DEFAULT_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        })
    }

    async fn find_open_pull_request(
        &self,
        draft: &PullRequestDraft,
    ) -> Result<Option<PullRequestRef>, GitHubError> {
        let url = self.repo_url("pulls");
        let head = format!("{}:{}", self.owner, draft.head);
        let open: Vec<PullRequestRef> = self
            .request_json("list pull requests", || {
                self.http.get(&url).query(&[
                    ("head", head.as_str()),
                    ("base", draft.base.as_str()),
                    ("state", "open"),
                ])
            })
            .await?;
        Ok(open.into_iter().next())
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{path}",
            self.api_base, self.owner, self.repo
        )
    }

    async fn request_json<T, F>(
        &self,
        operation: &'static str,
        mut request_builder: F,
    ) -> Result<T, GitHubError>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            match request_builder().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<T>()
                            .await
                            .map_err(|source| GitHubError::Decode { operation, source });
                    }

                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.attempts && is_retryable_status(status.as_u16()) {
                        tracing::warn!(operation, status = status.as_u16(), attempt, "github request failed; backing off");
                        tokio::time::sleep(retry_delay(self.base_delay, attempt)).await;
                        continue;
                    }
                    return Err(GitHubError::Status {
                        operation,
                        status: status.as_u16(),
                        body: truncate_for_error(&body, 800),
                    });
                }
                Err(source) => {
                    if attempt < self.attempts && is_retryable_transport_error(&source) {
                        tracing::warn!(operation, attempt, error = %source, "github request failed; backing off");
                        tokio::time::sleep(retry_delay(self.base_delay, attempt)).await;
                        continue;
                    }
                    return Err(GitHubError::Transport { operation, source });
                }
            }
        }
    }
}

#[async_trait]
impl GitHubApi for HttpGitHubClient {
    async fn get_issue(&self, number: u64) -> Result<IssueRef, GitHubError> {
        let url = self.repo_url(&format!("issues/{number}"));
        let issue: IssueResponse = self
            .request_json("get issue", || self.http.get(&url))
            .await?;
        Ok(IssueRef {
            number: issue.number,
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            html_url: issue.html_url,
        })
    }

    async fn create_pull_request(
        &self,
        draft: &PullRequestDraft,
    ) -> Result<PullRequestRef, GitHubError> {
        let url = self.repo_url("pulls");
        let result = self
            .request_json::<PullRequestRef, _>("create pull request", || {
                self.http.post(&url).json(draft)
            })
            .await;
        match result {
            Err(GitHubError::Status { status, body, .. }) if is_no_commits(status, &body) => {
                Err(GitHubError::NoCommits {
                    base: draft.base.clone(),
                    head: draft.head.clone(),
                })
            }
            // An earlier attempt (a timed out POST, or a previous task run)
            // already opened it.
            Err(err @ GitHubError::Status { .. }) if is_existing_pull_request(&err) => {
                match self.find_open_pull_request(draft).await? {
                    Some(pr) => {
                        tracing::info!(head = %draft.head, number = pr.number, "reusing open pull request");
                        Ok(pr)
                    }
                    None => Err(err),
                }
            }
            other => other,
        }
    }

    async fn add_comment(&self, issue_number: u64, body: &str) -> Result<(), GitHubError> {
        let url = self.repo_url(&format!("issues/{issue_number}/comments"));
        let payload = json!({ "body": body });
        self.request_json::<serde_json::Value, _>("create issue comment", || {
            self.http.post(&url).json(&payload)
        })
        .await?;
        Ok(())
    }
}

/// Everything the pull request body reports about a finished task.
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequestSummary<'a> {
    pub issue: &'a IssueRef,
    pub branch_name: &'a str,
    pub execution_secs: Option<f64>,
    pub development_summary: Option<&'a str>,
}

pub fn build_pr_body(summary: &PullRequestSummary<'_>) -> String {
    let issue = summary.issue;
    let mut body = format!(
        "## Automated implementation for #{number}\n\n\
         Closes #{number}\n\n\
         **Issue:** {title}\n\
         **Branch:** `{branch}`\n",
        number = issue.number,
        title = issue.title,
        branch = summary.branch_name,
    );
    if let Some(secs) = summary.execution_secs {
        body.push_str(&format!("**Execution time:** {secs:.1}s\n"));
    }

    body.push_str("\n### Issue description\n\n");
    if issue.body.trim().is_empty() {
        body.push_str("_No description provided._\n");
    } else {
        body.push_str(issue.body.trim());
        body.push('\n');
    }

    if let Some(summary) = summary.development_summary {
        body.push_str("\n### Development summary\n\n");
        body.push_str(summary.trim());
        body.push('\n');
    }
    body
}

fn is_no_commits(status: u16, body: &str) -> bool {
    status == 422 && body.contains("No commits between")
}

fn is_existing_pull_request(err: &GitHubError) -> bool {
    matches!(
        err,
        GitHubError::Status { status: 422, body, .. } if body.contains("A pull request already exists")
    )
}

fn retry_delay(base: Duration, attempt: usize) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10) as u32;
    base.saturating_mul(2_u32.saturating_pow(exponent)).min(MAX_DELAY)
}

fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

fn truncate_for_error(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated = text.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}
