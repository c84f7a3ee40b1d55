//! GitHub review surface: pull-request ensure/update and progressive status
//! comments.
//!
//! Comments are whole-body panels identified by integer ids; updates are
//! last-writer-wins. Surface failures are non-fatal for the pipeline (the
//! orchestrator logs and continues), so this module only reports errors, it
//! never decides policy.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use crate::config::RepoSlug;

const API_ROOT: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "autopr";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Operations the pipeline needs from the hosting service.
pub trait ReviewSurface {
    /// Find an open PR from `owner:branch` into `base` and reuse it, or create
    /// one. Returns the PR number; idempotent under retries.
    fn ensure_pull_request(&self, head: &str, base: &str, title: &str, body: &str) -> Result<u64>;

    /// Replace the PR body.
    fn update_pull_request_body(&self, number: u64, body: &str) -> Result<()>;

    /// Create an issue comment on the PR; returns the comment id.
    fn create_comment(&self, number: u64, body: &str) -> Result<u64>;

    /// Rewrite a comment body in full.
    fn update_comment(&self, comment_id: u64, body: &str) -> Result<()>;
}

/// Blocking client against api.github.com.
pub struct GithubClient {
    client: reqwest::blocking::Client,
    token: String,
    slug: RepoSlug,
}

impl GithubClient {
    pub fn new(token: String, slug: RepoSlug) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            token,
            slug,
        })
    }

    fn request(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        builder
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    fn repo_url(&self, tail: &str) -> String {
        format!("{API_ROOT}/repos/{}/{}/{tail}", self.slug.owner, self.slug.repo)
    }
}

#[derive(Deserialize)]
struct PrSummary {
    number: u64,
}

#[derive(Deserialize)]
struct CommentSummary {
    id: u64,
}

#[derive(Serialize)]
struct CreatePrRequest {
    title: String,
    body: String,
    head: String,
    base: String,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

fn check(response: reqwest::blocking::Response, action: &str) -> Result<reqwest::blocking::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&body) {
        let detail = api_error
            .errors
            .first()
            .and_then(|e| e.message.clone())
            .unwrap_or_default();
        if detail.is_empty() {
            bail!("{action}: GitHub API error: {}", api_error.message);
        }
        bail!("{action}: GitHub API error: {}: {detail}", api_error.message);
    }
    let truncated: String = body.chars().take(200).collect();
    bail!("{action}: GitHub API error ({status}): {truncated}");
}

impl ReviewSurface for GithubClient {
    #[instrument(skip_all, fields(head, base))]
    fn ensure_pull_request(&self, head: &str, base: &str, title: &str, body: &str) -> Result<u64> {
        let url = self.repo_url("pulls");
        let head_filter = format!("{}:{head}", self.slug.owner);
        let response = self
            .request(self.client.get(&url))
            .query(&[
                ("state", "open"),
                ("head", head_filter.as_str()),
                ("base", base),
            ])
            .send()
            .context("list pull requests")?;
        let existing: Vec<PrSummary> = check(response, "list pull requests")?
            .json()
            .context("decode pull request list")?;
        if let Some(pr) = existing.first() {
            debug!(number = pr.number, "reusing open pull request");
            return Ok(pr.number);
        }

        let request = CreatePrRequest {
            title: title.to_string(),
            body: body.to_string(),
            head: head.to_string(),
            base: base.to_string(),
        };
        let response = self
            .request(self.client.post(&url))
            .json(&request)
            .send()
            .context("create pull request")?;
        let created: PrSummary = check(response, "create pull request")?
            .json()
            .context("decode created pull request")?;
        debug!(number = created.number, "created pull request");
        Ok(created.number)
    }

    fn update_pull_request_body(&self, number: u64, body: &str) -> Result<()> {
        let url = self.repo_url(&format!("pulls/{number}"));
        let response = self
            .request(self.client.patch(&url))
            .json(&json!({"body": body}))
            .send()
            .context("update pull request body")?;
        check(response, "update pull request body")?;
        Ok(())
    }

    fn create_comment(&self, number: u64, body: &str) -> Result<u64> {
        let url = self.repo_url(&format!("issues/{number}/comments"));
        let response = self
            .request(self.client.post(&url))
            .json(&json!({"body": body}))
            .send()
            .context("create comment")?;
        let created: CommentSummary = check(response, "create comment")?
            .json()
            .context("decode created comment")?;
        Ok(created.id)
    }

    fn update_comment(&self, comment_id: u64, body: &str) -> Result<()> {
        let url = self.repo_url(&format!("issues/comments/{comment_id}"));
        let response = self
            .request(self.client.patch(&url))
            .json(&json!({"body": body}))
            .send()
            .context("update comment")?;
        check(response, "update comment")?;
        Ok(())
    }
}
