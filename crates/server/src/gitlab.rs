//! GitLab REST client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use review_bot_core::{
    BasicUser, Commit, CommitStats, Diff, Error, GitlabClient, MergeRequest, Result,
};

const PER_PAGE: u32 = 100;
const MAX_PAGES: u32 = 10;
/// Diff endpoints are read from the first page only.
const DIFF_PER_PAGE: u32 = 20;

/// Admits one call per period.
pub struct RateLimiter {
    period: Duration,
    next: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: Mutex::new(None),
        }
    }

    /// Wait until the next slot is free and claim it.
    pub async fn take(&self) {
        let mut next = self.next.lock().await;
        if let Some(at) = *next {
            tokio::time::sleep_until(at).await;
        }
        *next = Some(Instant::now() + self.period);
    }
}

/// Build auth headers for GitLab API requests.
/// Supports both PAT (PRIVATE-TOKEN) and OAuth (Bearer) tokens.
pub fn gitlab_auth_headers(token: &str) -> Result<HeaderMap> {
    let invalid = |e: reqwest::header::InvalidHeaderValue| Error::Gitlab(format!("Invalid token header: {e}"));
    let mut headers = HeaderMap::new();
    if token.starts_with("glpat-") || token.len() < 50 {
        headers.insert("PRIVATE-TOKEN", HeaderValue::from_str(token).map_err(invalid)?);
    } else {
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(invalid)?,
        );
    }
    Ok(headers)
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: i64,
    name: String,
    username: String,
}

impl From<ApiUser> for BasicUser {
    fn from(u: ApiUser) -> Self {
        BasicUser {
            id: u.id,
            name: u.name,
            username: u.username,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiMergeRequest {
    id: i64,
    iid: i64,
    project_id: i64,
    title: String,
    description: Option<String>,
    state: String,
    author: ApiUser,
    #[serde(default)]
    reviewers: Vec<ApiUser>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    web_url: String,
}

impl From<ApiMergeRequest> for MergeRequest {
    fn from(mr: ApiMergeRequest) -> Self {
        MergeRequest {
            id: mr.id,
            iid: mr.iid,
            project_id: mr.project_id,
            title: mr.title,
            description: mr.description.unwrap_or_default(),
            state: mr.state,
            author: mr.author.into(),
            reviewers: mr.reviewers.into_iter().map(Into::into).collect(),
            approves: Vec::new(),
            created_at: mr.created_at,
            updated_at: mr.updated_at,
            web_url: mr.web_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiCommit {
    id: String,
    short_id: String,
    title: String,
    #[serde(default)]
    message: Option<String>,
    author_name: String,
    author_email: String,
    authored_date: Option<DateTime<Utc>>,
    committer_name: String,
    committer_email: String,
    committed_date: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    parent_ids: Vec<String>,
    #[serde(default)]
    trailers: Option<std::collections::HashMap<String, String>>,
    stats: Option<ApiCommitStats>,
    web_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiCommitStats {
    additions: i64,
    deletions: i64,
    total: i64,
}

fn commit_convert(c: ApiCommit, project_id: i64) -> Commit {
    Commit {
        id: c.id,
        short_id: c.short_id,
        project_id,
        title: c.title,
        message: c.message.unwrap_or_default(),
        author_name: c.author_name,
        author_email: c.author_email,
        authored_date: c.authored_date,
        committer_name: c.committer_name,
        committer_email: c.committer_email,
        committed_date: c.committed_date,
        created_at: c.created_at,
        parent_ids: c.parent_ids,
        trailers: c.trailers.unwrap_or_default(),
        stats: c.stats.map(|s| CommitStats {
            additions: s.additions,
            deletions: s.deletions,
            total: s.total,
        }),
        web_url: c.web_url,
    }
}

#[derive(Debug, Deserialize)]
struct ApiApprovals {
    #[serde(default)]
    approved_by: Vec<ApiApprover>,
}

#[derive(Debug, Deserialize)]
struct ApiApprover {
    user: ApiUser,
}

#[derive(Debug, Deserialize)]
struct ApiDiff {
    old_path: String,
    new_path: String,
    diff: String,
    #[serde(default)]
    new_file: bool,
    #[serde(default)]
    renamed_file: bool,
    #[serde(default)]
    deleted_file: bool,
}

impl From<ApiDiff> for Diff {
    fn from(d: ApiDiff) -> Self {
        Diff {
            old_path: d.old_path,
            new_path: d.new_path,
            content: d.diff,
            new_file: d.new_file,
            renamed_file: d.renamed_file,
            deleted_file: d.deleted_file,
        }
    }
}

fn format_after(after: DateTime<Utc>) -> String {
    urlencoding::encode(&after.to_rfc3339_opts(SecondsFormat::Secs, true)).into_owned()
}

/// Rate-limited GitLab API v4 client.
pub struct GitlabRestClient {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
}

impl GitlabRestClient {
    pub fn new(base_url: &str, token: &str, rate_limit: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .default_headers(gitlab_auth_headers(token)?)
            .build()
            .map_err(|e| Error::Gitlab(format!("HTTP client error: {e}")))?;

        Ok(Self {
            client,
            base_url: format!("{}/api/v4", base_url.trim_end_matches('/')),
            limiter: RateLimiter::new(rate_limit),
        })
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        self.limiter.take().await;
        let resp = req
            .send()
            .await
            .map_err(|e| Error::Gitlab(format!("HTTP error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Gitlab(format!("{} - {}", status, text)));
        }
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self.send(self.client.get(url)).await?;
        resp.json()
            .await
            .map_err(|e| Error::Gitlab(format!("JSON error: {e}")))
    }

    /// Follow `x-next-page` until exhausted or `MAX_PAGES` is reached.
    async fn get_paged<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        let mut all = Vec::new();
        for page in 1..=MAX_PAGES {
            trace!(url = %url, page, "Fetching page");
            let resp = self
                .send(self.client.get(format!("{url}&page={page}&per_page={PER_PAGE}")))
                .await?;
            let next_page = resp
                .headers()
                .get("x-next-page")
                .and_then(|v| v.to_str().ok())
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false);

            let items: Vec<T> = resp
                .json()
                .await
                .map_err(|e| Error::Gitlab(format!("JSON error: {e}")))?;
            all.extend(items);

            if !next_page {
                break;
            }
        }
        Ok(all)
    }

    /// Fetch a single merge request.
    pub async fn merge_request(&self, project_id: i64, iid: i64) -> Result<MergeRequest> {
        let url = format!("{}/projects/{project_id}/merge_requests/{iid}", self.base_url);
        let mr: ApiMergeRequest = self.get_json(&url).await?;
        Ok(mr.into())
    }

    async fn post_discussion(&self, url: &str, body: &str) -> Result<()> {
        self.send(
            self.client
                .post(url)
                .json(&serde_json::json!({ "body": body })),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl GitlabClient for GitlabRestClient {
    async fn merge_requests_by_project(
        &self,
        project_id: i64,
        after: DateTime<Utc>,
    ) -> Result<Vec<MergeRequest>> {
        let url = format!(
            "{}/projects/{project_id}/merge_requests?updated_after={}&order_by=updated_at&sort=asc",
            self.base_url,
            format_after(after)
        );
        let mrs: Vec<ApiMergeRequest> = self.get_paged(&url).await?;
        debug!(project_id, count = mrs.len(), "Listed merge requests");
        Ok(mrs.into_iter().map(Into::into).collect())
    }

    async fn merge_request_approves(&self, project_id: i64, iid: i64) -> Result<Vec<BasicUser>> {
        let url = format!(
            "{}/projects/{project_id}/merge_requests/{iid}/approvals",
            self.base_url
        );
        let approvals: ApiApprovals = self.get_json(&url).await?;
        Ok(approvals
            .approved_by
            .into_iter()
            .map(|a| a.user.into())
            .collect())
    }

    async fn merge_request_diff(&self, project_id: i64, iid: i64) -> Result<Vec<Diff>> {
        let url = format!(
            "{}/projects/{project_id}/merge_requests/{iid}/diffs?page=1&per_page={DIFF_PER_PAGE}",
            self.base_url
        );
        let diffs: Vec<ApiDiff> = self.get_json(&url).await?;
        Ok(diffs.into_iter().map(Into::into).collect())
    }

    async fn add_comment_to_merge_request(
        &self,
        project_id: i64,
        iid: i64,
        body: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/projects/{project_id}/merge_requests/{iid}/discussions",
            self.base_url
        );
        self.post_discussion(&url, body).await
    }

    async fn commits_by_project(
        &self,
        project_id: i64,
        after: DateTime<Utc>,
    ) -> Result<Vec<Commit>> {
        let url = format!(
            "{}/projects/{project_id}/repository/commits?since={}&with_stats=true",
            self.base_url,
            format_after(after)
        );
        let commits: Vec<ApiCommit> = self.get_paged(&url).await?;
        debug!(project_id, count = commits.len(), "Listed commits");
        Ok(commits
            .into_iter()
            .map(|c| commit_convert(c, project_id))
            .collect())
    }

    async fn commit_diff(&self, project_id: i64, sha: &str) -> Result<Vec<Diff>> {
        let url = format!(
            "{}/projects/{project_id}/repository/commits/{}/diff?page=1&per_page={DIFF_PER_PAGE}",
            self.base_url,
            urlencoding::encode(sha)
        );
        let diffs: Vec<ApiDiff> = self.get_json(&url).await?;
        Ok(diffs.into_iter().map(Into::into).collect())
    }

    async fn add_comment_to_commit(&self, project_id: i64, sha: &str, body: &str) -> Result<()> {
        let url = format!(
            "{}/projects/{project_id}/repository/commits/{}/discussions",
            self.base_url,
            urlencoding::encode(sha)
        );
        self.post_discussion(&url, body).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_auth_headers_pat() {
        let headers = gitlab_auth_headers("glpat-abc").unwrap();
        assert_eq!(headers.get("PRIVATE-TOKEN").unwrap(), "glpat-abc");
        assert!(headers.get("Authorization").is_none());
    }

    #[test]
    fn test_auth_headers_oauth() {
        let token = "x".repeat(64);
        let headers = gitlab_auth_headers(&token).unwrap();
        assert_eq!(
            headers.get("Authorization").unwrap().to_str().unwrap(),
            format!("Bearer {token}")
        );
    }

    #[test]
    fn test_format_after_is_encoded() {
        let after = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(format_after(after), "2024-05-06T07%3A08%3A09Z");
    }

    #[test]
    fn test_merge_request_from_api() {
        let mr: ApiMergeRequest = serde_json::from_str(
            r#"{
                "id": 81, "iid": 3, "project_id": 12, "title": "Bump deps",
                "description": null, "state": "opened",
                "author": {"id": 5, "name": "Ann", "username": "ann", "state": "active"},
                "reviewers": [{"id": 6, "name": "Bob", "username": "bob"}],
                "created_at": "2024-05-01T10:00:00.000Z",
                "updated_at": "2024-05-02T10:00:00.000Z",
                "web_url": "https://gitlab.example.com/g/p/-/merge_requests/3"
            }"#,
        )
        .unwrap();
        let mr: MergeRequest = mr.into();
        assert_eq!(mr.description, "");
        assert_eq!(mr.reviewers[0].username, "bob");
        assert!(mr.approves.is_empty());
        assert_eq!(
            mr.created_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_commit_from_api() {
        let commit: ApiCommit = serde_json::from_str(
            r#"{
                "id": "6104942438c14ec7bd21c6cd5bd995272b3faff6", "short_id": "6104942438c",
                "title": "Sanitize for network graph", "message": "Sanitize for network graph\n",
                "author_name": "randx", "author_email": "user@example.com",
                "authored_date": "2021-09-20T09:06:12.300+03:00",
                "committer_name": "Dmitriy", "committer_email": "user@example.com",
                "committed_date": "2021-09-20T09:06:12.300+03:00",
                "created_at": "2021-09-20T09:06:12.300+03:00",
                "parent_ids": ["ae1d9fb46aa2b07ee9836d49862ec4e2c46fbbba"],
                "trailers": null,
                "stats": {"additions": 15, "deletions": 10, "total": 25},
                "web_url": "https://gitlab.example.com/janedoe/gitlab-foss/-/commit/6104942438c"
            }"#,
        )
        .unwrap();
        let commit = commit_convert(commit, 12);
        assert_eq!(commit.project_id, 12);
        assert!(commit.trailers.is_empty());
        assert_eq!(commit.stats.unwrap().total, 25);
        assert_eq!(
            commit.authored_date,
            Some(Utc.with_ymd_and_hms(2021, 9, 20, 6, 6, 12).unwrap() + chrono::Duration::milliseconds(300))
        );
    }

    #[test]
    fn test_approvals_and_diffs_from_api() {
        let approvals: ApiApprovals = serde_json::from_str(
            r#"{"approved": true, "approved_by": [{"user": {"id": 1, "name": "Ann", "username": "ann"}}]}"#,
        )
        .unwrap();
        assert_eq!(approvals.approved_by[0].user.id, 1);

        let diffs: Vec<ApiDiff> = serde_json::from_str(
            r#"[{"old_path": "go.sum", "new_path": "go.sum", "diff": "@@ -1 +1 @@", "a_mode": "100644",
                 "new_file": false, "renamed_file": false, "deleted_file": false}]"#,
        )
        .unwrap();
        let diff: Diff = diffs.into_iter().next().unwrap().into();
        assert_eq!(diff.content, "@@ -1 +1 @@");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_spaces_calls() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();
        limiter.take().await;
        limiter.take().await;
        limiter.take().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
