//! Scripted collaborators for server tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use review_bot_core::{
    BasicUser, Commit, Diff, Error, GitlabClient, MergeRequest, Project, Result, ReviewGenerator,
};

pub fn project(id: i64) -> Project {
    Project {
        id,
        name: format!("project-{id}"),
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

pub fn basic_user(id: i64, username: &str) -> BasicUser {
    BasicUser {
        id,
        name: username.to_uppercase(),
        username: username.into(),
    }
}

pub fn merge_request(author_id: i64, iid: i64) -> MergeRequest {
    MergeRequest {
        id: 1000 + iid,
        iid,
        project_id: 42,
        title: format!("Change {iid}"),
        description: "Details.".into(),
        state: "opened".into(),
        author: basic_user(author_id, "author"),
        reviewers: vec![],
        approves: vec![],
        created_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()),
        updated_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()),
        web_url: format!("https://gitlab.example.com/g/p/-/merge_requests/{iid}"),
    }
}

pub fn commit(short_id: &str) -> Commit {
    Commit {
        id: format!("{short_id}{}", "0".repeat(40 - short_id.len())),
        short_id: short_id.into(),
        project_id: 42,
        title: "Fix flaky test".into(),
        message: "Fix flaky test\n\nSeed the rng.".into(),
        author_name: "Ann".into(),
        author_email: "ann@example.com".into(),
        authored_date: Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()),
        committer_name: "Ann".into(),
        committer_email: "ann@example.com".into(),
        committed_date: Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()),
        created_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()),
        parent_ids: vec![],
        trailers: HashMap::new(),
        stats: None,
        web_url: format!("https://gitlab.example.com/g/p/-/commit/{short_id}"),
    }
}

pub fn diff(path: &str, content: &str) -> Diff {
    Diff {
        old_path: path.into(),
        new_path: path.into(),
        content: content.into(),
        ..Default::default()
    }
}

#[derive(Default)]
struct Script {
    merge_requests: Vec<MergeRequest>,
    commits: Vec<Commit>,
    approvals: HashMap<i64, Vec<BasicUser>>,
    diffs: Vec<Diff>,
    fail_mr_list: bool,
    fail_comment_iids: Vec<i64>,
    watermarks: Vec<DateTime<Utc>>,
    approval_calls: usize,
    mr_comments: Vec<(i64, String)>,
    commit_comments: Vec<(String, String)>,
}

/// GitLab double returning canned lists and recording writes.
#[derive(Default)]
pub struct ScriptedGitlab {
    script: Mutex<Script>,
}

impl ScriptedGitlab {
    pub fn set_merge_requests(&self, mrs: Vec<MergeRequest>) {
        self.script.lock().unwrap().merge_requests = mrs;
    }

    pub fn set_commits(&self, commits: Vec<Commit>) {
        self.script.lock().unwrap().commits = commits;
    }

    pub fn set_approvals(&self, iid: i64, users: Vec<BasicUser>) {
        self.script.lock().unwrap().approvals.insert(iid, users);
    }

    pub fn set_diffs(&self, diffs: Vec<Diff>) {
        self.script.lock().unwrap().diffs = diffs;
    }

    pub fn fail_merge_request_list(&self, fail: bool) {
        self.script.lock().unwrap().fail_mr_list = fail;
    }

    pub fn fail_comment_on(&self, iid: i64) {
        self.script.lock().unwrap().fail_comment_iids.push(iid);
    }

    /// `after` of every merge request list call.
    pub fn list_watermarks(&self) -> Vec<DateTime<Utc>> {
        self.script.lock().unwrap().watermarks.clone()
    }

    pub fn approval_calls(&self) -> usize {
        self.script.lock().unwrap().approval_calls
    }

    pub fn mr_comments(&self) -> Vec<(i64, String)> {
        self.script.lock().unwrap().mr_comments.clone()
    }

    pub fn commit_comments(&self) -> Vec<(String, String)> {
        self.script.lock().unwrap().commit_comments.clone()
    }
}

#[async_trait]
impl GitlabClient for ScriptedGitlab {
    async fn merge_requests_by_project(
        &self,
        project_id: i64,
        after: DateTime<Utc>,
    ) -> Result<Vec<MergeRequest>> {
        let mut script = self.script.lock().unwrap();
        script.watermarks.push(after);
        if script.fail_mr_list {
            return Err(Error::Gitlab("503 Service Unavailable".into()));
        }
        Ok(script
            .merge_requests
            .iter()
            .filter(|mr| mr.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn merge_request_approves(&self, _: i64, iid: i64) -> Result<Vec<BasicUser>> {
        let mut script = self.script.lock().unwrap();
        script.approval_calls += 1;
        Ok(script.approvals.get(&iid).cloned().unwrap_or_default())
    }

    async fn merge_request_diff(&self, _: i64, _: i64) -> Result<Vec<Diff>> {
        Ok(self.script.lock().unwrap().diffs.clone())
    }

    async fn add_comment_to_merge_request(&self, _: i64, iid: i64, body: &str) -> Result<()> {
        let mut script = self.script.lock().unwrap();
        if script.fail_comment_iids.contains(&iid) {
            return Err(Error::Gitlab("403 Forbidden".into()));
        }
        script.mr_comments.push((iid, body.to_string()));
        Ok(())
    }

    async fn commits_by_project(&self, project_id: i64, _: DateTime<Utc>) -> Result<Vec<Commit>> {
        Ok(self
            .script
            .lock()
            .unwrap()
            .commits
            .iter()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn commit_diff(&self, _: i64, _: &str) -> Result<Vec<Diff>> {
        Ok(self.script.lock().unwrap().diffs.clone())
    }

    async fn add_comment_to_commit(&self, _: i64, sha: &str, body: &str) -> Result<()> {
        self.script
            .lock()
            .unwrap()
            .commit_comments
            .push((sha.to_string(), body.to_string()));
        Ok(())
    }
}

/// Review generator double that records its inputs.
#[derive(Default)]
pub struct ScriptedReviewer {
    inputs: Mutex<Vec<String>>,
    /// Simulated run duration.
    delay: Option<Duration>,
    fail: bool,
}

impl ScriptedReviewer {
    /// Every run ends in a failed status.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Every run takes `delay` before completing.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }
}

#[async_trait]
impl ReviewGenerator for ScriptedReviewer {
    async fn generate_review_comment(&self, input: &str) -> Result<String> {
        self.inputs.lock().unwrap().push(input.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(Error::RunFailed("expired".into()));
        }
        Ok(format!("Review of {} chars", input.chars().count()))
    }
}
