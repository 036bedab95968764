//! Capabilities the reconciler consumes.
//!
//! Implementations live elsewhere: Redis and GitLab in the server crate, the
//! OpenAI assistant in the openai crate, in-memory versions in [`crate::fakes`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{BasicUser, Commit, Diff, MergeRequest, PolicyMetadata, Project, Team, User};
use crate::Result;

/// Entity store.
///
/// Lookups report absence as `None` or an empty list, never as an error.
/// Upserts are keyed by identity and must reject records that collide with a
/// different record on a unique key.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn list_teams(&self) -> Result<Vec<Team>>;
    async fn upsert_team(&self, team: &Team) -> Result<()>;

    async fn list_projects(&self) -> Result<Vec<Project>>;
    async fn upsert_project(&self, project: &Project) -> Result<()>;

    async fn find_merge_request_by_id(&self, id: i64) -> Result<Option<MergeRequest>>;
    async fn find_merge_requests_by_project(&self, project_id: i64) -> Result<Vec<MergeRequest>>;
    async fn find_merge_requests_by_author(&self, author_ids: &[i64]) -> Result<Vec<MergeRequest>>;
    async fn find_merge_requests_by_reviewer(
        &self,
        reviewer_ids: &[i64],
    ) -> Result<Vec<MergeRequest>>;
    async fn upsert_merge_request(&self, mr: &MergeRequest) -> Result<()>;

    async fn find_commit_by_id(&self, id: &str) -> Result<Option<Commit>>;
    async fn upsert_commit(&self, commit: &Commit) -> Result<()>;

    /// Find a team member by Slack id together with their team.
    async fn find_user_by_slack_id(&self, slack_id: &str) -> Result<Option<(User, Team)>>;

    async fn find_policy_metadata(
        &self,
        mr_id: i64,
        team_id: &str,
        policy: &str,
    ) -> Result<Option<PolicyMetadata>>;
    async fn upsert_policy_metadata(&self, metadata: &PolicyMetadata) -> Result<()>;
}

/// GitLab operations used by pollers, the reconciler and policies.
#[async_trait]
pub trait GitlabClient: Send + Sync {
    /// Merge requests created or updated after `after`.
    async fn merge_requests_by_project(
        &self,
        project_id: i64,
        after: DateTime<Utc>,
    ) -> Result<Vec<MergeRequest>>;
    async fn merge_request_approves(&self, project_id: i64, iid: i64) -> Result<Vec<BasicUser>>;
    async fn merge_request_diff(&self, project_id: i64, iid: i64) -> Result<Vec<Diff>>;
    async fn add_comment_to_merge_request(&self, project_id: i64, iid: i64, body: &str)
    -> Result<()>;

    /// Commits created after `after`.
    async fn commits_by_project(&self, project_id: i64, after: DateTime<Utc>)
    -> Result<Vec<Commit>>;
    async fn commit_diff(&self, project_id: i64, sha: &str) -> Result<Vec<Diff>>;
    async fn add_comment_to_commit(&self, project_id: i64, sha: &str, body: &str) -> Result<()>;
}

/// Turns composed diff text into a natural-language review.
///
/// The call blocks until the remote job reaches a terminal state.
#[async_trait]
pub trait ReviewGenerator: Send + Sync {
    async fn generate_review_comment(&self, input: &str) -> Result<String>;
}
