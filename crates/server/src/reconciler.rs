//! Change detection, persistence, review and policy dispatch for pulled items.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use review_bot_core::{
    compose_review_input, truncate_chars, Commit, Diff, Error, GitlabClient, MergeRequest,
    PolicyRegistry, Repository, ReviewGenerator, Team, MAX_REVIEW_INPUT_CHARS,
};

use crate::poller::ItemHandler;

/// The step that failed while reconciling one item.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Store lookup failed: {0}")]
    Lookup(#[source] Error),

    #[error("Fetching approvals failed: {0}")]
    Approvals(#[source] Error),

    #[error("Store upsert failed: {0}")]
    Upsert(#[source] Error),

    #[error("Fetching diff failed: {0}")]
    Diff(#[source] Error),

    #[error("Review generation failed: {0}")]
    Review(#[source] Error),

    #[error("Posting review failed: {0}")]
    Comment(#[source] Error),
}

/// What a successful reconciliation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The stored snapshot matched; nothing was written or posted.
    Unchanged,
    /// The item was stored and a review was posted.
    Reviewed,
}

/// Reconciles pulled items against the store.
pub struct Reconciler {
    repo: Arc<dyn Repository>,
    gitlab: Arc<dyn GitlabClient>,
    reviewer: Arc<dyn ReviewGenerator>,
    policies: Arc<PolicyRegistry>,
    teams: Arc<[Team]>,
    max_input_chars: usize,
}

impl Reconciler {
    pub fn new(
        repo: Arc<dyn Repository>,
        gitlab: Arc<dyn GitlabClient>,
        reviewer: Arc<dyn ReviewGenerator>,
        policies: Arc<PolicyRegistry>,
        teams: Arc<[Team]>,
    ) -> Self {
        Self {
            repo,
            gitlab,
            reviewer,
            policies,
            teams,
            max_input_chars: MAX_REVIEW_INPUT_CHARS,
        }
    }

    pub fn with_max_input_chars(mut self, max: usize) -> Self {
        self.max_input_chars = max;
        self
    }

    pub async fn reconcile_merge_request(
        &self,
        mut mr: MergeRequest,
    ) -> Result<Outcome, ReconcileError> {
        let stored = self
            .repo
            .find_merge_request_by_id(mr.id)
            .await
            .map_err(ReconcileError::Lookup)?;

        if let Some(stored) = stored
            && stored.snapshot_eq(&mr)
        {
            debug!(project_id = mr.project_id, iid = mr.iid, "Merge request unchanged");
            self.evaluate_policies(&stored).await;
            return Ok(Outcome::Unchanged);
        }

        mr.approves = self
            .gitlab
            .merge_request_approves(mr.project_id, mr.iid)
            .await
            .map_err(ReconcileError::Approvals)?;

        self.repo
            .upsert_merge_request(&mr)
            .await
            .map_err(ReconcileError::Upsert)?;

        let diffs = self
            .gitlab
            .merge_request_diff(mr.project_id, mr.iid)
            .await
            .map_err(ReconcileError::Diff)?;
        let review = self.review(&mr.title, &mr.description, &diffs).await?;

        self.gitlab
            .add_comment_to_merge_request(mr.project_id, mr.iid, &review)
            .await
            .map_err(ReconcileError::Comment)?;
        info!(project_id = mr.project_id, iid = mr.iid, "Posted merge request review");

        self.evaluate_policies(&mr).await;
        Ok(Outcome::Reviewed)
    }

    /// Commits have no policy pass.
    pub async fn reconcile_commit(&self, commit: Commit) -> Result<Outcome, ReconcileError> {
        let stored = self
            .repo
            .find_commit_by_id(&commit.id)
            .await
            .map_err(ReconcileError::Lookup)?;

        if let Some(stored) = stored
            && stored.snapshot_eq(&commit)
        {
            debug!(project_id = commit.project_id, sha = %commit.short_id, "Commit unchanged");
            return Ok(Outcome::Unchanged);
        }

        self.repo
            .upsert_commit(&commit)
            .await
            .map_err(ReconcileError::Upsert)?;

        let diffs = self
            .gitlab
            .commit_diff(commit.project_id, &commit.id)
            .await
            .map_err(ReconcileError::Diff)?;
        let review = self.review(&commit.title, &commit.message, &diffs).await?;

        self.gitlab
            .add_comment_to_commit(commit.project_id, &commit.id, &review)
            .await
            .map_err(ReconcileError::Comment)?;
        info!(project_id = commit.project_id, sha = %commit.short_id, "Posted commit review");

        Ok(Outcome::Reviewed)
    }

    async fn review(&self, title: &str, body: &str, diffs: &[Diff]) -> Result<String, ReconcileError> {
        let input = compose_review_input(title, body, diffs);
        let input = truncate_chars(&input, self.max_input_chars);
        self.reviewer
            .generate_review_comment(input)
            .await
            .map_err(ReconcileError::Review)
    }

    /// Run every applicable team's policy. Failures are logged per team.
    async fn evaluate_policies(&self, mr: &MergeRequest) {
        for team in self.teams.iter() {
            if let Some(created_at) = mr.created_at
                && team.created_at > created_at
            {
                debug!(team = %team.id, iid = mr.iid, "Team created after merge request, skipping");
                continue;
            }

            let policy = match self.policies.resolve(&team.policy) {
                Ok(policy) => policy,
                Err(e) => {
                    warn!(team = %team.id, policy = %team.policy, error = %e, "Skipping team");
                    continue;
                }
            };

            if let Err(e) = policy.process_changes(team, mr).await {
                error!(
                    team = %team.id,
                    policy = %team.policy,
                    project_id = mr.project_id,
                    iid = mr.iid,
                    error = %e,
                    "Policy failed"
                );
            }
        }
    }
}

#[async_trait]
impl ItemHandler for Reconciler {
    async fn handle_merge_request(&self, mr: MergeRequest) -> Result<Outcome, ReconcileError> {
        self.reconcile_merge_request(mr).await
    }

    async fn handle_commit(&self, commit: Commit) -> Result<Outcome, ReconcileError> {
        self.reconcile_commit(commit).await
    }
}
