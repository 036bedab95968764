//! Verdict announcements shared by the policies.

use chrono::Utc;
use tracing::{debug, info};

use review_bot_core::{
    BasicUser, GitlabClient, MergeRequest, PolicyMetadata, PolicyName, Repository, Result, Team,
};

pub(crate) fn all_approved(mr: &MergeRequest, users: &[BasicUser]) -> bool {
    users.iter().all(|u| mr.approved_by(u.id))
}

/// The merge request with its approvals as GitLab reports them now. The stored
/// copy only refreshes approvals when the merge request itself changes.
pub(crate) async fn with_live_approvals(
    gitlab: &dyn GitlabClient,
    mr: &MergeRequest,
) -> Result<MergeRequest> {
    let mut live = mr.clone();
    live.approves = gitlab
        .merge_request_approves(mr.project_id, mr.iid)
        .await?;
    Ok(live)
}

pub(crate) fn format_mentions<'a>(usernames: impl Iterator<Item = &'a str>) -> String {
    usernames
        .map(|u| format!("@{u}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Post `note` when the verdict differs from the last one announced for this
/// (merge request, team, policy), then record it.
pub(crate) async fn announce_verdict(
    repo: &dyn Repository,
    gitlab: &dyn GitlabClient,
    policy: PolicyName,
    team: &Team,
    mr: &MergeRequest,
    approved: bool,
    note: &str,
) -> Result<()> {
    let last = repo
        .find_policy_metadata(mr.id, &team.id, policy.as_str())
        .await?;

    if last.as_ref().map(|m| m.approved) == Some(approved) {
        debug!(
            team = %team.name,
            policy = %policy,
            iid = mr.iid,
            approved,
            "Verdict unchanged"
        );
        return Ok(());
    }

    gitlab
        .add_comment_to_merge_request(mr.project_id, mr.iid, note)
        .await?;

    repo.upsert_policy_metadata(&PolicyMetadata {
        mr_id: mr.id,
        team_id: team.id.clone(),
        policy: policy.as_str().to_string(),
        approved,
        updated_at: Utc::now(),
    })
    .await?;

    info!(
        team = %team.name,
        policy = %policy,
        project_id = mr.project_id,
        iid = mr.iid,
        approved,
        "Announced policy verdict"
    );
    Ok(())
}
