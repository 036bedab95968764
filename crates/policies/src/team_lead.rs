//! `team_lead_always_right`: one approval from a team lead is enough.

use std::sync::Arc;

use async_trait::async_trait;

use review_bot_core::{
    BasicUser, GitlabClient, MergeRequest, Policy, PolicyName, Repository, Result, Role, Team,
};

use crate::notice::{all_approved, announce_verdict, format_mentions, with_live_approvals};

pub struct TeamLeadAlwaysRight {
    repo: Arc<dyn Repository>,
    gitlab: Arc<dyn GitlabClient>,
}

impl TeamLeadAlwaysRight {
    pub fn new(repo: Arc<dyn Repository>, gitlab: Arc<dyn GitlabClient>) -> Self {
        Self { repo, gitlab }
    }
}

#[async_trait]
impl Policy for TeamLeadAlwaysRight {
    async fn process_changes(&self, team: &Team, mr: &MergeRequest) -> Result<()> {
        if !team.is_member(mr.author.id) {
            return Ok(());
        }
        let mr = &with_live_approvals(self.gitlab.as_ref(), mr).await?;

        let approved = self.approved_by_policy(team, mr);
        let note = if approved {
            format!("**{}**: approved by the team lead.", team.name)
        } else {
            let leads = format_mentions(
                team.members_with_role(Role::Lead)
                    .filter(|l| l.id != mr.author.id)
                    .map(|l| l.username.as_str()),
            );
            if leads.is_empty() {
                format!(
                    "**{}**: no team lead other than the author can approve this merge request.",
                    team.name
                )
            } else {
                format!("**{}**: waiting for a team lead approval: {leads}", team.name)
            }
        };

        announce_verdict(
            self.repo.as_ref(),
            self.gitlab.as_ref(),
            PolicyName::TeamLeadAlwaysRight,
            team,
            mr,
            approved,
            &note,
        )
        .await
    }

    fn approved_by_user(&self, _team: &Team, mr: &MergeRequest, users: &[BasicUser]) -> bool {
        all_approved(mr, users)
    }

    fn approved_by_policy(&self, team: &Team, mr: &MergeRequest) -> bool {
        team.members_with_role(Role::Lead)
            .any(|lead| lead.id != mr.author.id && mr.approved_by(lead.id))
    }
}

#[cfg(test)]
mod tests {
    use review_bot_core::fakes::MemoryRepository;

    use super::*;
    use crate::testing::{mr, team, RecordingGitlab};

    fn policy() -> (TeamLeadAlwaysRight, Arc<RecordingGitlab>) {
        let gitlab = Arc::new(RecordingGitlab::default());
        let policy = TeamLeadAlwaysRight::new(Arc::new(MemoryRepository::new()), gitlab.clone());
        (policy, gitlab)
    }

    #[test]
    fn test_lead_approval_is_enough() {
        let (policy, _) = policy();
        let team = team("team_lead_always_right");
        assert!(!policy.approved_by_policy(&team, &mr(1, &[2, 3])));
        assert!(policy.approved_by_policy(&team, &mr(1, &[4])));
    }

    #[test]
    fn test_lead_cannot_approve_own_mr() {
        let (policy, _) = policy();
        let team = team("team_lead_always_right");
        assert!(!policy.approved_by_policy(&team, &mr(4, &[4, 1, 2])));
    }

    #[tokio::test]
    async fn test_process_changes_reannounces_revoked_approval() {
        let (policy, gitlab) = policy();
        let team = team("team_lead_always_right");

        policy.process_changes(&team, &mr(1, &[])).await.unwrap();
        gitlab.approve(&[4]);
        policy.process_changes(&team, &mr(1, &[])).await.unwrap();
        policy.process_changes(&team, &mr(1, &[])).await.unwrap();
        gitlab.approve(&[]);
        policy.process_changes(&team, &mr(1, &[])).await.unwrap();

        let comments = gitlab.comments();
        assert_eq!(comments.len(), 3);
        assert!(comments[0].contains("@lea"));
        assert!(comments[1].contains("approved by the team lead"));
        assert!(comments[2].contains("waiting for a team lead"));
    }

    #[tokio::test]
    async fn test_process_changes_without_other_lead() {
        let (policy, gitlab) = policy();
        let team = team("team_lead_always_right");
        policy.process_changes(&team, &mr(4, &[])).await.unwrap();
        assert!(gitlab.comments()[0].contains("no team lead other than the author"));
    }
}
