//! `reinventing_democracy`: the team votes.
//!
//! A merge request authored by a team member is approved once two teammates
//! (or every teammate, for smaller teams) have approved it. The author's own
//! approval does not count, and neither do approvals from outside the team.

use std::sync::Arc;

use async_trait::async_trait;

use review_bot_core::{
    BasicUser, GitlabClient, MergeRequest, Policy, PolicyName, Repository, Result, Team, User,
};

use crate::notice::{all_approved, announce_verdict, format_mentions, with_live_approvals};

/// Approvals needed from a team large enough to provide them.
const QUORUM: usize = 2;

pub struct ReinventingDemocracy {
    repo: Arc<dyn Repository>,
    gitlab: Arc<dyn GitlabClient>,
}

impl ReinventingDemocracy {
    pub fn new(repo: Arc<dyn Repository>, gitlab: Arc<dyn GitlabClient>) -> Self {
        Self { repo, gitlab }
    }

    fn voters<'a>(team: &'a Team, mr: &'a MergeRequest) -> impl Iterator<Item = &'a User> {
        team.members.iter().filter(move |m| m.id != mr.author.id)
    }

    fn quorum(team: &Team, mr: &MergeRequest) -> usize {
        QUORUM.min(Self::voters(team, mr).count())
    }
}

#[async_trait]
impl Policy for ReinventingDemocracy {
    async fn process_changes(&self, team: &Team, mr: &MergeRequest) -> Result<()> {
        if !team.is_member(mr.author.id) {
            return Ok(());
        }
        let mr = &with_live_approvals(self.gitlab.as_ref(), mr).await?;

        let approved = self.approved_by_policy(team, mr);
        let note = if approved {
            format!(
                "**{}**: approved by {} teammates.",
                team.name,
                Self::quorum(team, mr)
            )
        } else {
            let votes = Self::voters(team, mr)
                .filter(|v| mr.approved_by(v.id))
                .count();
            let missing = Self::quorum(team, mr).saturating_sub(votes).max(1);
            let waiting = format_mentions(
                Self::voters(team, mr)
                    .filter(|v| !mr.approved_by(v.id))
                    .map(|v| v.username.as_str()),
            );
            format!(
                "**{}**: needs {missing} more teammate approval(s). Waiting on: {waiting}",
                team.name
            )
        };

        announce_verdict(
            self.repo.as_ref(),
            self.gitlab.as_ref(),
            PolicyName::ReinventingDemocracy,
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
        let quorum = Self::quorum(team, mr);
        if quorum == 0 {
            return false;
        }
        let votes = Self::voters(team, mr)
            .filter(|v| mr.approved_by(v.id))
            .count();
        votes >= quorum
    }
}

#[cfg(test)]
mod tests {
    use review_bot_core::fakes::MemoryRepository;
    use review_bot_core::Role;

    use super::*;
    use crate::testing::{mr, team, user, RecordingGitlab};

    fn policy() -> (ReinventingDemocracy, Arc<RecordingGitlab>) {
        let gitlab = Arc::new(RecordingGitlab::default());
        let policy = ReinventingDemocracy::new(Arc::new(MemoryRepository::new()), gitlab.clone());
        (policy, gitlab)
    }

    #[test]
    fn test_two_teammates_approve() {
        let (policy, _) = policy();
        let team = team("reinventing_democracy");
        assert!(!policy.approved_by_policy(&team, &mr(1, &[])));
        assert!(!policy.approved_by_policy(&team, &mr(1, &[2])));
        assert!(policy.approved_by_policy(&team, &mr(1, &[2, 4])));
    }

    #[test]
    fn test_author_and_outsiders_do_not_count() {
        let (policy, _) = policy();
        let team = team("reinventing_democracy");
        assert!(!policy.approved_by_policy(&team, &mr(1, &[1, 2])));
        assert!(!policy.approved_by_policy(&team, &mr(1, &[2, 77])));
    }

    #[test]
    fn test_small_team_needs_everyone_else() {
        let (policy, _) = policy();
        let mut team = team("reinventing_democracy");
        team.members = vec![user(1, "ann", Role::Developer), user(2, "bob", Role::Developer)];
        assert!(policy.approved_by_policy(&team, &mr(1, &[2])));

        team.members.truncate(1);
        assert!(!policy.approved_by_policy(&team, &mr(1, &[])));
    }

    #[test]
    fn test_approved_by_user() {
        let (policy, _) = policy();
        let team = team("reinventing_democracy");
        let mr = mr(1, &[2, 3]);
        let bob = team.member(2).unwrap().basic();
        let cid = team.member(3).unwrap().basic();
        let lea = team.member(4).unwrap().basic();
        assert!(policy.approved_by_user(&team, &mr, &[bob.clone(), cid]));
        assert!(!policy.approved_by_user(&team, &mr, &[bob, lea]));
    }

    #[tokio::test]
    async fn test_process_changes_announces_once_per_verdict() {
        let (policy, gitlab) = policy();
        let team = team("reinventing_democracy");

        gitlab.approve(&[2]);
        policy.process_changes(&team, &mr(1, &[])).await.unwrap();
        policy.process_changes(&team, &mr(1, &[])).await.unwrap();
        let comments = gitlab.comments();
        assert_eq!(comments.len(), 1);
        assert!(comments[0].contains("needs 1 more"));
        assert!(comments[0].contains("@cid"));
        assert!(!comments[0].contains("@bob"));

        gitlab.approve(&[2, 3]);
        policy.process_changes(&team, &mr(1, &[])).await.unwrap();
        policy.process_changes(&team, &mr(1, &[])).await.unwrap();
        let comments = gitlab.comments();
        assert_eq!(comments.len(), 2);
        assert!(comments[1].contains("approved by 2 teammates"));
    }

    #[tokio::test]
    async fn test_process_changes_uses_current_approvals() {
        let (policy, gitlab) = policy();
        let team = team("reinventing_democracy");

        // Stored copy says approved, GitLab says the votes were withdrawn.
        policy.process_changes(&team, &mr(1, &[2, 3])).await.unwrap();
        assert_eq!(gitlab.comments().len(), 1);
        assert!(gitlab.comments()[0].contains("needs 2 more"));
    }

    #[tokio::test]
    async fn test_process_changes_ignores_outside_authors() {
        let (policy, gitlab) = policy();
        let team = team("reinventing_democracy");
        policy.process_changes(&team, &mr(99, &[])).await.unwrap();
        assert!(gitlab.comments().is_empty());
    }
}
