//! In-memory repository (testing and dry runs).
//!
//! Enforces the same unique keys as the Redis store: merge requests on `id`
//! and on `(project_id, iid)`, commits on `id`, policy metadata on
//! `(mr_id, team_id, policy)`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::model::{Commit, MergeRequest, PolicyMetadata, Project, Team, User};
use crate::ports::Repository;
use crate::{Error, Result};

#[derive(Debug, Default)]
struct Tables {
    teams: Vec<Team>,
    projects: Vec<Project>,
    merge_requests: HashMap<i64, MergeRequest>,
    mr_by_iid: HashMap<(i64, i64), i64>,
    commits: HashMap<String, Commit>,
    policy_metadata: HashMap<(i64, String, String), PolicyMetadata>,
    writes: usize,
}

/// Repository backed by plain maps behind a mutex.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_teams(teams: Vec<Team>) -> Self {
        let repo = Self::default();
        repo.tables.lock().unwrap().teams = teams;
        repo
    }

    /// Number of upserts that changed stored data.
    pub fn writes(&self) -> usize {
        self.tables.lock().unwrap().writes
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn list_teams(&self) -> Result<Vec<Team>> {
        Ok(self.tables.lock().unwrap().teams.clone())
    }

    async fn upsert_team(&self, team: &Team) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        match tables.teams.iter_mut().find(|t| t.id == team.id) {
            Some(existing) => *existing = team.clone(),
            None => tables.teams.push(team.clone()),
        }
        Ok(())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.tables.lock().unwrap().projects.clone())
    }

    async fn upsert_project(&self, project: &Project) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        match tables.projects.iter_mut().find(|p| p.id == project.id) {
            Some(existing) => *existing = project.clone(),
            None => tables.projects.push(project.clone()),
        }
        Ok(())
    }

    async fn find_merge_request_by_id(&self, id: i64) -> Result<Option<MergeRequest>> {
        Ok(self.tables.lock().unwrap().merge_requests.get(&id).cloned())
    }

    async fn find_merge_requests_by_project(&self, project_id: i64) -> Result<Vec<MergeRequest>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .merge_requests
            .values()
            .filter(|mr| mr.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn find_merge_requests_by_author(&self, author_ids: &[i64]) -> Result<Vec<MergeRequest>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .merge_requests
            .values()
            .filter(|mr| author_ids.contains(&mr.author.id))
            .cloned()
            .collect())
    }

    async fn find_merge_requests_by_reviewer(
        &self,
        reviewer_ids: &[i64],
    ) -> Result<Vec<MergeRequest>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .merge_requests
            .values()
            .filter(|mr| mr.reviewers.iter().any(|r| reviewer_ids.contains(&r.id)))
            .cloned()
            .collect())
    }

    async fn upsert_merge_request(&self, mr: &MergeRequest) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let key = (mr.project_id, mr.iid);
        if let Some(&owner) = tables.mr_by_iid.get(&key)
            && owner != mr.id
        {
            return Err(Error::Conflict(format!(
                "merge request {}!{} already stored with id {owner}",
                mr.project_id, mr.iid
            )));
        }
        if let Some(existing) = tables.merge_requests.get(&mr.id)
            && (existing.project_id, existing.iid) != key
        {
            return Err(Error::Conflict(format!(
                "merge request id {} already stored as {}!{}",
                mr.id, existing.project_id, existing.iid
            )));
        }
        if tables.merge_requests.get(&mr.id) == Some(mr) {
            return Ok(());
        }
        tables.mr_by_iid.insert(key, mr.id);
        tables.merge_requests.insert(mr.id, mr.clone());
        tables.writes += 1;
        Ok(())
    }

    async fn find_commit_by_id(&self, id: &str) -> Result<Option<Commit>> {
        Ok(self.tables.lock().unwrap().commits.get(id).cloned())
    }

    async fn upsert_commit(&self, commit: &Commit) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables.commits.get(&commit.id) {
            if existing.project_id != commit.project_id {
                return Err(Error::Conflict(format!(
                    "commit {} already stored for project {}",
                    commit.id, existing.project_id
                )));
            }
            if existing == commit {
                return Ok(());
            }
        }
        tables.commits.insert(commit.id.clone(), commit.clone());
        tables.writes += 1;
        Ok(())
    }

    async fn find_user_by_slack_id(&self, slack_id: &str) -> Result<Option<(User, Team)>> {
        let tables = self.tables.lock().unwrap();
        for team in &tables.teams {
            if let Some(user) = team
                .members
                .iter()
                .find(|m| m.slack_id.as_deref() == Some(slack_id))
            {
                return Ok(Some((user.clone(), team.clone())));
            }
        }
        Ok(None)
    }

    async fn find_policy_metadata(
        &self,
        mr_id: i64,
        team_id: &str,
        policy: &str,
    ) -> Result<Option<PolicyMetadata>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .policy_metadata
            .get(&(mr_id, team_id.to_string(), policy.to_string()))
            .cloned())
    }

    async fn upsert_policy_metadata(&self, metadata: &PolicyMetadata) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.policy_metadata.insert(
            (
                metadata.mr_id,
                metadata.team_id.clone(),
                metadata.policy.clone(),
            ),
            metadata.clone(),
        );
        tables.writes += 1;
        Ok(())
    }
}
