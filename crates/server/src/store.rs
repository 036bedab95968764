//! Redis-backed repository.
//!
//! Every entity lives in one hash keyed by its identity and holds JSON.
//! Secondary lookups scan the hash; the data set is small (watched projects
//! only).

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use review_bot_core::{
    Commit, Error, MergeRequest, PolicyMetadata, Project, Repository, Result, Team, User,
};

const TEAMS_KEY: &str = "review-bot:teams";
const PROJECTS_KEY: &str = "review-bot:projects";
const MERGE_REQUESTS_KEY: &str = "review-bot:merge-requests";
const MERGE_REQUEST_IIDS_KEY: &str = "review-bot:merge-requests:iid";
const COMMITS_KEY: &str = "review-bot:commits";
const POLICY_METADATA_KEY: &str = "review-bot:policy-metadata";

fn store_err(e: redis::RedisError) -> Error {
    Error::Store(e.to_string())
}

fn iid_field(project_id: i64, iid: i64) -> String {
    format!("{project_id}:{iid}")
}

fn policy_metadata_field(mr_id: i64, team_id: &str, policy: &str) -> String {
    format!("{mr_id}:{team_id}:{policy}")
}

/// Whether `mr` has to be written over `existing`. A stored merge request
/// with the same id but another `(project_id, iid)` is a conflict.
fn merge_request_needs_write(existing: Option<&MergeRequest>, mr: &MergeRequest) -> Result<bool> {
    let Some(existing) = existing else {
        return Ok(true);
    };
    if (existing.project_id, existing.iid) != (mr.project_id, mr.iid) {
        return Err(Error::Conflict(format!(
            "merge request id {} already stored as {}!{}",
            mr.id, existing.project_id, existing.iid
        )));
    }
    Ok(existing != mr)
}

fn commit_needs_write(existing: Option<&Commit>, commit: &Commit) -> Result<bool> {
    let Some(existing) = existing else {
        return Ok(true);
    };
    if existing.project_id != commit.project_id {
        return Err(Error::Conflict(format!(
            "commit {} already stored for project {}",
            commit.id, existing.project_id
        )));
    }
    Ok(existing != commit)
}

/// `owner` is the id already holding the `(project_id, iid)` slot of `mr`.
fn check_iid_owner(mr: &MergeRequest, owner: Option<i64>) -> Result<()> {
    match owner {
        Some(owner) if owner != mr.id => Err(Error::Conflict(format!(
            "merge request {}!{} already stored with id {owner}",
            mr.project_id, mr.iid
        ))),
        _ => Ok(()),
    }
}

/// Repository over a shared Redis connection.
#[derive(Clone)]
pub struct RedisRepository {
    conn: ConnectionManager,
}

impl RedisRepository {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(store_err)?;
        let conn = ConnectionManager::new(client).await.map_err(store_err)?;
        info!("Connected to Redis");
        Ok(Self { conn })
    }

    async fn get<T: DeserializeOwned>(&self, key: &str, field: &str) -> Result<Option<T>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.hget(key, field).await.map_err(store_err)?;
        json.map(|j| serde_json::from_str(&j).map_err(Error::from))
            .transpose()
    }

    async fn values<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn.hvals(key).await.map_err(store_err)?;
        values
            .iter()
            .map(|j| serde_json::from_str(j).map_err(Error::from))
            .collect()
    }

    async fn put<T: Serialize>(&self, key: &str, field: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(key, field, json)
            .await
            .map_err(store_err)
    }

    /// Claim `(project_id, iid)` for `mr_id`, failing if another id holds it.
    async fn claim_iid(&self, mr: &MergeRequest) -> Result<()> {
        let field = iid_field(mr.project_id, mr.iid);
        let mut conn = self.conn.clone();
        let claimed: bool = conn
            .hset_nx(MERGE_REQUEST_IIDS_KEY, &field, mr.id)
            .await
            .map_err(store_err)?;
        if claimed {
            return Ok(());
        }

        let owner: Option<i64> = conn
            .hget(MERGE_REQUEST_IIDS_KEY, &field)
            .await
            .map_err(store_err)?;
        check_iid_owner(mr, owner)
    }
}

#[async_trait]
impl Repository for RedisRepository {
    async fn list_teams(&self) -> Result<Vec<Team>> {
        self.values(TEAMS_KEY).await
    }

    async fn upsert_team(&self, team: &Team) -> Result<()> {
        self.put(TEAMS_KEY, &team.id, team).await?;
        debug!(team = %team.id, "Stored team");
        Ok(())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        self.values(PROJECTS_KEY).await
    }

    async fn upsert_project(&self, project: &Project) -> Result<()> {
        self.put(PROJECTS_KEY, &project.id.to_string(), project)
            .await?;
        debug!(project = project.id, "Stored project");
        Ok(())
    }

    async fn find_merge_request_by_id(&self, id: i64) -> Result<Option<MergeRequest>> {
        self.get(MERGE_REQUESTS_KEY, &id.to_string()).await
    }

    async fn find_merge_requests_by_project(&self, project_id: i64) -> Result<Vec<MergeRequest>> {
        let all: Vec<MergeRequest> = self.values(MERGE_REQUESTS_KEY).await?;
        Ok(all
            .into_iter()
            .filter(|mr| mr.project_id == project_id)
            .collect())
    }

    async fn find_merge_requests_by_author(&self, author_ids: &[i64]) -> Result<Vec<MergeRequest>> {
        let all: Vec<MergeRequest> = self.values(MERGE_REQUESTS_KEY).await?;
        Ok(all
            .into_iter()
            .filter(|mr| author_ids.contains(&mr.author.id))
            .collect())
    }

    async fn find_merge_requests_by_reviewer(
        &self,
        reviewer_ids: &[i64],
    ) -> Result<Vec<MergeRequest>> {
        let all: Vec<MergeRequest> = self.values(MERGE_REQUESTS_KEY).await?;
        Ok(all
            .into_iter()
            .filter(|mr| mr.reviewers.iter().any(|r| reviewer_ids.contains(&r.id)))
            .collect())
    }

    async fn upsert_merge_request(&self, mr: &MergeRequest) -> Result<()> {
        let existing = self.find_merge_request_by_id(mr.id).await?;
        if !merge_request_needs_write(existing.as_ref(), mr)? {
            return Ok(());
        }
        self.claim_iid(mr).await?;
        self.put(MERGE_REQUESTS_KEY, &mr.id.to_string(), mr).await?;
        debug!(mr = mr.id, project = mr.project_id, iid = mr.iid, "Stored merge request");
        Ok(())
    }

    async fn find_commit_by_id(&self, id: &str) -> Result<Option<Commit>> {
        self.get(COMMITS_KEY, id).await
    }

    async fn upsert_commit(&self, commit: &Commit) -> Result<()> {
        let existing = self.find_commit_by_id(&commit.id).await?;
        if !commit_needs_write(existing.as_ref(), commit)? {
            return Ok(());
        }
        self.put(COMMITS_KEY, &commit.id, commit).await?;
        debug!(commit = %commit.short_id, project = commit.project_id, "Stored commit");
        Ok(())
    }

    async fn find_user_by_slack_id(&self, slack_id: &str) -> Result<Option<(User, Team)>> {
        let teams = self.list_teams().await?;
        Ok(teams.into_iter().find_map(|team| {
            team.members
                .iter()
                .find(|m| m.slack_id.as_deref() == Some(slack_id))
                .cloned()
                .map(|user| (user, team.clone()))
        }))
    }

    async fn find_policy_metadata(
        &self,
        mr_id: i64,
        team_id: &str,
        policy: &str,
    ) -> Result<Option<PolicyMetadata>> {
        self.get(
            POLICY_METADATA_KEY,
            &policy_metadata_field(mr_id, team_id, policy),
        )
        .await
    }

    async fn upsert_policy_metadata(&self, metadata: &PolicyMetadata) -> Result<()> {
        let field = policy_metadata_field(metadata.mr_id, &metadata.team_id, &metadata.policy);
        self.put(POLICY_METADATA_KEY, &field, metadata).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{basic_user, commit, merge_request};

    #[test]
    fn test_field_keys() {
        assert_eq!(iid_field(42, 7), "42:7");
        assert_eq!(
            policy_metadata_field(1001, "platform", "team_lead_always_right"),
            "1001:platform:team_lead_always_right"
        );
    }

    #[test]
    fn test_new_merge_request_is_written() {
        assert!(merge_request_needs_write(None, &merge_request(1, 7)).unwrap());
    }

    #[test]
    fn test_identical_merge_request_is_skipped() {
        let mr = merge_request(1, 7);
        assert!(!merge_request_needs_write(Some(&mr), &mr.clone()).unwrap());
    }

    #[test]
    fn test_changed_merge_request_is_written() {
        let stored = merge_request(1, 7);
        let mut updated = stored.clone();
        updated.approves = vec![basic_user(4, "lea")];
        assert!(merge_request_needs_write(Some(&stored), &updated).unwrap());
    }

    #[test]
    fn test_merge_request_moved_to_other_iid_conflicts() {
        let stored = merge_request(1, 7);
        let mut moved = stored.clone();
        moved.iid = 8;
        let err = merge_request_needs_write(Some(&stored), &moved).unwrap_err();
        assert!(matches!(err, Error::Conflict(msg) if msg == "merge request id 1007 already stored as 42!7"));

        let mut other_project = stored.clone();
        other_project.project_id = 43;
        assert!(matches!(
            merge_request_needs_write(Some(&stored), &other_project),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_iid_held_by_other_id_conflicts() {
        let mr = merge_request(1, 7);
        assert!(check_iid_owner(&mr, None).is_ok());
        assert!(check_iid_owner(&mr, Some(mr.id)).is_ok());

        let err = check_iid_owner(&mr, Some(555)).unwrap_err();
        assert!(matches!(err, Error::Conflict(msg) if msg == "merge request 42!7 already stored with id 555"));
    }

    #[test]
    fn test_commit_writes() {
        let stored = commit("a1b2c3d4");
        assert!(commit_needs_write(None, &stored).unwrap());
        assert!(!commit_needs_write(Some(&stored), &stored.clone()).unwrap());

        let mut amended = stored.clone();
        amended.message = "Fix flaky test\n\nSeed the rng twice.".into();
        assert!(commit_needs_write(Some(&stored), &amended).unwrap());
    }

    #[test]
    fn test_commit_in_other_project_conflicts() {
        let stored = commit("a1b2c3d4");
        let mut elsewhere = stored.clone();
        elsewhere.project_id = 43;
        let err = commit_needs_write(Some(&stored), &elsewhere).unwrap_err();
        assert!(matches!(err, Error::Conflict(msg) if msg.ends_with("already stored for project 42")));
    }

    #[test]
    fn test_store_err_maps_to_store() {
        let err = store_err(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "connection refused",
        )));
        assert!(matches!(err, Error::Store(msg) if msg.contains("connection refused")));
    }
}
