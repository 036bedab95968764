//! Persisted entities and the per-request diff value.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// GitLab user reference as it appears on merge requests and approvals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicUser {
    pub id: i64,
    pub name: String,
    pub username: String,
}

/// A merge request as observed on GitLab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRequest {
    /// Instance-wide id.
    pub id: i64,
    /// Per-project sequence number.
    pub iid: i64,
    pub project_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub state: String,
    pub author: BasicUser,
    #[serde(default)]
    pub reviewers: Vec<BasicUser>,
    /// Approvals attached by the reconciler; empty as returned by list calls.
    #[serde(default)]
    pub approves: Vec<BasicUser>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub web_url: String,
}

impl MergeRequest {
    /// Compare the fields that decide whether a poll saw a change.
    ///
    /// Approvals, reviewers, state and `updated_at` are not part of the
    /// snapshot.
    pub fn snapshot_eq(&self, other: &MergeRequest) -> bool {
        self.id == other.id
            && self.iid == other.iid
            && self.project_id == other.project_id
            && self.author.id == other.author.id
            && self.title == other.title
            && self.description == other.description
            && self.web_url == other.web_url
            && self.created_at == other.created_at
    }

    pub fn approved_by(&self, user_id: i64) -> bool {
        self.approves.iter().any(|u| u.id == user_id)
    }
}

/// Line statistics of a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStats {
    pub additions: i64,
    pub deletions: i64,
    pub total: i64,
}

/// A commit as observed on GitLab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Full hash.
    pub id: String,
    pub short_id: String,
    pub project_id: i64,
    pub title: String,
    #[serde(default)]
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub authored_date: Option<DateTime<Utc>>,
    pub committer_name: String,
    pub committer_email: String,
    pub committed_date: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parent_ids: Vec<String>,
    #[serde(default)]
    pub trailers: HashMap<String, String>,
    pub stats: Option<CommitStats>,
    pub web_url: String,
}

impl Commit {
    /// Compare the fields that decide whether a poll saw a change.
    ///
    /// Parents, trailers, stats and the committed date are not part of the
    /// snapshot.
    pub fn snapshot_eq(&self, other: &Commit) -> bool {
        self.id == other.id
            && self.short_id == other.short_id
            && self.project_id == other.project_id
            && self.author_name == other.author_name
            && self.author_email == other.author_email
            && self.committer_name == other.committer_name
            && self.committer_email == other.committer_email
            && self.title == other.title
            && self.message == other.message
            && self.web_url == other.web_url
            && self.authored_date == other.authored_date
            && self.created_at == other.created_at
    }
}

/// Role of a team member, used by policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Developer,
    Lead,
}

/// A team member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub username: String,
    #[serde(default)]
    pub slack_id: Option<String>,
    #[serde(default)]
    pub role: Role,
}

impl User {
    pub fn basic(&self) -> BasicUser {
        BasicUser {
            id: self.id,
            name: self.name.clone(),
            username: self.username.clone(),
        }
    }
}

/// A team and the policy it follows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    /// Policy name, resolved against the policy registry at dispatch time.
    pub policy: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub members: Vec<User>,
}

impl Team {
    pub fn member(&self, user_id: i64) -> Option<&User> {
        self.members.iter().find(|m| m.id == user_id)
    }

    pub fn is_member(&self, user_id: i64) -> bool {
        self.member(user_id).is_some()
    }

    pub fn members_with_role(&self, role: Role) -> impl Iterator<Item = &User> {
        self.members.iter().filter(move |m| m.role == role)
    }
}

/// A watched GitLab project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    /// Initial watermark for the project's poller.
    pub created_at: DateTime<Utc>,
}

/// One file of a change set. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub old_path: String,
    pub new_path: String,
    pub content: String,
    #[serde(default)]
    pub new_file: bool,
    #[serde(default)]
    pub renamed_file: bool,
    #[serde(default)]
    pub deleted_file: bool,
}

/// State a policy keeps per (merge request, team) pair between cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyMetadata {
    pub mr_id: i64,
    pub team_id: String,
    pub policy: String,
    /// Verdict last announced on the merge request.
    pub approved: bool,
    pub updated_at: DateTime<Utc>,
}
