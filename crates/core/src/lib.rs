//! Domain types and capability contracts for the GitLab review bot.

pub mod fakes;
pub mod message;
pub mod model;
pub mod policy;
pub mod ports;

pub use message::{compose_review_input, is_lock_file, truncate_chars, MAX_REVIEW_INPUT_CHARS};
pub use model::{
    BasicUser, Commit, CommitStats, Diff, MergeRequest, PolicyMetadata, Project, Role, Team, User,
};
pub use policy::{Policy, PolicyName, PolicyRegistry};
pub use ports::{GitlabClient, Repository, ReviewGenerator};

/// Error types for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("GitLab API error: {0}")]
    Gitlab(String),

    #[error("Review generation failed: {0}")]
    Review(String),

    #[error("Review run ended with status {0}")]
    RunFailed(String),

    #[error("Policy error: {0}")]
    Policy(String),

    #[error("Unknown policy: {0}")]
    UnknownPolicy(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
