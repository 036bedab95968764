//! Server components for the GitLab review bot.

pub mod config;
pub mod gitlab;
pub mod poller;
pub mod reconciler;
pub mod service;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use gitlab::{gitlab_auth_headers, GitlabRestClient, RateLimiter};
pub use poller::{GitLabPuller, ItemHandler, PollerError, PollerSettings, WatermarkMode};
pub use reconciler::{Outcome, ReconcileError, Reconciler};
pub use service::{Service, ServiceError};
pub use store::RedisRepository;
