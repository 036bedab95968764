//! Team approval policies.

use std::sync::Arc;

use review_bot_core::{GitlabClient, PolicyName, PolicyRegistry, Repository};

pub mod democracy;
mod notice;
pub mod team_lead;

pub use democracy::ReinventingDemocracy;
pub use team_lead::TeamLeadAlwaysRight;

/// Registry with every built-in policy.
pub fn default_registry(
    repo: Arc<dyn Repository>,
    gitlab: Arc<dyn GitlabClient>,
) -> PolicyRegistry {
    PolicyRegistry::builder()
        .register(
            PolicyName::ReinventingDemocracy,
            ReinventingDemocracy::new(repo.clone(), gitlab.clone()),
        )
        .register(
            PolicyName::TeamLeadAlwaysRight,
            TeamLeadAlwaysRight::new(repo, gitlab),
        )
        .build()
}
