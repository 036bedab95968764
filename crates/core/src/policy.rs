//! Team policy contract and the registry that resolves policy names.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{BasicUser, MergeRequest, Team};
use crate::{Error, Result};

/// Team-specific behavior on merge requests.
///
/// `process_changes` runs on every poll cycle for every applicable team, so
/// implementations must tolerate repeated calls with the same input.
#[async_trait]
pub trait Policy: Send + Sync {
    /// React to the current state of a merge request (notices, reviewer
    /// requests).
    async fn process_changes(&self, team: &Team, mr: &MergeRequest) -> Result<()>;

    /// True iff every listed user has approved the merge request.
    fn approved_by_user(&self, team: &Team, mr: &MergeRequest, users: &[BasicUser]) -> bool;

    /// True iff the merge request satisfies the team's approval rule.
    fn approved_by_policy(&self, team: &Team, mr: &MergeRequest) -> bool;
}

/// The known policy kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyName {
    ReinventingDemocracy,
    TeamLeadAlwaysRight,
}

impl PolicyName {
    pub const ALL: [PolicyName; 2] = [
        PolicyName::ReinventingDemocracy,
        PolicyName::TeamLeadAlwaysRight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyName::ReinventingDemocracy => "reinventing_democracy",
            PolicyName::TeamLeadAlwaysRight => "team_lead_always_right",
        }
    }
}

impl fmt::Display for PolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PolicyName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| Error::UnknownPolicy(s.to_string()))
    }
}

/// Immutable name → policy table, built once at startup.
#[derive(Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<PolicyName, Arc<dyn Policy>>,
}

impl PolicyRegistry {
    pub fn builder() -> PolicyRegistryBuilder {
        PolicyRegistryBuilder::default()
    }

    /// Resolve a team's policy name. Unknown and unregistered names both
    /// yield [`Error::UnknownPolicy`].
    pub fn resolve(&self, name: &str) -> Result<&Arc<dyn Policy>> {
        let kind: PolicyName = name.parse()?;
        self.policies
            .get(&kind)
            .ok_or_else(|| Error::UnknownPolicy(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.policies.keys()).finish()
    }
}

#[derive(Default)]
pub struct PolicyRegistryBuilder {
    policies: HashMap<PolicyName, Arc<dyn Policy>>,
}

impl PolicyRegistryBuilder {
    pub fn register(mut self, name: PolicyName, policy: impl Policy + 'static) -> Self {
        self.policies.insert(name, Arc::new(policy));
        self
    }

    pub fn build(self) -> PolicyRegistry {
        PolicyRegistry {
            policies: self.policies,
        }
    }
}
