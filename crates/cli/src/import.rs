//! Team and project import file.
//!
//! ```toml
//! [[teams]]
//! id = "platform"
//! name = "Platform"
//! policy = "team_lead_always_right"
//! created_at = "2024-01-01T00:00:00Z"
//!
//! [[teams.members]]
//! id = 4
//! name = "Lea"
//! username = "lea"
//! slack_id = "U024BE7LH"
//! role = "lead"
//!
//! [[projects]]
//! id = 42
//! name = "backend"
//! created_at = "2024-01-01T00:00:00Z"
//! ```
//!
//! Timestamps are RFC 3339 strings.

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use review_bot_core::{PolicyName, Project, Team};

#[derive(Debug, Default, Deserialize)]
pub struct ImportFile {
    #[serde(default)]
    pub teams: Vec<Team>,
    #[serde(default)]
    pub projects: Vec<Project>,
}

impl ImportFile {
    pub fn parse(text: &str) -> Result<Self> {
        let file: ImportFile = toml::from_str(text).context("Invalid import file")?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<()> {
        let mut team_ids = HashSet::new();
        for team in &self.teams {
            if !team_ids.insert(team.id.as_str()) {
                bail!("Duplicate team id {}", team.id);
            }
            team.policy
                .parse::<PolicyName>()
                .with_context(|| format!("Team {}", team.id))?;
        }

        let mut project_ids = HashSet::new();
        for project in &self.projects {
            if !project_ids.insert(project.id) {
                bail!("Duplicate project id {}", project.id);
            }
        }
        Ok(())
    }
}
