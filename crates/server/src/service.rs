//! Owns the pollers for every watched project.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use review_bot_core::{Error, GitlabClient, PolicyRegistry, Repository, ReviewGenerator, Team};

use crate::poller::{GitLabPuller, ItemHandler, PollerError, PollerSettings};
use crate::reconciler::Reconciler;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] Error),

    #[error(transparent)]
    Poller(#[from] PollerError),

    #[error("Pollers did not stop within {0:?}")]
    DirtyShutdown(Duration),
}

/// Review bot service: one poller per project, one shared reconciler.
pub struct Service {
    repo: Arc<dyn Repository>,
    gitlab: Arc<dyn GitlabClient>,
    handler: Arc<dyn ItemHandler>,
    pullers: Vec<GitLabPuller>,
}

impl Service {
    /// Load the team snapshot and build the reconciler. Teams are read once;
    /// changes need a restart.
    pub async fn new(
        repo: Arc<dyn Repository>,
        gitlab: Arc<dyn GitlabClient>,
        reviewer: Arc<dyn ReviewGenerator>,
        policies: Arc<PolicyRegistry>,
    ) -> Result<Self, ServiceError> {
        let teams: Arc<[Team]> = repo.list_teams().await?.into();
        info!(teams = teams.len(), policies = policies.len(), "Loaded teams");

        let reconciler = Reconciler::new(repo.clone(), gitlab.clone(), reviewer, policies, teams);
        Ok(Self {
            repo,
            gitlab,
            handler: Arc::new(reconciler),
            pullers: Vec::new(),
        })
    }

    /// Start a poller for every stored project. Returns how many were started.
    pub async fn subscribe_on_projects(
        &mut self,
        settings: PollerSettings,
    ) -> Result<usize, ServiceError> {
        settings.validate()?;

        let projects = self.repo.list_projects().await?;
        if projects.is_empty() {
            warn!("No projects to watch");
        }

        for project in projects {
            let puller = GitLabPuller::start(
                project,
                settings,
                self.gitlab.clone(),
                self.handler.clone(),
            )?;
            self.pullers.push(puller);
        }

        info!(pollers = self.pullers.len(), "Subscribed on projects");
        Ok(self.pullers.len())
    }

    /// Stop every poller and wait for all of them within `grace`.
    pub async fn shutdown(self, grace: Duration) -> Result<(), ServiceError> {
        info!(pollers = self.pullers.len(), "Shutting down");

        for puller in &self.pullers {
            if let Err(e) = puller.stop() {
                warn!(project_id = puller.project_id(), error = %e, "Stop request not delivered");
            }
        }

        let joined = tokio::time::timeout(grace, async {
            for puller in self.pullers {
                let project_id = puller.project_id();
                if let Err(e) = puller.join().await {
                    warn!(project_id, error = %e, "Poller ended abnormally");
                }
            }
        })
        .await;

        match joined {
            Ok(()) => {
                info!("All pollers stopped");
                Ok(())
            }
            Err(_) => Err(ServiceError::DirtyShutdown(grace)),
        }
    }
}
