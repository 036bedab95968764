//! Per-project pull loop.
//!
//! Each watched project gets one task that wakes up on a fixed period, lists
//! merge requests and commits changed after the project's watermark and hands
//! every item to an [`ItemHandler`]. Items are handled one at a time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use review_bot_core::{Commit, GitlabClient, MergeRequest, Project};

use crate::reconciler::{Outcome, ReconcileError};

/// Delay before the first cycle of a freshly started poller.
pub const STARTUP_DELAY: Duration = Duration::from_secs(5);

/// Shortest accepted pull period.
pub const MIN_PULL_PERIOD: Duration = Duration::from_secs(1);

/// How the "changed after" watermark moves between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum WatermarkMode {
    /// Always query after the project's creation time.
    #[default]
    Fixed,
    /// Move to the start of the last cycle whose list calls all succeeded.
    Advance,
}

/// Consumer of pulled items.
#[async_trait]
pub trait ItemHandler: Send + Sync {
    async fn handle_merge_request(&self, mr: MergeRequest) -> Result<Outcome, ReconcileError>;
    async fn handle_commit(&self, commit: Commit) -> Result<Outcome, ReconcileError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("Pull period {0:?} is shorter than the minimum of 1s")]
    InvalidPullPeriod(Duration),

    #[error("A stop request is already pending")]
    StopPending,

    #[error("Poller already stopped")]
    Stopped,

    #[error("Poller task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Timing shared by every poller of a service.
#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
    pub period: Duration,
    pub startup_delay: Duration,
    pub watermark_mode: WatermarkMode,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
            startup_delay: STARTUP_DELAY,
            watermark_mode: WatermarkMode::Fixed,
        }
    }
}

impl PollerSettings {
    pub fn validate(&self) -> Result<(), PollerError> {
        if self.period < MIN_PULL_PERIOD {
            return Err(PollerError::InvalidPullPeriod(self.period));
        }
        Ok(())
    }
}

/// Handle to a running project poller.
pub struct GitLabPuller {
    project_id: i64,
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl GitLabPuller {
    /// Spawn the pull loop for `project`.
    pub fn start(
        project: Project,
        settings: PollerSettings,
        gitlab: Arc<dyn GitlabClient>,
        handler: Arc<dyn ItemHandler>,
    ) -> Result<Self, PollerError> {
        settings.validate()?;

        let project_id = project.id;
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(run(project, settings, gitlab, handler, stop_rx));
        info!(project_id, period = ?settings.period, "Started poller");

        Ok(Self {
            project_id,
            stop_tx,
            task,
        })
    }

    pub fn project_id(&self) -> i64 {
        self.project_id
    }

    /// Ask the loop to exit after the current cycle.
    pub fn stop(&self) -> Result<(), PollerError> {
        self.stop_tx.try_send(()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => PollerError::StopPending,
            mpsc::error::TrySendError::Closed(()) => PollerError::Stopped,
        })
    }

    /// Wait for the loop to exit.
    pub async fn join(self) -> Result<(), PollerError> {
        self.task.await?;
        debug!(project_id = self.project_id, "Poller joined");
        Ok(())
    }
}

async fn run(
    project: Project,
    settings: PollerSettings,
    gitlab: Arc<dyn GitlabClient>,
    handler: Arc<dyn ItemHandler>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + settings.startup_delay, settings.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut watermark = project.created_at;

    loop {
        // A stop that arrives mid-cycle is only seen on the next iteration.
        tokio::select! {
            biased;
            _ = stop_rx.recv() => break,
            _ = ticker.tick() => {
                let started = Utc::now();
                let complete = pull(project.id, watermark, gitlab.as_ref(), handler.as_ref()).await;
                if complete && settings.watermark_mode == WatermarkMode::Advance {
                    watermark = started;
                    debug!(project_id = project.id, %watermark, "Advanced watermark");
                }
            }
        }
    }

    info!(project_id = project.id, "Poller stopped");
}

/// One cycle. Returns false if a list call failed.
async fn pull(
    project_id: i64,
    after: DateTime<Utc>,
    gitlab: &dyn GitlabClient,
    handler: &dyn ItemHandler,
) -> bool {
    let mut complete = true;

    match gitlab.merge_requests_by_project(project_id, after).await {
        Ok(mrs) => {
            debug!(project_id, count = mrs.len(), "Pulled merge requests");
            for mr in mrs {
                let iid = mr.iid;
                match handler.handle_merge_request(mr).await {
                    Ok(outcome) => debug!(project_id, iid, ?outcome, "Merge request handled"),
                    Err(e) => error!(project_id, iid, error = %e, "Failed to reconcile merge request"),
                }
            }
        }
        Err(e) => {
            complete = false;
            warn!(project_id, error = %e, "Failed to list merge requests");
        }
    }

    match gitlab.commits_by_project(project_id, after).await {
        Ok(commits) => {
            debug!(project_id, count = commits.len(), "Pulled commits");
            for commit in commits {
                let sha = commit.short_id.clone();
                match handler.handle_commit(commit).await {
                    Ok(outcome) => debug!(project_id, %sha, ?outcome, "Commit handled"),
                    Err(e) => error!(project_id, %sha, error = %e, "Failed to reconcile commit"),
                }
            }
        }
        Err(e) => {
            complete = false;
            warn!(project_id, error = %e, "Failed to list commits");
        }
    }

    complete
}
