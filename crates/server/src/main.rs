//! Review Bot Server
//!
//! Polls watched GitLab projects and posts AI reviews.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use review_bot_core::{GitlabClient, Repository};
use review_bot_openai::OpenAiClient;
use review_bot_server::{Config, GitlabRestClient, RedisRepository, Service};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json)?;

    info!("Review Bot Server starting");

    let repo: Arc<dyn Repository> = Arc::new(
        RedisRepository::new(&config.redis_url)
            .await
            .context("Failed to connect to Redis")?,
    );

    let gitlab: Arc<dyn GitlabClient> = Arc::new(
        GitlabRestClient::new(
            &config.gitlab_url,
            &config.gitlab_token,
            config.gitlab_rate_limit(),
        )
        .context("Failed to create GitLab client")?,
    );

    let reviewer = Arc::new(
        OpenAiClient::new(config.openai_config()).context("Failed to create OpenAI client")?,
    );

    let policies = Arc::new(review_bot_policies::default_registry(
        repo.clone(),
        gitlab.clone(),
    ));

    let mut service = Service::new(repo, gitlab, reviewer, policies)
        .await
        .context("Failed to load teams")?;
    service
        .subscribe_on_projects(config.poller_settings())
        .await
        .context("Failed to start pollers")?;

    shutdown_signal().await;

    service
        .shutdown(config.shutdown_timeout())
        .await
        .context("Shutdown")?;

    info!("Review Bot Server stopped");
    Ok(())
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
