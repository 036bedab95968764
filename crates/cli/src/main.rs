//! Review Bot CLI
//!
//! Admin tool for the review bot store and for previewing review input.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use review_bot_core::{
    compose_review_input, truncate_chars, GitlabClient, MergeRequest, Repository,
    MAX_REVIEW_INPUT_CHARS,
};
use review_bot_server::{GitlabRestClient, RedisRepository};

mod import;

use import::ImportFile;

#[derive(Parser)]
#[command(name = "review-bot")]
#[command(about = "Review bot CLI for teams, projects and stored reviews")]
struct Cli {
    /// Redis URL
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import teams and projects from a TOML file
    Import {
        file: PathBuf,
    },

    /// List teams and their members
    Teams,

    /// List watched projects
    Projects,

    /// List stored merge requests
    #[command(group(ArgGroup::new("filter").required(true).args(["project", "author", "reviewer"])))]
    MergeRequests {
        /// Project id
        #[arg(long)]
        project: Option<i64>,

        /// Author user ids
        #[arg(long, value_delimiter = ',')]
        author: Vec<i64>,

        /// Reviewer user ids
        #[arg(long, value_delimiter = ',')]
        reviewer: Vec<i64>,
    },

    /// Show a stored commit
    Commit {
        sha: String,
    },

    /// Find a team member by Slack id
    User {
        slack_id: String,
    },

    /// Print the review input for a merge request without calling the AI
    Compose {
        /// Project id
        #[arg(long, short)]
        project: i64,

        /// Merge request IID
        #[arg(long, short)]
        mr: i64,

        /// GitLab URL (defaults to gitlab.com)
        #[arg(long, env = "GITLAB_URL", default_value = "https://gitlab.com")]
        gitlab_url: String,

        /// GitLab token (defaults to GITLAB_TOKEN env var)
        #[arg(long, env = "GITLAB_TOKEN", hide_env_values = true)]
        token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    // Compose talks to GitLab only
    if let Commands::Compose {
        project,
        mr,
        gitlab_url,
        token,
    } = &cli.command
    {
        return compose(gitlab_url, token, *project, *mr).await;
    }

    let repo = RedisRepository::new(&cli.redis_url)
        .await
        .context("Failed to connect to Redis")?;

    match cli.command {
        Commands::Compose { .. } => unreachable!(), // Handled above

        Commands::Import { file } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let import = ImportFile::parse(&text)?;

            for team in &import.teams {
                repo.upsert_team(team).await?;
            }
            for project in &import.projects {
                repo.upsert_project(project).await?;
            }
            println!(
                "Imported {} teams and {} projects",
                import.teams.len(),
                import.projects.len()
            );
        }

        Commands::Teams => {
            let teams = repo.list_teams().await?;
            if teams.is_empty() {
                println!("No teams");
            }
            for team in teams {
                println!("{} ({}) policy={} since {}", team.name, team.id, team.policy, team.created_at);
                for member in &team.members {
                    println!(
                        "  @{:<20} id={:<8} role={:?} slack={}",
                        member.username,
                        member.id,
                        member.role,
                        member.slack_id.as_deref().unwrap_or("-")
                    );
                }
            }
        }

        Commands::Projects => {
            let projects = repo.list_projects().await?;
            if projects.is_empty() {
                println!("No projects");
            }
            for project in projects {
                println!("{:<8} {:<30} watching since {}", project.id, project.name, project.created_at);
            }
        }

        Commands::MergeRequests {
            project,
            author,
            reviewer,
        } => {
            let mut mrs = if let Some(project) = project {
                repo.find_merge_requests_by_project(project).await?
            } else if !author.is_empty() {
                repo.find_merge_requests_by_author(&author).await?
            } else {
                repo.find_merge_requests_by_reviewer(&reviewer).await?
            };
            mrs.sort_by_key(|mr| (mr.project_id, mr.iid));

            if mrs.is_empty() {
                println!("No merge requests");
            }
            for mr in &mrs {
                print_merge_request(mr);
            }
        }

        Commands::Commit { sha } => match repo.find_commit_by_id(&sha).await? {
            Some(commit) => println!("{}", serde_json::to_string_pretty(&commit)?),
            None => println!("Commit not found: {sha}"),
        },

        Commands::User { slack_id } => match repo.find_user_by_slack_id(&slack_id).await? {
            Some((user, team)) => {
                println!("User:  {} (@{}, id {})", user.name, user.username, user.id);
                println!("Role:  {:?}", user.role);
                println!("Team:  {} ({})", team.name, team.id);
            }
            None => println!("No user with Slack id {slack_id}"),
        },
    }

    Ok(())
}

fn print_merge_request(mr: &MergeRequest) {
    let approvers: Vec<&str> = mr.approves.iter().map(|u| u.username.as_str()).collect();
    println!("{}!{}  {}", mr.project_id, mr.iid, mr.title);
    println!("  Author:    @{}", mr.author.username);
    println!("  State:     {}", mr.state);
    println!("  Approved:  {}", if approvers.is_empty() { "-".to_string() } else { approvers.join(", ") });
    println!("  URL:       {}", mr.web_url);
}

async fn compose(gitlab_url: &str, token: &str, project: i64, iid: i64) -> Result<()> {
    let gitlab = GitlabRestClient::new(gitlab_url, token, std::time::Duration::ZERO)
        .context("Failed to create GitLab client")?;

    let mr = gitlab
        .merge_request(project, iid)
        .await
        .with_context(|| format!("Failed to fetch merge request {project}!{iid}"))?;

    let diffs = gitlab
        .merge_request_diff(project, iid)
        .await
        .context("Failed to fetch diff")?;
    let input = compose_review_input(&mr.title, &mr.description, &diffs);
    print!("{}", truncate_chars(&input, MAX_REVIEW_INPUT_CHARS));
    Ok(())
}
