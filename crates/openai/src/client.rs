//! Review generation through an OpenAI assistant.
//!
//! One review is one thread with one run. The run is polled until it reaches
//! a terminal status, so [`ReviewGenerator::generate_review_comment`] blocks
//! for as long as the model takes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use review_bot_core::{Error, Result, ReviewGenerator};

use crate::api::{
    reply_for_run, Assistant, CreateAssistant, CreateRun, CreateThread, List, Message, Run,
    RunStatus, Thread, ThreadMessage,
};

pub const ASSISTANT_NAME: &str = "Code Mentor";

const ASSISTANT_DESCRIPTION: &str = "Code Review Master";

const ASSISTANT_INSTRUCTIONS: &str = "You act as a code reviewer. \
Identify issues in the submitted change: naming inconsistencies, coding style breaches, \
concurrency pitfalls, structural problems, duplicated code, cyclomatic complexity, logic errors, \
and other code smells that hinder maintainability and performance.";

const RUN_INSTRUCTIONS: &str = "Please review this code diff and give modification advice.";

/// OpenAI client configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub proxy_url: Option<String>,
    /// Delay between run status checks.
    pub poll_interval: Duration,
    /// Give up on a run that has not finished after this long.
    pub run_timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            proxy_url: None,
            poll_interval: Duration::from_secs(1),
            run_timeout: Duration::from_secs(600),
        }
    }
}

/// Assistants API client implementing [`ReviewGenerator`].
pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
    assistant_id: OnceCell<String>,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.api_key))
                .map_err(|e| Error::Review(format!("Invalid API key: {e}")))?,
        );
        headers.insert("OpenAI-Beta", HeaderValue::from_static("assistants=v2"));

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(proxy_url) = &config.proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| Error::Review(format!("Invalid proxy URL: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Review(format!("HTTP client error: {e}")))?;

        Ok(Self {
            client,
            config,
            assistant_id: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| Error::Review(format!("HTTP error: {e}")))?;
        Self::parse(resp).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Review(format!("HTTP error: {e}")))?;
        Self::parse(resp).await
    }

    async fn parse<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Review(format!("OpenAI API error: {} - {}", status, text)));
        }
        resp.json()
            .await
            .map_err(|e| Error::Review(format!("JSON error: {e}")))
    }

    /// Find the review assistant by name, creating it on first use.
    async fn assistant_id(&self) -> Result<&str> {
        let id = self
            .assistant_id
            .get_or_try_init(|| async {
                let list: List<Assistant> = self.get("assistants?limit=20&order=asc").await?;
                if let Some(existing) = list
                    .data
                    .into_iter()
                    .find(|a| a.name.as_deref() == Some(ASSISTANT_NAME))
                {
                    debug!(assistant = %existing.id, "Using existing assistant");
                    return Ok::<_, Error>(existing.id);
                }

                let created: Assistant = self
                    .post(
                        "assistants",
                        &CreateAssistant {
                            model: &self.config.model,
                            name: ASSISTANT_NAME,
                            description: ASSISTANT_DESCRIPTION,
                            instructions: ASSISTANT_INSTRUCTIONS,
                        },
                    )
                    .await?;
                info!(assistant = %created.id, "Created review assistant");
                Ok(created.id)
            })
            .await?;
        Ok(id.as_str())
    }

    /// Poll a run until it reaches a terminal status.
    async fn wait_for_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        let started = tokio::time::Instant::now();

        loop {
            let run: Run = self.get(&format!("threads/{thread_id}/runs/{run_id}")).await?;
            let status = run.status;
            if let Some(run) = check_run(run, started.elapsed(), self.config.run_timeout)? {
                return Ok(run);
            }

            debug!(run = %run_id, %status, "Run still going");
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

/// `Some` once the run is terminal, `None` while it may still finish,
/// [`Error::RunFailed`] when it has been going for longer than `timeout`.
fn check_run(run: Run, elapsed: Duration, timeout: Duration) -> Result<Option<Run>> {
    if run.status.is_terminal() {
        return Ok(Some(run));
    }
    if elapsed > timeout {
        warn!(run = %run.id, status = %run.status, "Run timed out");
        return Err(Error::RunFailed(format!("{} after {:?}", run.status, timeout)));
    }
    Ok(None)
}

/// Only a completed run has a reply to read.
fn completed_run(run: Run) -> Result<Run> {
    if run.status == RunStatus::Completed {
        return Ok(run);
    }
    let detail = match &run.last_error {
        Some(e) => format!("{}: {} ({})", run.status, e.message, e.code),
        None => run.status.to_string(),
    };
    Err(Error::RunFailed(detail))
}

fn review_reply(messages: &[Message], run_id: &str) -> Result<String> {
    reply_for_run(messages, run_id)
        .ok_or_else(|| Error::Review(format!("Run {run_id} completed without a reply")))
}

#[async_trait]
impl ReviewGenerator for OpenAiClient {
    async fn generate_review_comment(&self, input: &str) -> Result<String> {
        let assistant_id = self.assistant_id().await?;

        let thread: Thread = self
            .post(
                "threads",
                &CreateThread {
                    messages: vec![ThreadMessage::user(input)],
                },
            )
            .await?;

        let run: Run = self
            .post(
                &format!("threads/{}/runs", thread.id),
                &CreateRun {
                    assistant_id,
                    model: &self.config.model,
                    instructions: RUN_INSTRUCTIONS,
                },
            )
            .await?;
        info!(thread = %thread.id, run = %run.id, input_len = input.len(), "Started review run");

        let run = completed_run(self.wait_for_run(&thread.id, &run.id).await?)?;

        let messages: List<Message> = self
            .get(&format!("threads/{}/messages?order=desc&limit=20", thread.id))
            .await?;
        review_reply(&messages.data, &run.id)
    }
}
