//! OpenAI integration for review generation.

pub mod api;
pub mod client;

pub use api::RunStatus;
pub use client::{OpenAiClient, OpenAiConfig, ASSISTANT_NAME};
