//! Server configuration from flags and environment.

use std::time::Duration;

use clap::Parser;

use review_bot_openai::OpenAiConfig;

use crate::poller::{PollerSettings, WatermarkMode, STARTUP_DELAY};

#[derive(Debug, Clone, Parser)]
#[command(name = "review-bot-server", about = "Polls GitLab projects and posts AI code reviews")]
pub struct Config {
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    #[arg(long, env = "GITLAB_URL", default_value = "https://gitlab.com")]
    pub gitlab_url: String,

    #[arg(long, env = "GITLAB_TOKEN", hide_env_values = true)]
    pub gitlab_token: String,

    /// Minimum spacing between GitLab API calls, in milliseconds.
    #[arg(long, env = "GITLAB_RATE_LIMIT_MS", default_value_t = 1000)]
    pub gitlab_rate_limit_ms: u64,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: String,

    #[arg(long, env = "OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,

    #[arg(long, env = "OPENAI_PROXY_URL")]
    pub openai_proxy_url: Option<String>,

    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4o-mini")]
    pub openai_model: String,

    #[arg(long, env = "PULL_PERIOD_SECS", default_value_t = 60)]
    pub pull_period_secs: u64,

    #[arg(long, env = "WATERMARK_MODE", value_enum, default_value_t = WatermarkMode::Fixed)]
    pub watermark_mode: WatermarkMode,

    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,

    /// Emit logs as JSON lines.
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            period: Duration::from_secs(self.pull_period_secs),
            startup_delay: STARTUP_DELAY,
            watermark_mode: self.watermark_mode,
        }
    }

    pub fn gitlab_rate_limit(&self) -> Duration {
        Duration::from_millis(self.gitlab_rate_limit_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn openai_config(&self) -> OpenAiConfig {
        let mut config = OpenAiConfig::new(&self.openai_api_key);
        config.model = self.openai_model.clone();
        config.proxy_url = self.openai_proxy_url.clone();
        if let Some(base_url) = &self.openai_base_url {
            config.base_url = base_url.clone();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Config {
        let mut args = vec![
            "review-bot-server",
            "--gitlab-token",
            "glpat-test",
            "--openai-api-key",
            "sk-test",
        ];
        args.extend_from_slice(extra);
        Config::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = parse(&[
            "--pull-period-secs",
            "30",
            "--watermark-mode",
            "advance",
            "--openai-proxy-url",
            "http://proxy.local:3128",
            "--log-json",
        ]);
        assert_eq!(config.poller_settings().period, Duration::from_secs(30));
        assert_eq!(config.watermark_mode, WatermarkMode::Advance);
        assert_eq!(
            config.openai_config().proxy_url.as_deref(),
            Some("http://proxy.local:3128")
        );
        assert!(config.log_json);
    }

    #[test]
    fn test_zero_period_fails_validation() {
        let config = parse(&["--pull-period-secs", "0"]);
        assert!(config.poller_settings().validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_watermark_mode() {
        let result = Config::try_parse_from([
            "review-bot-server",
            "--gitlab-token",
            "t",
            "--openai-api-key",
            "k",
            "--watermark-mode",
            "sliding",
        ]);
        assert!(result.is_err());
    }
}
