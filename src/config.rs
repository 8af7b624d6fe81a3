//! Configuration loading.
//!
//! A single TOML file with one section per subsystem. Every field has a
//! default so a minimal config only needs the two secrets, which can also
//! arrive via environment variables (`TELEGRAM_BOT_TOKEN`, `LLM_API_KEY`).

use anyhow::Context as _;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Base persona used when no persona file is configured.
const DEFAULT_PERSONA: &str = "You are a friendly, encouraging study assistant for an online course. \
Answer the student's questions helpfully and keep replies short enough for a chat message.";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub llm: LlmConfig,
    pub dialog: DialogConfig,
    pub refresh: RefreshConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot API token. Overridden by `TELEGRAM_BOT_TOKEN` when set.
    pub token: String,
    /// Bot API host, swappable for tests and regional proxies.
    pub api_base: String,
    /// Long-poll hold time for getUpdates.
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base: "https://api.telegram.org".into(),
            poll_timeout_secs: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key. Overridden by `LLM_API_KEY` when set.
    pub api_key: String,
    /// Chat-completions endpoint. The default is the OpenAI API; deployments
    /// behind a proxy point this at the proxy host instead.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1/chat/completions".into(),
            model: "gpt-4o-mini".into(),
            temperature: 0.5,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DialogConfig {
    /// How many history turns feed the model context window.
    pub tail: usize,
    /// Optional file holding the base persona text.
    pub persona_path: Option<PathBuf>,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            tail: 6,
            persona_path: None,
        }
    }
}

impl DialogConfig {
    /// Resolve the base persona: file contents when configured, built-in
    /// text otherwise.
    pub fn persona(&self) -> crate::Result<String> {
        match &self.persona_path {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read persona file: {}", path.display())),
            None => Ok(DEFAULT_PERSONA.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Path or http(s) URL of the analytics CSV export.
    pub source: String,
    pub interval_secs: u64,
    /// Minimum metric movement that counts as a change.
    pub epsilon: f64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            source: "analytics.csv".into(),
            interval_secs: 24 * 60 * 60,
            epsilon: 0.01,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "pacebot.db".into(),
        }
    }
}

impl Config {
    /// Load the config file and apply environment overrides for secrets.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let mut config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN")
            && !token.is_empty()
        {
            self.telegram.token = token;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY")
            && !key.is_empty()
        {
            self.llm.api_key = key;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_section() {
        let config: Config = toml::from_str("").expect("empty config should parse");
        assert_eq!(config.dialog.tail, 6);
        assert_eq!(config.refresh.epsilon, 0.01);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.telegram.poll_timeout_secs, 50);
    }

    #[test]
    fn sections_parse_partially() {
        let config: Config = toml::from_str(
            r#"
            [dialog]
            tail = 12

            [refresh]
            source = "https://example.com/export.csv"
            epsilon = 0.5
            "#,
        )
        .expect("partial config should parse");
        assert_eq!(config.dialog.tail, 12);
        assert_eq!(config.refresh.source, "https://example.com/export.csv");
        assert_eq!(config.refresh.epsilon, 0.5);
        // Untouched sections keep their defaults.
        assert_eq!(config.llm.temperature, 0.5);
    }
}
