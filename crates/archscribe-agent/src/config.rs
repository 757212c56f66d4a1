// ABOUTME: Agent configuration resolved once per process from environment variables.
// ABOUTME: Covers provider selection, credentials, model limits, turn limits, and the compaction override.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-5-20250929";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_MAX_TURNS: usize = 50;
/// Turns that run before the context window is first checked.
pub const DEFAULT_GRACE_TURNS: usize = 2;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    MissingApiKey(&'static str),

    #[error("unsupported LLM provider: {0}")]
    UnknownProvider(String),

    #[error("{var} is not a positive integer: {value}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("AUTO_CONDENSE_THRESHOLD must be in (0, 1], got {0}")]
    InvalidThreshold(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
        }
    }

    fn api_key_var(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
        }
    }

    fn base_url_var(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "ANTHROPIC_BASE_URL",
            ProviderKind::OpenAi => "OPENAI_BASE_URL",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => DEFAULT_ANTHROPIC_MODEL,
            ProviderKind::OpenAi => DEFAULT_OPENAI_MODEL,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "openai" => Ok(ProviderKind::OpenAi),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// Everything a task needs to talk to its provider and bound its loop.
#[derive(Clone, PartialEq)]
pub struct AgentConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub max_turns: usize,
    pub grace_turns: usize,
    /// Fraction of the context window at which compaction starts, replacing
    /// the per-window defaults.
    pub condense_threshold: Option<f64>,
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("max_turns", &self.max_turns)
            .field("grace_turns", &self.grace_turns)
            .field("condense_threshold", &self.condense_threshold)
            .finish()
    }
}

impl AgentConfig {
    /// Load configuration from the process environment.
    ///
    /// - ARCHSCRIBE_PROVIDER: anthropic (default) or openai
    /// - ARCHSCRIBE_MODEL: model id (default depends on provider)
    /// - ANTHROPIC_API_KEY / OPENAI_API_KEY: required for the chosen provider
    /// - ANTHROPIC_BASE_URL / OPENAI_BASE_URL: optional endpoint override
    /// - ARCHSCRIBE_MAX_TOKENS: output token cap per request (default 4096)
    /// - ARCHSCRIBE_MAX_TURNS: turn limit per task (default 50)
    /// - AUTO_CONDENSE_THRESHOLD: optional compaction ratio in (0, 1]
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = match get("ARCHSCRIBE_PROVIDER") {
            Some(name) => name.parse()?,
            None => ProviderKind::Anthropic,
        };
        let api_key = get(provider.api_key_var())
            .ok_or(ConfigError::MissingApiKey(provider.api_key_var()))?;
        let model = get("ARCHSCRIBE_MODEL").unwrap_or_else(|| provider.default_model().to_string());
        let base_url = get(provider.base_url_var());

        let max_tokens = parse_positive(get("ARCHSCRIBE_MAX_TOKENS"), "ARCHSCRIBE_MAX_TOKENS")?
            .map(|n| n as u32)
            .unwrap_or(DEFAULT_MAX_TOKENS);
        let max_turns = parse_positive(get("ARCHSCRIBE_MAX_TURNS"), "ARCHSCRIBE_MAX_TURNS")?
            .unwrap_or(DEFAULT_MAX_TURNS);

        let condense_threshold = match get("AUTO_CONDENSE_THRESHOLD") {
            Some(raw) => {
                let ratio: f64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidThreshold(raw.clone()))?;
                if !(ratio > 0.0 && ratio <= 1.0) {
                    return Err(ConfigError::InvalidThreshold(raw));
                }
                Some(ratio)
            }
            None => None,
        };

        Ok(Self {
            provider,
            model,
            api_key,
            base_url,
            max_tokens,
            max_turns,
            grace_turns: DEFAULT_GRACE_TURNS,
            condense_threshold,
        })
    }
}

fn parse_positive(raw: Option<String>, var: &'static str) -> Result<Option<usize>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 && n <= u32::MAX as usize => Ok(Some(n)),
        _ => Err(ConfigError::InvalidNumber { var, value: raw }),
    }
}
