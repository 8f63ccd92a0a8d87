//! Configuration loading and validation.
//!
//! Layers, lowest first: built-in defaults, the TOML file, `FICBOT_*`
//! environment variables, then command line overrides.

use crate::compose::{ComposeLimits, FOOTER, slim_footer};
use crate::dispatch::DispatchSettings;
use crate::error::{ConfigError, Result};
use crate::platform::reddit::RedditCredentials;
use crate::scheduler::{Mode, SchedulerSettings};

use serde::Deserialize;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Subreddits added by `--default`.
pub const DEFAULT_SUBREDDITS: [&str; 6] = [
    "HPFanfiction",
    "WormFanfic",
    "NarutoFanfiction",
    "Fanfiction",
    "fandomnatural",
    "marvelfans",
];

/// Used when no subreddit was configured at all.
pub const FALLBACK_SUBREDDIT: &str = "tusingtestfield";

const DEFAULT_LEDGER_PATH: &str = "CHECKED_COMMENTS.txt";

/// ficbot configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Account credentials and API client settings.
    pub reddit: RedditConfig,

    /// Explicitly configured subreddits.
    pub subreddits: Vec<String>,

    /// Also operate on [`DEFAULT_SUBREDDITS`].
    pub default_subreddits: bool,

    /// Request ledger file.
    pub ledger_path: PathBuf,

    /// Never send, delete or persist anything.
    pub dry_run: bool,

    /// Use streaming ingestion instead of polling.
    pub streams: bool,

    /// Default log filter directive.
    pub verbosity: String,

    /// Base URL of the recommendation service.
    pub recommender_url: Option<String>,

    pub quota: QuotaConfig,
    pub timing: TimingConfig,
    pub limits: LimitsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reddit: RedditConfig::default(),
            subreddits: Vec::new(),
            default_subreddits: false,
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            dry_run: false,
            streams: false,
            verbosity: "info".into(),
            recommender_url: None,
            quota: QuotaConfig::default(),
            timing: TimingConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

/// Reddit account and API client settings.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    /// Bot account name. Also the identity used to recognise bot replies.
    pub username: String,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Sent with every request. Derived from the username when empty.
    pub user_agent: Option<String>,
}

impl std::fmt::Debug for RedditConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Direct message quota.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Requests a sender may make per window.
    pub limit: u32,
    pub window_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            limit: 30,
            window_secs: 86_400,
        }
    }
}

/// Sleeps and pauses, in seconds.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub poll_interval_secs: u64,
    pub error_backoff_secs: u64,
    /// Pause after each part of a multi-part slim reply.
    pub chunk_pacing_secs: u64,
    /// Pause after each answered request.
    pub reply_pacing_secs: u64,
    /// How often the streaming feeds re-poll their listings.
    pub stream_poll_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            error_backoff_secs: 30,
            chunk_pacing_secs: 10,
            reply_pacing_secs: 15,
            stream_poll_secs: 5,
        }
    }
}

/// Size and count limits.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Platform maximum message length, in characters.
    pub max_message_size: usize,
    /// Replies this short or shorter are not sent.
    pub min_content: usize,
    /// Stories a single request may ask for.
    pub story_limit: usize,
    pub submission_limit: usize,
    pub comment_limit: usize,
    pub stream_limit: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: 10_000,
            min_content: 10,
            story_limit: 30,
            submission_limit: 50,
            comment_limit: 100,
            stream_limit: 100,
        }
    }
}

/// Command line values layered over the file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub user: Option<String>,
    pub password: Option<String>,
    /// Comma-separated subreddit names.
    pub subreddits: Option<String>,
    pub default_subreddits: bool,
    pub ledger_path: Option<PathBuf>,
    pub dry_run: bool,
    pub streams: bool,
    pub verbosity: Option<String>,
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("ficbot"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Load the default config file, falling back to defaults when it is missing.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from_path(&path)
    }

    /// Load from a specific config file path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Load {
            path: path.display().to_string(),
            source: Arc::new(error),
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content).map_err(ConfigError::from)?)
    }

    /// Apply `FICBOT_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(password) = lookup("FICBOT_PASSWORD") {
            self.reddit.password = Some(password);
        }
        if let Some(client_id) = lookup("FICBOT_CLIENT_ID") {
            self.reddit.client_id = Some(client_id);
        }
        if let Some(client_secret) = lookup("FICBOT_CLIENT_SECRET") {
            self.reddit.client_secret = Some(client_secret);
        }
        if let Some(url) = lookup("FICBOT_RECOMMENDER_URL") {
            self.recommender_url = Some(url);
        }
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(user) = overrides.user {
            self.reddit.username = user;
        }
        if let Some(password) = overrides.password {
            self.reddit.password = Some(password);
        }
        if let Some(subreddits) = overrides.subreddits {
            self.subreddits.extend(
                subreddits
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(String::from),
            );
        }
        if let Some(path) = overrides.ledger_path {
            self.ledger_path = path;
        }
        if let Some(verbosity) = overrides.verbosity {
            self.verbosity = verbosity;
        }
        self.default_subreddits |= overrides.default_subreddits;
        self.dry_run |= overrides.dry_run;
        self.streams |= overrides.streams;
    }

    /// Subreddits to operate on: defaults (if enabled) plus explicit ones,
    /// without case-insensitive duplicates. Never empty.
    pub fn resolved_subreddits(&self) -> Vec<String> {
        let defaults = self
            .default_subreddits
            .then_some(DEFAULT_SUBREDDITS.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|name| name.to_string());

        let mut resolved: Vec<String> = Vec::new();
        for name in defaults.chain(self.subreddits.iter().cloned()) {
            if !resolved.iter().any(|known| known.eq_ignore_ascii_case(&name)) {
                resolved.push(name);
            }
        }

        if resolved.is_empty() {
            tracing::warn!(
                subreddit = FALLBACK_SUBREDDIT,
                "no subreddit specified, using test subreddit"
            );
            resolved.push(FALLBACK_SUBREDDIT.to_string());
        }
        resolved
    }

    pub fn validate(&self) -> Result<()> {
        if self.reddit.username.trim().is_empty() {
            return Err(ConfigError::MissingKey("reddit.username".into()).into());
        }
        if self.limits.max_message_size == 0 {
            return Err(
                ConfigError::Invalid("limits.max_message_size must be positive".into()).into(),
            );
        }
        let longest_footer = FOOTER
            .chars()
            .count()
            .max(slim_footer(true).chars().count());
        if longest_footer >= self.limits.max_message_size {
            return Err(ConfigError::Invalid(format!(
                "limits.max_message_size ({}) leaves no room after the {longest_footer}-character footer",
                self.limits.max_message_size
            ))
            .into());
        }
        if self.quota.window_secs == 0 {
            return Err(ConfigError::Invalid("quota.window_secs must be positive".into()).into());
        }
        Ok(())
    }

    pub fn reddit_credentials(&self) -> Result<RedditCredentials> {
        let required = |value: &Option<String>, key: &str| {
            value
                .clone()
                .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
        };

        Ok(RedditCredentials {
            username: self.reddit.username.clone(),
            password: required(&self.reddit.password, "reddit.password")?,
            client_id: required(&self.reddit.client_id, "reddit.client_id")?,
            client_secret: required(&self.reddit.client_secret, "reddit.client_secret")?,
            user_agent: self.reddit.user_agent.clone().unwrap_or_else(|| {
                format!(
                    "ficbot/{} (by /u/{})",
                    env!("CARGO_PKG_VERSION"),
                    self.reddit.username
                )
            }),
        })
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            bot_username: self.reddit.username.clone(),
            subreddits: self.resolved_subreddits(),
            dry_run: self.dry_run,
            story_limit: self.limits.story_limit,
            limits: ComposeLimits {
                max_message_size: self.limits.max_message_size,
                min_content: self.limits.min_content,
            },
            chunk_pacing: Duration::from_secs(self.timing.chunk_pacing_secs),
            reply_pacing: Duration::from_secs(self.timing.reply_pacing_secs),
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            mode: if self.streams {
                Mode::Streaming
            } else {
                Mode::Polling
            },
            poll_interval: Duration::from_secs(self.timing.poll_interval_secs),
            error_backoff: Duration::from_secs(self.timing.error_backoff_secs),
            submission_limit: self.limits.submission_limit,
            comment_limit: self.limits.comment_limit,
            stream_limit: self.limits.stream_limit,
        }
    }

    pub fn quota_window(&self) -> Duration {
        Duration::from_secs(self.quota.window_secs)
    }

    pub fn stream_poll_interval(&self) -> Duration {
        Duration::from_secs(self.timing.stream_poll_secs)
    }
}
