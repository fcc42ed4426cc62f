//! # Billing Configuration
//!
//! Configuration for the billing services and the worker.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     MOVO_DATABASE_PATH=/var/lib/movo/billing.db                        │
//! │     MOVO_MAIL_PROVIDER=resend                                          │
//! │     MOVO_RESEND_API_KEY=re_...                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     --config <path>, or                                                │
//! │     ~/.config/billing/billing.toml (Linux)                             │
//! │     ~/Library/Application Support/com.movo.billing/billing.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     15-day trial, 30-day period, 3-day grace, log-only mailer          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # billing.toml
//! [policy]
//! trial_days = 15
//! period_length_days = 30
//! grace_days = 3
//!
//! [database]
//! path = "/var/lib/movo/billing.db"
//! max_connections = 5
//!
//! [mail]
//! provider = "resend"      # log | resend
//! from = "MOVOPos <billing@movopos.com>"
//! app_url = "https://app.movopos.com"
//! timeout_secs = 10
//!
//! [cycle]
//! interval_secs = 3600
//! concurrency = 8
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{BillingError, BillingResult};
use movo_core::{BillingPolicy, BRAND_NAME};

// =============================================================================
// Database Settings
// =============================================================================

/// Where the billing database lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseSettings {
    /// Resolved database path.
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("com", "movo", "billing")
                .map(|dirs| dirs.data_dir().join("billing.db"))
                .unwrap_or_else(|| PathBuf::from("billing.db"))
        })
    }
}

// =============================================================================
// Mail Settings
// =============================================================================

/// Which mailer delivers notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailProvider {
    /// Log messages instead of sending them (development).
    #[default]
    Log,

    /// Resend transactional email HTTP API.
    Resend,
}

impl std::fmt::Display for MailProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailProvider::Log => write!(f, "log"),
            MailProvider::Resend => write!(f, "resend"),
        }
    }
}

impl std::str::FromStr for MailProvider {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "log" | "console" => Ok(MailProvider::Log),
            "resend" => Ok(MailProvider::Resend),
            other => Err(BillingError::InvalidConfig(format!(
                "Unknown mail provider: '{}'. Valid options: log, resend",
                other
            ))),
        }
    }
}

/// Email delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailSettings {
    #[serde(default)]
    pub provider: MailProvider,

    /// API key for the Resend provider. Prefer `MOVO_RESEND_API_KEY`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Sender address.
    #[serde(default = "default_from")]
    pub from: String,

    /// Brand shown in subjects and headers.
    #[serde(default = "default_brand_name")]
    pub brand_name: String,

    /// Base URL of the web app; emails link to `{app_url}/billing`.
    #[serde(default = "default_app_url")]
    pub app_url: String,

    /// Upper bound for a single send.
    #[serde(default = "default_mail_timeout")]
    pub timeout_secs: u64,
}

fn default_from() -> String {
    format!("{} <billing@movopos.com>", BRAND_NAME)
}

fn default_brand_name() -> String {
    BRAND_NAME.to_string()
}

fn default_app_url() -> String {
    "https://app.movopos.com".to_string()
}

fn default_mail_timeout() -> u64 {
    10
}

impl Default for MailSettings {
    fn default() -> Self {
        MailSettings {
            provider: MailProvider::default(),
            api_key: None,
            from: default_from(),
            brand_name: default_brand_name(),
            app_url: default_app_url(),
            timeout_secs: default_mail_timeout(),
        }
    }
}

impl MailSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Link to the billing page.
    pub fn billing_url(&self) -> String {
        format!("{}/billing", self.app_url.trim_end_matches('/'))
    }
}

// =============================================================================
// Cycle Settings
// =============================================================================

/// Daily cycle and retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSettings {
    /// Interval between agent runs (seconds).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Accounts processed at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// First delay after a version conflict (milliseconds).
    #[serde(default = "default_retry_initial")]
    pub retry_initial_ms: u64,

    /// Longest delay between conflict retries (milliseconds).
    #[serde(default = "default_retry_max")]
    pub retry_max_ms: u64,

    /// Give up retrying a conflicted write after this long (milliseconds).
    #[serde(default = "default_retry_max_elapsed")]
    pub retry_max_elapsed_ms: u64,
}

fn default_interval() -> u64 {
    3600
}
fn default_concurrency() -> usize {
    8
}
fn default_retry_initial() -> u64 {
    10
}
fn default_retry_max() -> u64 {
    200
}
fn default_retry_max_elapsed() -> u64 {
    2000
}

impl Default for CycleSettings {
    fn default() -> Self {
        CycleSettings {
            interval_secs: default_interval(),
            concurrency: default_concurrency(),
            retry_initial_ms: default_retry_initial(),
            retry_max_ms: default_retry_max(),
            retry_max_elapsed_ms: default_retry_max_elapsed(),
        }
    }
}

impl CycleSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

// =============================================================================
// Main Billing Configuration
// =============================================================================

/// Complete billing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingConfig {
    #[serde(default)]
    pub policy: BillingPolicy,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub mail: MailSettings,

    #[serde(default)]
    pub cycle: CycleSettings,
}

impl BillingConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (billing.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> BillingResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading billing config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load billing config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> BillingResult<()> {
        self.policy
            .validate()
            .map_err(|e| BillingError::InvalidConfig(format!("policy: {}", e)))?;

        if self.cycle.concurrency == 0 {
            return Err(BillingError::InvalidConfig(
                "cycle.concurrency must be greater than 0".into(),
            ));
        }

        if self.cycle.interval_secs == 0 {
            return Err(BillingError::InvalidConfig(
                "cycle.interval_secs must be greater than 0".into(),
            ));
        }

        if self.mail.timeout_secs == 0 {
            return Err(BillingError::InvalidConfig(
                "mail.timeout_secs must be greater than 0".into(),
            ));
        }

        if !self.mail.app_url.starts_with("http://") && !self.mail.app_url.starts_with("https://")
        {
            return Err(BillingError::InvalidConfig(format!(
                "mail.app_url must start with http:// or https://, got: {}",
                self.mail.app_url
            )));
        }

        if self.mail.provider == MailProvider::Resend
            && self.mail.api_key.as_deref().map_or(true, str::is_empty)
        {
            return Err(BillingError::InvalidConfig(
                "mail.provider = \"resend\" requires an API key (MOVO_RESEND_API_KEY)".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("MOVO_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Ok(provider) = std::env::var("MOVO_MAIL_PROVIDER") {
            match provider.parse() {
                Ok(parsed) => self.mail.provider = parsed,
                Err(_) => warn!(provider = %provider, "Unknown mail provider in environment"),
            }
        }

        if let Ok(key) = std::env::var("MOVO_RESEND_API_KEY") {
            self.mail.api_key = Some(key);
        }

        if let Ok(from) = std::env::var("MOVO_MAIL_FROM") {
            self.mail.from = from;
        }

        if let Ok(url) = std::env::var("MOVO_APP_URL") {
            debug!(url = %url, "Overriding app URL from environment");
            self.mail.app_url = url;
        }

        if let Ok(interval) = std::env::var("MOVO_CYCLE_INTERVAL_SECS") {
            if let Ok(secs) = interval.parse::<u64>() {
                self.cycle.interval_secs = secs;
            }
        }

        if let Ok(concurrency) = std::env::var("MOVO_CYCLE_CONCURRENCY") {
            if let Ok(n) = concurrency.parse::<usize>() {
                self.cycle.concurrency = n;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "movo", "billing")
            .map(|dirs| dirs.config_dir().join("billing.toml"))
    }
}
