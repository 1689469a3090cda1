use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};

pub const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_UPLOAD_URL: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

pub const SCOPE_UPLOAD: &str = "https://www.googleapis.com/auth/youtube.upload";
pub const SCOPE_READONLY: &str = "https://www.googleapis.com/auth/youtube.readonly";

/// Resumable uploads want multiples of 256 KiB; 8 MiB keeps request count low
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Tube Relay - re-upload short videos to YouTube
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to the OAuth client secrets file downloaded from the developer console
    #[arg(short = 'i', long, env = "TUBE_RELAY_IDENTITY_FILE")]
    pub identity_file: Option<String>,

    /// Path where the user token is persisted
    #[arg(short = 't', long, env = "TUBE_RELAY_TOKEN_FILE")]
    pub token_file: Option<String>,

    /// Static API key for read-only access
    #[arg(short = 'k', long, env = "YOUTUBE_API_KEY")]
    pub api_key: Option<String>,

    /// Preferred tier (full, read-only, demo)
    #[arg(long, env = "TUBE_RELAY_TIER", default_value = "full")]
    pub tier: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Upload chunk size in bytes
    #[arg(long, env = "UPLOAD_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Maximum attempts per request before giving up
    #[arg(long, env = "HTTP_MAX_ATTEMPTS", default_value = "5")]
    pub max_attempts: u32,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "300")]
    pub http_timeout: u64,

    /// Channel to describe when no upload is requested (required with an API key)
    #[arg(long, env = "YOUTUBE_CHANNEL_ID")]
    pub channel_id: Option<String>,

    /// Video file to upload after authenticating
    #[arg(short = 'u', long)]
    pub upload: Option<PathBuf>,

    /// Title for the uploaded video
    #[arg(long)]
    pub title: Option<String>,

    /// Description for the uploaded video
    #[arg(long, default_value = "")]
    pub description: String,

    /// Comma separated tags
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Privacy status (private, unlisted, public)
    #[arg(long, default_value = "private")]
    pub privacy: String,

    /// Apply Shorts title/tag/description conventions
    #[arg(long)]
    pub shorts: bool,

    /// Remove the stored user token and exit
    #[arg(long)]
    pub logout: bool,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Persisted artifacts
    pub identity_file: PathBuf,
    pub token_file: PathBuf,

    // Read-only tier
    pub api_key: Option<String>,

    // Platform endpoints
    pub auth_url: String,
    pub token_url: String,
    pub upload_url: String,
    pub api_base_url: String,
    pub scopes: Vec<String>,

    // Token lifecycle
    pub token_refresh_threshold: u64,
    pub consent_timeout: u64,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub http_max_attempts: u32,
    pub retry_base_delay_ms: u64,

    // Upload
    pub upload_chunk_size: usize,

    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let dir = default_data_dir();
        Self {
            identity_file: dir.join("credentials.json"),
            token_file: dir.join("token.json"),
            api_key: None,
            auth_url: DEFAULT_AUTH_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            scopes: vec![SCOPE_UPLOAD.to_string(), SCOPE_READONLY.to_string()],
            token_refresh_threshold: 300,
            consent_timeout: 120,
            http_connect_timeout: 30,
            http_request_timeout: 300,
            http_max_attempts: 5,
            retry_base_delay_ms: 1000,
            upload_chunk_size: DEFAULT_CHUNK_SIZE,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<(Self, CliArgs)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let config = Self::from_args(&args);
        config.validate()?;

        Ok((config, args))
    }

    /// Build configuration from parsed arguments; endpoints may be overridden by env only
    pub fn from_args(args: &CliArgs) -> Self {
        let defaults = Self::default();

        Config {
            identity_file: args
                .identity_file
                .as_deref()
                .map(expand_tilde)
                .unwrap_or(defaults.identity_file),
            token_file: args
                .token_file
                .as_deref()
                .map(expand_tilde)
                .unwrap_or(defaults.token_file),
            api_key: args.api_key.clone().filter(|k| !k.trim().is_empty()),

            auth_url: env_or("OAUTH_AUTH_URL", defaults.auth_url),
            token_url: env_or("OAUTH_TOKEN_URL", defaults.token_url),
            upload_url: env_or("YOUTUBE_UPLOAD_URL", defaults.upload_url),
            api_base_url: env_or("YOUTUBE_API_BASE_URL", defaults.api_base_url),
            scopes: defaults.scopes,

            token_refresh_threshold: std::env::var("TOKEN_REFRESH_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.token_refresh_threshold),

            consent_timeout: std::env::var("CONSENT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.consent_timeout),

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.http_connect_timeout),

            http_request_timeout: args.http_timeout,
            http_max_attempts: args.max_attempts,

            retry_base_delay_ms: std::env::var("RETRY_BASE_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.retry_base_delay_ms),

            upload_chunk_size: args.chunk_size,
            log_level: args.log_level.clone(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.upload_chunk_size == 0 {
            return Err(Error::Configuration(
                "UPLOAD_CHUNK_SIZE must be greater than zero".to_string(),
            ));
        }

        if self.http_max_attempts == 0 {
            return Err(Error::Configuration(
                "HTTP_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        for (name, value) in [
            ("OAUTH_AUTH_URL", &self.auth_url),
            ("OAUTH_TOKEN_URL", &self.token_url),
            ("YOUTUBE_UPLOAD_URL", &self.upload_url),
            ("YOUTUBE_API_BASE_URL", &self.api_base_url),
        ] {
            Url::parse(value)
                .map_err(|e| Error::Configuration(format!("{} is not a valid URL: {}", name, e)))?;
        }

        Ok(())
    }

    pub fn refresh_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_refresh_threshold as i64)
    }

    pub fn consent_timeout(&self) -> Duration {
        Duration::from_secs(self.consent_timeout)
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

fn default_data_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tube-relay")
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
