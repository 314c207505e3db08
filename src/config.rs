//! TOML configuration parsing and validation.
//!
//! Every command reads a single file (default `./config/folio.toml`). Only
//! `[store]` and `[server]` are required; the other sections fall back to
//! defaults suitable for local development.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub contact: ContactConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Path of the JSON document (`schema.json`).
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Built frontend to serve at `/`, with `index.html` fallback.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadsConfig {
    #[serde(default = "default_uploads_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_public_base")]
    pub public_base: String,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: default_uploads_dir(),
            public_base: default_public_base(),
            max_bytes: default_max_bytes(),
            allowed_types: default_allowed_types(),
        }
    }
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("./uploads")
}
fn default_public_base() -> String {
    "/uploads".to_string()
}
fn default_max_bytes() -> usize {
    50 * 1024 * 1024
}
fn default_allowed_types() -> Vec<String> {
    vec!["image/*".to_string(), "video/*".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub s3: Option<S3MediaConfig>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            s3: None,
        }
    }
}

fn default_backend() -> String {
    "local".to_string()
}

impl MediaConfig {
    pub fn is_local(&self) -> bool {
        self.backend == "local"
    }
}

/// S3-compatible bucket used when `media.backend = "s3"`.
///
/// ```toml
/// [media.s3]
/// bucket = "portfolio-media"
/// region = "us-east-1"
/// prefix = "uploads/"
/// # endpoint_url = "http://localhost:9000"   # MinIO
/// # public_base_url = "https://cdn.example.com"
/// ```
#[derive(Debug, Deserialize, Clone)]
pub struct S3MediaConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub public_base_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContactConfig {
    #[serde(default = "default_outbox")]
    pub outbox: PathBuf,
    #[serde(default)]
    pub relay_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            outbox: default_outbox(),
            relay_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_outbox() -> PathBuf {
    PathBuf::from("./data/contact.jsonl")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    /// Overrides the Gemini API base URL (used by tests and proxies).
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            history_turns: default_history_turns(),
            endpoint: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_history_turns() -> usize {
    10
}

impl ChatConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate uploads
    if config.uploads.max_bytes == 0 {
        anyhow::bail!("uploads.max_bytes must be > 0");
    }
    if config.uploads.allowed_types.is_empty() {
        anyhow::bail!("uploads.allowed_types must list at least one content type");
    }

    // Validate media backend
    match config.media.backend.as_str() {
        "local" => {}
        "s3" => {
            if config.media.s3.is_none() {
                anyhow::bail!("media.backend = \"s3\" requires a [media.s3] section");
            }
        }
        other => anyhow::bail!(
            "Unknown media backend: '{}'. Must be local or s3.",
            other
        ),
    }

    // Validate chat
    match config.chat.provider.as_str() {
        "disabled" => {}
        "gemini" => {
            if config.chat.model.as_deref().map_or(true, str::is_empty) {
                anyhow::bail!("chat.model must be specified when provider is 'gemini'");
            }
        }
        other => anyhow::bail!(
            "Unknown chat provider: '{}'. Must be disabled or gemini.",
            other
        ),
    }

    Ok(config)
}
