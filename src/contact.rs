//! Contact form handling.
//!
//! Accepted messages are always appended to a JSON-lines outbox so nothing
//! is lost when mail delivery is down. When `[contact].relay_url` is set the
//! message is also POSTed to that HTTP mail relay (any service that accepts a
//! JSON body and sends the email on our behalf).
//!
//! # Environment Variables
//!
//! - `CONTACT_RELAY_TOKEN` — optional bearer token sent to the relay.

use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::ContactConfig;

const MAX_MESSAGE_CHARS: usize = 5000;
const MAX_FIELD_CHARS: usize = 200;

/// A message submitted through the contact form.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContactMessage {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub message: String,
}

/// Outbox line: the message plus when it arrived.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboxEntry<'a> {
    #[serde(flatten)]
    message: &'a ContactMessage,
    received_at: String,
}

/// Why an accepted message could not be fully delivered.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Nothing was stored.
    #[error("failed to store contact message: {0:#}")]
    Outbox(anyhow::Error),

    /// Stored in the outbox, but the relay rejected it or was unreachable.
    #[error("contact message stored but relay failed: {0:#}")]
    Relay(anyhow::Error),
}

/// What happened to an accepted message.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub stored: bool,
    pub relayed: bool,
}

impl ContactMessage {
    /// Trim fields and check them. Returns the first problem found.
    pub fn validate(mut self) -> std::result::Result<Self, String> {
        self.name = self.name.trim().to_string();
        self.email = self.email.trim().to_string();
        self.message = self.message.trim().to_string();
        self.subject = self
            .subject
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        if self.name.is_empty() {
            return Err("name is required".to_string());
        }
        if self.email.is_empty() {
            return Err("email is required".to_string());
        }
        if self.message.is_empty() {
            return Err("message is required".to_string());
        }
        if !is_valid_email(&self.email) {
            return Err(format!("invalid email address: {}", self.email));
        }
        if self.name.chars().count() > MAX_FIELD_CHARS
            || self
                .subject
                .as_ref()
                .is_some_and(|s| s.chars().count() > MAX_FIELD_CHARS)
        {
            return Err(format!(
                "name and subject must be at most {} characters",
                MAX_FIELD_CHARS
            ));
        }
        if self.message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(format!(
                "message must be at most {} characters",
                MAX_MESSAGE_CHARS
            ));
        }
        Ok(self)
    }
}

/// One `@`, non-empty local part, a dot inside the domain, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    !local.is_empty()
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        && !domain.ends_with('.')
}

/// Store a validated message and relay it if configured.
///
/// The outbox write happens first, so a [`DeliveryError::Relay`] always
/// means the message is already on disk.
pub async fn deliver(
    config: &ContactConfig,
    message: &ContactMessage,
) -> std::result::Result<Delivery, DeliveryError> {
    append_outbox(&config.outbox, message)
        .await
        .map_err(DeliveryError::Outbox)?;
    info!(from = %message.email, "contact message stored");

    let relayed = match config.relay_url {
        Some(ref url) => {
            relay(url, config.timeout_secs, message).await.map_err(|e| {
                warn!(error = %e, "contact relay failed");
                DeliveryError::Relay(e)
            })?;
            true
        }
        None => false,
    };

    Ok(Delivery {
        stored: true,
        relayed,
    })
}

async fn append_outbox(path: &Path, message: &ContactMessage) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let entry = OutboxEntry {
        message,
        received_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    };
    let mut line = serde_json::to_string(&entry)?;
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open contact outbox: {}", path.display()))?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

async fn relay(url: &str, timeout_secs: u64, message: &ContactMessage) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;

    let subject = message
        .subject
        .clone()
        .unwrap_or_else(|| format!("Portfolio contact from {}", message.name));
    let body = serde_json::json!({
        "name": message.name,
        "email": message.email,
        "replyTo": message.email,
        "subject": subject,
        "message": message.message,
    });

    let mut req = client.post(url).json(&body);
    if let Ok(token) = std::env::var("CONTACT_RELAY_TOKEN") {
        req = req.header("Authorization", format!("Bearer {}", token));
    }

    let resp = req.send().await.context("Failed to reach contact relay")?;
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        bail!(
            "contact relay returned {}: {}",
            status,
            text.chars().take(300).collect::<String>()
        );
    }
    Ok(())
}
