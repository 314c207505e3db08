//! AI chat assistant backed by the Gemini API.
//!
//! The frontend posts a visitor's message (plus recent history) and gets a
//! single reply. The model is primed with a system instruction built from the
//! profile and the portfolio records, so answers stay about the site owner.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, ... capped at 32s)
//! - Other 4xx → fail immediately
//! - Network errors → retry
//!
//! # Environment Variables
//!
//! - `GEMINI_API_KEY` — required when `chat.provider = "gemini"`.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

use crate::config::ChatConfig;
use crate::models::Document;

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const MAX_MESSAGE_CHARS: usize = 2000;

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "assistant", alias = "bot")]
    Model,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub model: String,
}

impl ChatRequest {
    pub fn validate(&self) -> std::result::Result<(), String> {
        let message = self.message.trim();
        if message.is_empty() {
            return Err("message must not be empty".to_string());
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(format!(
                "message must be at most {} characters",
                MAX_MESSAGE_CHARS
            ));
        }
        Ok(())
    }
}

/// Summarise the portfolio for the model's system instruction.
pub fn build_system_prompt(doc: &Document) -> String {
    let profile = &doc.profile;
    let owner = if profile.name.is_empty() {
        "the site owner"
    } else {
        profile.name.as_str()
    };

    let mut prompt = format!(
        "You are the assistant on {}'s portfolio website. Answer questions about {}'s \
         work, skills and content using only the information below. If something is not \
         covered, say so and suggest using the contact form.\n",
        owner, owner
    );

    if !profile.title.is_empty() {
        prompt.push_str(&format!("\nRole: {}\n", profile.title));
    }
    if !profile.bio.is_empty() {
        prompt.push_str(&format!("Bio: {}\n", profile.bio));
    }
    if let Some(ref location) = profile.location {
        prompt.push_str(&format!("Location: {}\n", location));
    }
    if !profile.skills.is_empty() {
        prompt.push_str(&format!("Skills: {}\n", profile.skills.join(", ")));
    }

    if !doc.projects.is_empty() {
        prompt.push_str("\nProjects:\n");
        for p in &doc.projects {
            prompt.push_str(&format!("- {}", p.title));
            if !p.technologies.is_empty() {
                prompt.push_str(&format!(" [{}]", p.technologies.join(", ")));
            }
            if !p.description.is_empty() {
                prompt.push_str(&format!(": {}", p.description));
            }
            prompt.push('\n');
        }
    }

    if !doc.content.is_empty() {
        prompt.push_str("\nContent:\n");
        for c in &doc.content {
            prompt.push_str(&format!("- {}", c.title));
            if let Some(ref platform) = c.platform {
                prompt.push_str(&format!(" ({})", platform));
            }
            prompt.push('\n');
        }
    }

    prompt
}

/// Gemini `generateContent` request body.
pub fn build_request_body(
    config: &ChatConfig,
    system_prompt: &str,
    request: &ChatRequest,
) -> Value {
    let skip = request.history.len().saturating_sub(config.history_turns);
    let mut contents: Vec<Value> = request
        .history
        .iter()
        .skip(skip)
        .filter(|t| !t.text.trim().is_empty())
        .map(|t| {
            json!({
                "role": t.role,
                "parts": [{ "text": t.text }],
            })
        })
        .collect();
    contents.push(json!({
        "role": Role::User,
        "parts": [{ "text": request.message.trim() }],
    }));

    json!({
        "systemInstruction": { "parts": [{ "text": system_prompt }] },
        "contents": contents,
    })
}

/// Ask the configured provider for a reply.
pub async fn complete(config: &ChatConfig, doc: &Document, request: &ChatRequest) -> Result<ChatReply> {
    match config.provider.as_str() {
        "gemini" => complete_gemini(config, doc, request).await,
        "disabled" => bail!("Chat provider is disabled"),
        other => bail!("Unknown chat provider: {}", other),
    }
}

async fn complete_gemini(
    config: &ChatConfig,
    doc: &Document,
    request: &ChatRequest,
) -> Result<ChatReply> {
    let api_key =
        std::env::var("GEMINI_API_KEY").map_err(|_| anyhow::anyhow!("GEMINI_API_KEY not set"))?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("chat.model required"))?;

    let endpoint = config
        .endpoint
        .as_deref()
        .unwrap_or(DEFAULT_ENDPOINT)
        .trim_end_matches('/');
    let url = format!("{}/models/{}:generateContent", endpoint, model);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = build_request_body(config, &build_system_prompt(doc), request);

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(&url)
            .header("x-goog-api-key", &api_key)
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: Value = response.json().await?;
                    let reply = parse_gemini_response(&json)?;
                    return Ok(ChatReply {
                        reply,
                        model: model.clone(),
                    });
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    warn!(attempt, %status, "gemini request failed, retrying");
                    last_err = Some(anyhow::anyhow!("Gemini API error {}: {}", status, body_text));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("Gemini API error {}: {}", status, body_text);
            }
            Err(e) => {
                warn!(attempt, error = %e, "gemini request failed, retrying");
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Chat request failed after retries")))
}

/// Concatenate the text parts of the first candidate.
fn parse_gemini_response(json: &Value) -> Result<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            let reason = json
                .pointer("/promptFeedback/blockReason")
                .and_then(|r| r.as_str())
                .unwrap_or("missing candidates");
            anyhow::anyhow!("Invalid Gemini response: {}", reason)
        })?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        bail!("Invalid Gemini response: empty reply");
    }
    Ok(text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> Document {
        serde_json::from_value(json!({
            "profile": {
                "name": "Ada",
                "title": "Systems engineer",
                "skills": ["Rust", "Go"]
            },
            "projects": [
                { "id": "p1", "title": "Log shipper", "description": "Ships logs", "technologies": ["Rust"] }
            ],
            "content": [
                { "id": "c1", "title": "Async explained", "platform": "YouTube" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_system_prompt_mentions_portfolio() {
        let prompt = build_system_prompt(&sample_doc());
        assert!(prompt.contains("Ada's portfolio"));
        assert!(prompt.contains("Skills: Rust, Go"));
        assert!(prompt.contains("- Log shipper [Rust]: Ships logs"));
        assert!(prompt.contains("- Async explained (YouTube)"));
    }

    #[test]
    fn test_system_prompt_without_profile() {
        let prompt = build_system_prompt(&Document::default());
        assert!(prompt.contains("the site owner"));
        assert!(!prompt.contains("Projects:"));
    }

    #[test]
    fn test_request_body_keeps_recent_history() {
        let config = ChatConfig {
            history_turns: 2,
            ..Default::default()
        };
        let request: ChatRequest = serde_json::from_value(json!({
            "message": " What do you build? ",
            "history": [
                { "role": "user", "text": "one" },
                { "role": "assistant", "text": "two" },
                { "role": "user", "text": "three" }
            ]
        }))
        .unwrap();

        let body = build_request_body(&config, "sys", &request);
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "model");
        assert_eq!(contents[0]["parts"][0]["text"], "two");
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(contents[2]["parts"][0]["text"], "What do you build?");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
    }

    #[test]
    fn test_validate_message() {
        let empty = ChatRequest {
            message: "   ".to_string(),
            history: vec![],
        };
        assert!(empty.validate().is_err());

        let long = ChatRequest {
            message: "x".repeat(MAX_MESSAGE_CHARS + 1),
            history: vec![],
        };
        assert!(long.validate().is_err());
    }

    #[test]
    fn test_parse_gemini_response() {
        let json = json!({
            "candidates": [
                { "content": { "parts": [{ "text": "Hello " }, { "text": "there" }] } }
            ]
        });
        assert_eq!(parse_gemini_response(&json).unwrap(), "Hello there");

        let blocked = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        let err = parse_gemini_response(&blocked).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let config = ChatConfig::default();
        let request = ChatRequest {
            message: "hi".to_string(),
            history: vec![],
        };
        let err = complete(&config, &Document::default(), &request)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    use axum::{extract::State, http::HeaderMap, http::StatusCode, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Mock Gemini endpoint answering with `statuses` in turn, then 200.
    #[derive(Clone)]
    struct MockGemini {
        calls: Arc<AtomicUsize>,
        statuses: Arc<Vec<u16>>,
    }

    async fn mock_generate(
        State(mock): State<MockGemini>,
        headers: HeaderMap,
    ) -> (StatusCode, Json<Value>) {
        let n = mock.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(
            headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()),
            Some("test-key")
        );
        match mock.statuses.get(n) {
            Some(&code) => (
                StatusCode::from_u16(code).unwrap(),
                Json(json!({ "error": { "code": code } })),
            ),
            None => (
                StatusCode::OK,
                Json(json!({
                    "candidates": [{ "content": { "parts": [{ "text": "Hi from Ada's bot" }] } }]
                })),
            ),
        }
    }

    async fn spawn_gemini(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = Router::new().fallback(mock_generate).with_state(MockGemini {
            calls: calls.clone(),
            statuses: Arc::new(statuses),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), calls)
    }

    fn gemini_config(endpoint: String, max_retries: u32) -> ChatConfig {
        std::env::set_var("GEMINI_API_KEY", "test-key");
        ChatConfig {
            provider: "gemini".to_string(),
            model: Some("gemini-test".to_string()),
            timeout_secs: 5,
            max_retries,
            endpoint: Some(endpoint),
            ..Default::default()
        }
    }

    fn hello() -> ChatRequest {
        ChatRequest {
            message: "hello".to_string(),
            history: vec![],
        }
    }

    #[tokio::test]
    async fn test_gemini_retries_server_errors() {
        let (endpoint, calls) = spawn_gemini(vec![503]).await;
        let config = gemini_config(endpoint, 3);

        let reply = complete(&config, &Document::default(), &hello())
            .await
            .unwrap();
        assert_eq!(reply.reply, "Hi from Ada's bot");
        assert_eq!(reply.model, "gemini-test");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gemini_gives_up_after_max_retries() {
        let (endpoint, calls) = spawn_gemini(vec![429, 500, 500]).await;
        let config = gemini_config(endpoint, 1);

        let err = complete(&config, &Document::default(), &hello())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"), "got: {}", err);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gemini_fails_fast_on_client_error() {
        let (endpoint, calls) = spawn_gemini(vec![400]).await;
        let config = gemini_config(endpoint, 3);

        let err = complete(&config, &Document::default(), &hello())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("400"), "got: {}", err);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
