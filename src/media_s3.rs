//! S3-compatible media backend.
//!
//! Uploads and deletes objects with the S3 REST API, signing each request
//! with AWS Signature V4 (`hmac` + `sha2`). Works against AWS S3 and any
//! S3-compatible service reachable through `endpoint_url` (MinIO, Google
//! Cloud Storage interoperability, Cloudflare R2).
//!
//! # Configuration
//!
//! ```toml
//! [media]
//! backend = "s3"
//!
//! [media.s3]
//! bucket = "portfolio-media"
//! region = "us-east-1"
//! prefix = "uploads/"
//! # endpoint_url = "http://localhost:9000"          # path-style addressing
//! # public_base_url = "https://cdn.example.com/uploads"
//! ```
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID` — required
//! - `AWS_SECRET_ACCESS_KEY` — required
//! - `AWS_SESSION_TOKEN` — optional
//!
//! Objects are expected to be publicly readable (bucket policy or CDN); the
//! returned URL is `<public_base>/<name>`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::config::S3MediaConfig;
use crate::media::{hex_sha256, MediaError, MediaStore, StoredMedia};

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
#[derive(Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(access_key_id: &str, secret_access_key: &str, session_token: Option<&str>) -> Self {
        Self {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            session_token: session_token.map(str::to_string),
        }
    }

    /// Load credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// and optionally `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// Media stored as objects in an S3-compatible bucket.
pub struct S3MediaStore {
    config: S3MediaConfig,
    creds: AwsCredentials,
    client: reqwest::Client,
    public_base: String,
}

impl S3MediaStore {
    pub fn new(config: S3MediaConfig, creds: AwsCredentials) -> Self {
        let public_base = public_base_for(&config);
        Self {
            config,
            creds,
            client: reqwest::Client::new(),
            public_base,
        }
    }

    pub fn from_env(config: S3MediaConfig) -> Result<Self> {
        Ok(Self::new(config, AwsCredentials::from_env()?))
    }

    /// Full object key for a stored name.
    fn object_key(&self, name: &str) -> String {
        let prefix = self.config.prefix.trim_matches('/');
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        }
    }

    async fn send_signed(
        &self,
        method: reqwest::Method,
        key: &str,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) -> Result<reqwest::Response> {
        let target = ObjectTarget::new(&self.config, key);
        let payload_hash = hex_sha256(&body);
        let signed = sign_request(
            method.as_str(),
            &target,
            &payload_hash,
            &self.config.region,
            &self.creds,
            Utc::now(),
        );

        let mut req = self
            .client
            .request(method, &target.url)
            .header("Authorization", &signed.authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &signed.amz_date);
        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }
        if let Some(ct) = content_type {
            req = req.header("Content-Type", ct);
        }

        req.body(body)
            .send()
            .await
            .with_context(|| format!("S3 request failed for s3://{}/{}", self.config.bucket, key))
    }
}

#[async_trait]
impl MediaStore for S3MediaStore {
    fn backend(&self) -> &'static str {
        "s3"
    }

    fn public_base(&self) -> &str {
        &self.public_base
    }

    async fn put(
        &self,
        name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredMedia, MediaError> {
        let key = self.object_key(name);
        let size = bytes.len() as u64;
        let sha256 = hex_sha256(&bytes);

        let resp = self
            .send_signed(reqwest::Method::PUT, &key, Some(content_type), bytes)
            .await
            .map_err(|e| MediaError::Backend(format!("{:#}", e)))?;
        check_status(resp, "PutObject", &key)
            .await
            .map_err(|e| MediaError::Backend(format!("{:#}", e)))?;

        debug!(bucket = %self.config.bucket, key = %key, size, "stored media object");

        Ok(StoredMedia {
            name: name.to_string(),
            url: self.url_for(name),
            content_type: content_type.to_string(),
            size,
            sha256: Some(sha256),
            original_name: None,
        })
    }

    async fn delete(&self, name: &str) -> Result<(), MediaError> {
        let key = self.object_key(name);
        let resp = self
            .send_signed(reqwest::Method::DELETE, &key, None, Vec::new())
            .await
            .map_err(|e| MediaError::Backend(format!("{:#}", e)))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(MediaError::NotFound(name.to_string()));
        }
        check_status(resp, "DeleteObject", &key)
            .await
            .map_err(|e| MediaError::Backend(format!("{:#}", e)))
    }

    async fn list(&self) -> Result<Vec<StoredMedia>, MediaError> {
        Err(MediaError::Unsupported("s3"))
    }
}

async fn check_status(resp: reqwest::Response, op: &str, key: &str) -> Result<()> {
    if resp.status().is_success() {
        return Ok(());
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    bail!(
        "S3 {} failed (HTTP {}) for key '{}': {}",
        op,
        status,
        key,
        body.chars().take(500).collect::<String>()
    );
}

// ============ Addressing ============

/// Where a signed request goes.
struct ObjectTarget {
    host: String,
    canonical_uri: String,
    url: String,
}

impl ObjectTarget {
    /// Virtual-hosted style for AWS, path style for custom endpoints.
    fn new(config: &S3MediaConfig, key: &str) -> Self {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        match config.endpoint_url {
            Some(ref endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                let canonical_uri = format!("/{}/{}", uri_encode(&config.bucket), encoded_key);
                let url = format!("{}://{}{}", scheme, host, canonical_uri);
                Self {
                    host,
                    canonical_uri,
                    url,
                }
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", config.bucket, config.region);
                let canonical_uri = format!("/{}", encoded_key);
                let url = format!("https://{}{}", host, canonical_uri);
                Self {
                    host,
                    canonical_uri,
                    url,
                }
            }
        }
    }
}

/// Public URL prefix for objects in the bucket.
fn public_base_for(config: &S3MediaConfig) -> String {
    if let Some(ref base) = config.public_base_url {
        return base.trim_end_matches('/').to_string();
    }
    let root = match config.endpoint_url {
        Some(ref endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), config.bucket),
        None => format!("https://{}.s3.{}.amazonaws.com", config.bucket, config.region),
    };
    let prefix = config.prefix.trim_matches('/');
    if prefix.is_empty() {
        root
    } else {
        format!("{}/{}", root, prefix)
    }
}

// ============ AWS SigV4 ============

struct SignedHeaders {
    authorization: String,
    amz_date: String,
}

/// Compute the SigV4 `Authorization` header for a request without a query string.
fn sign_request(
    method: &str,
    target: &ObjectTarget,
    payload_hash: &str,
    region: &str,
    creds: &AwsCredentials,
    now: DateTime<Utc>,
) -> SignedHeaders {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers = vec![
        ("host".to_string(), target.host.clone()),
        ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(ref token) = creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        method, target.canonical_uri, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    SignedHeaders {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        ),
        amz_date,
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the SigV4 signing key.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding; leaves `A-Z a-z 0-9 - _ . ~` untouched.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
