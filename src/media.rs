//! Media asset storage and URL resolution.
//!
//! Uploaded images and videos are written through a [`MediaStore`]:
//! - **[`LocalMediaStore`]** — files in the configured uploads directory,
//!   served by the HTTP server under `uploads.public_base`.
//! - **[`S3MediaStore`](crate::media_s3::S3MediaStore)** — objects in an
//!   S3-compatible bucket.
//!
//! Records reference media loosely: a full URL, a `/uploads/...` path, or a
//! bare stored file name. [`MediaResolver`] turns any of those into the URL a
//! browser can fetch.
//!
//! # Stored names
//!
//! ```text
//! <unix-millis>-<8 hex>-<sanitised stem>.<ext>
//! 1718031234567-3f2a9c1e-hero-shot.png
//! ```

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::{Config, UploadsConfig};
use crate::media_s3::S3MediaStore;

/// Record fields that hold media references.
pub const MEDIA_FIELDS: &[&str] = &["image", "images", "video", "thumbnail", "avatar", "resume"];

const MAX_STEM_LEN: usize = 40;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("upload is empty")]
    Empty,

    #[error("upload is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },

    #[error("content type not allowed: {0}")]
    UnsupportedType(String),

    #[error("invalid media name: {0}")]
    InvalidName(String),

    #[error("invalid upload data: {0}")]
    InvalidData(String),

    #[error("media not found: {0}")]
    NotFound(String),

    #[error("listing is not supported by the {0} backend")]
    Unsupported(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A stored media object.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredMedia {
    pub name: String,
    pub url: String,
    pub content_type: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
}

/// Backend that persists uploaded media.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Backend identifier (`"local"`, `"s3"`).
    fn backend(&self) -> &'static str;

    /// Base URL that stored names are appended to.
    fn public_base(&self) -> &str;

    /// Store `bytes` under `name`. `name` has already been validated.
    async fn put(
        &self,
        name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredMedia, MediaError>;

    async fn delete(&self, name: &str) -> Result<(), MediaError>;

    async fn list(&self) -> Result<Vec<StoredMedia>, MediaError>;

    fn url_for(&self, name: &str) -> String {
        format!("{}/{}", self.public_base().trim_end_matches('/'), name)
    }
}

/// Instantiate the media store selected by `media.backend`.
pub fn create_media_store(config: &Config) -> anyhow::Result<Arc<dyn MediaStore>> {
    match config.media.backend.as_str() {
        "local" => Ok(Arc::new(LocalMediaStore::new(
            config.uploads.dir.clone(),
            config.uploads.public_base.clone(),
        ))),
        "s3" => {
            let s3 = config
                .media
                .s3
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("media.backend = \"s3\" requires [media.s3]"))?;
            Ok(Arc::new(S3MediaStore::from_env(s3.clone())?))
        }
        other => anyhow::bail!("Unknown media backend: {}", other),
    }
}

// ============ Local filesystem ============

/// Media stored as plain files in the uploads directory.
pub struct LocalMediaStore {
    dir: PathBuf,
    public_base: String,
}

impl LocalMediaStore {
    pub fn new(dir: PathBuf, public_base: String) -> Self {
        Self { dir, public_base }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    fn backend(&self) -> &'static str {
        "local"
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
        tokio::fs::create_dir_all(&self.dir).await?;
        let size = bytes.len() as u64;
        let sha256 = hex_sha256(&bytes);
        tokio::fs::write(self.dir.join(name), bytes).await?;

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
        match tokio::fs::remove_file(self.dir.join(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MediaError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<StoredMedia>, MediaError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut items = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| MediaError::Backend(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            items.push(StoredMedia {
                url: self.url_for(&name),
                content_type: content_type_for_name(&name).to_string(),
                name,
                size,
                sha256: None,
                original_name: None,
            });
        }

        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }
}

// ============ Upload policy ============

/// Content-type and size limits applied to every upload.
pub struct UploadPolicy {
    allowed: GlobSet,
    max_bytes: usize,
}

impl UploadPolicy {
    pub fn from_config(uploads: &UploadsConfig) -> anyhow::Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &uploads.allowed_types {
            builder.add(Glob::new(&pattern.to_lowercase())?);
        }
        Ok(Self {
            allowed: builder.build()?,
            max_bytes: uploads.max_bytes,
        })
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn check(&self, content_type: &str, size: usize) -> Result<(), MediaError> {
        if size == 0 {
            return Err(MediaError::Empty);
        }
        if size > self.max_bytes {
            return Err(MediaError::TooLarge {
                size,
                max: self.max_bytes,
            });
        }
        if !self.allowed.is_match(content_type) {
            return Err(MediaError::UnsupportedType(content_type.to_string()));
        }
        Ok(())
    }
}

/// Validate, name, and store one upload.
///
/// `declared_type` comes from the client and is ignored when missing or
/// generic (`application/octet-stream`); the file extension decides instead.
pub async fn store_upload(
    store: &dyn MediaStore,
    policy: &UploadPolicy,
    original_name: Option<&str>,
    declared_type: Option<&str>,
    bytes: Vec<u8>,
) -> Result<StoredMedia, MediaError> {
    let content_type = effective_content_type(declared_type, original_name);
    policy.check(&content_type, bytes.len())?;

    let name = stored_name(original_name, &content_type);
    let mut stored = store.put(&name, &content_type, bytes).await?;
    stored.original_name = original_name.map(str::to_string);
    Ok(stored)
}

fn effective_content_type(declared: Option<&str>, original_name: Option<&str>) -> String {
    let declared = declared
        .map(normalize_content_type)
        .filter(|t| !t.is_empty() && t != "application/octet-stream");
    match declared {
        Some(t) => t,
        None => original_name
            .map(content_type_for_name)
            .unwrap_or("application/octet-stream")
            .to_string(),
    }
}

/// Lower-case a MIME type and drop any parameters (`; charset=...`).
pub fn normalize_content_type(raw: &str) -> String {
    raw.split(';').next().unwrap_or("").trim().to_lowercase()
}

// ============ Naming ============

/// Build a unique, filesystem-safe name for an upload.
pub fn stored_name(original_name: Option<&str>, content_type: &str) -> String {
    let (stem, ext) = match original_name {
        Some(name) => split_name(name),
        None => (String::new(), None),
    };
    let stem = if stem.is_empty() {
        "upload".to_string()
    } else {
        stem
    };
    let ext = ext
        .or_else(|| extension_for_type(content_type).map(str::to_string))
        .unwrap_or_else(|| "bin".to_string());

    let unique = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}.{}",
        Utc::now().timestamp_millis(),
        &unique[..8],
        stem,
        ext
    )
}

/// Split a client file name into a sanitised stem and extension.
fn split_name(name: &str) -> (String, Option<String>) {
    // Browsers on Windows may send full paths.
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (base, None),
    };

    let mut clean = String::new();
    let mut last_dash = false;
    for ch in stem.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            clean.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash && !clean.is_empty() {
            clean.push('-');
            last_dash = true;
        }
        if clean.len() >= MAX_STEM_LEN {
            break;
        }
    }
    let clean = clean.trim_end_matches('-').to_string();

    let ext = ext
        .map(|e| {
            e.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|e| !e.is_empty() && e.len() <= 10);

    (clean, ext)
}

/// Reject names that could escape the uploads directory.
pub fn validate_name(name: &str) -> Result<(), MediaError> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.chars().any(|c| c.is_control())
    {
        return Err(MediaError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn extension_for_type(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/avif" => Some("avif"),
        "image/svg+xml" => Some("svg"),
        "video/mp4" => Some("mp4"),
        "video/webm" => Some("webm"),
        "video/quicktime" => Some("mov"),
        "application/pdf" => Some("pdf"),
        _ => None,
    }
}

/// Guess a MIME type from a file extension.
pub fn content_type_for_name(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_lowercase());
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("avif") => "image/avif",
        Some("svg") => "image/svg+xml",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

// ============ Base64 uploads ============

/// Decode a `data:<type>;base64,<payload>` URL or a bare base64 payload.
///
/// Returns the declared content type (if any) and the decoded bytes.
pub fn decode_data_url(data: &str) -> Result<(Option<String>, Vec<u8>), MediaError> {
    let data = data.trim();
    let (content_type, payload) = match data.strip_prefix("data:") {
        Some(rest) => {
            let (meta, payload) = rest
                .split_once(',')
                .ok_or_else(|| MediaError::InvalidData("data URL has no payload".to_string()))?;
            let mut parts = meta.split(';');
            let content_type = parts.next().map(normalize_content_type);
            if !parts.any(|p| p.eq_ignore_ascii_case("base64")) {
                return Err(MediaError::InvalidData(
                    "only base64 data URLs are supported".to_string(),
                ));
            }
            (content_type.filter(|t| !t.is_empty()), payload)
        }
        None => (None, data),
    };

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| MediaError::InvalidData(e.to_string()))?;
    Ok((content_type, bytes))
}

// ============ Resolution ============

/// Turns stored media references into fetchable URLs.
#[derive(Debug, Clone)]
pub struct MediaResolver {
    public_base: String,
}

impl MediaResolver {
    pub fn new(public_base: &str) -> Self {
        Self {
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }

    /// Resolve one reference.
    ///
    /// Absolute URLs (`http(s)://`, protocol-relative, `data:`) and absolute
    /// paths outside `/uploads/` are returned unchanged. `/uploads/x`,
    /// `uploads/x` and bare `x` resolve to `<public_base>/x`.
    pub fn resolve(&self, reference: &str) -> Option<String> {
        let r = reference.trim();
        if r.is_empty() {
            return None;
        }
        if r.starts_with("http://")
            || r.starts_with("https://")
            || r.starts_with("//")
            || r.starts_with("data:")
        {
            return Some(r.to_string());
        }

        let rest = if let Some(rest) = r.strip_prefix("/uploads/") {
            rest
        } else if let Some(rest) = r.strip_prefix("uploads/") {
            rest
        } else if r.starts_with('/') {
            return Some(r.to_string());
        } else {
            r
        };
        Some(format!("{}/{}", self.public_base, rest))
    }

    /// Resolve the media fields of a serialized record in place.
    ///
    /// Empty string references become `null`; empty entries are dropped
    /// from arrays.
    pub fn resolve_value(&self, value: &mut Value) {
        let Value::Object(map) = value else {
            return;
        };
        for field in MEDIA_FIELDS {
            let Some(slot) = map.get_mut(*field) else {
                continue;
            };
            match slot {
                Value::String(s) => {
                    *slot = match self.resolve(s) {
                        Some(url) => Value::String(url),
                        None => Value::Null,
                    };
                }
                Value::Array(items) => {
                    let resolved: Vec<Value> = items
                        .iter()
                        .filter_map(|v| v.as_str())
                        .filter_map(|s| self.resolve(s))
                        .map(Value::String)
                        .collect();
                    *items = resolved;
                }
                _ => {}
            }
        }
    }
}

pub(crate) fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn policy() -> UploadPolicy {
        UploadPolicy::from_config(&UploadsConfig {
            max_bytes: 16,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_policy_checks() {
        let p = policy();
        assert!(p.check("image/png", 10).is_ok());
        assert!(p.check("video/mp4", 16).is_ok());
        assert!(matches!(p.check("image/png", 0), Err(MediaError::Empty)));
        assert!(matches!(
            p.check("image/png", 17),
            Err(MediaError::TooLarge { size: 17, max: 16 })
        ));
        assert!(matches!(
            p.check("application/x-msdownload", 4),
            Err(MediaError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_stored_name_shape() {
        let name = stored_name(Some("C:\\Users\\me\\My Hero Shot!.PNG"), "image/png");
        let parts: Vec<&str> = name.splitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2], "my-hero-shot.png");
        assert!(validate_name(&name).is_ok());
    }

    #[test]
    fn test_stored_name_falls_back_to_type() {
        let name = stored_name(None, "video/webm");
        assert!(name.ends_with("-upload.webm"));

        let name = stored_name(Some("..."), "application/unknown");
        assert!(name.ends_with("-upload.bin"), "{}", name);
    }

    #[test]
    fn test_stem_is_truncated() {
        let long = format!("{}.jpg", "a".repeat(100));
        let (stem, ext) = split_name(&long);
        assert_eq!(stem.len(), MAX_STEM_LEN);
        assert_eq!(ext.as_deref(), Some("jpg"));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("1-abc-photo.png").is_ok());
        for bad in ["", "../schema.json", "a/b.png", ".env", "a\\b", "x..y"] {
            assert!(validate_name(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_effective_content_type() {
        assert_eq!(
            effective_content_type(Some("IMAGE/PNG; charset=binary"), None),
            "image/png"
        );
        assert_eq!(
            effective_content_type(Some("application/octet-stream"), Some("clip.mp4")),
            "video/mp4"
        );
        assert_eq!(effective_content_type(None, Some("x")), "application/octet-stream");
    }

    #[test]
    fn test_decode_data_url() {
        let (ct, bytes) = decode_data_url("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(ct.as_deref(), Some("image/png"));
        assert_eq!(bytes, b"hello");

        let (ct, bytes) = decode_data_url("aGVsbG8=").unwrap();
        assert!(ct.is_none());
        assert_eq!(bytes, b"hello");

        assert!(decode_data_url("data:text/plain,hello").is_err());
        assert!(decode_data_url("data:image/png;base64,!!!").is_err());
    }

    #[test]
    fn test_resolve_rules() {
        let r = MediaResolver::new("/uploads/");
        assert_eq!(r.resolve("a.png").as_deref(), Some("/uploads/a.png"));
        assert_eq!(r.resolve("/uploads/a.png").as_deref(), Some("/uploads/a.png"));
        assert_eq!(r.resolve("uploads/a.png").as_deref(), Some("/uploads/a.png"));
        assert_eq!(r.resolve("/images/logo.svg").as_deref(), Some("/images/logo.svg"));
        assert_eq!(
            r.resolve("https://cdn.example.com/a.png").as_deref(),
            Some("https://cdn.example.com/a.png")
        );
        assert_eq!(r.resolve("  ").as_deref(), None);

        let cdn = MediaResolver::new("https://media.example.com/portfolio");
        assert_eq!(
            cdn.resolve("/uploads/a.png").as_deref(),
            Some("https://media.example.com/portfolio/a.png")
        );
    }

    #[test]
    fn test_resolve_value() {
        let r = MediaResolver::new("/uploads");
        let mut v = json!({
            "title": "x.png",
            "image": "x.png",
            "images": ["a.png", "", "https://e.com/b.png"],
            "video": ""
        });
        r.resolve_value(&mut v);
        assert_eq!(v["title"], json!("x.png"));
        assert_eq!(v["image"], json!("/uploads/x.png"));
        assert_eq!(v["images"], json!(["/uploads/a.png", "https://e.com/b.png"]));
        assert_eq!(v["video"], Value::Null);
    }

    #[tokio::test]
    async fn test_local_store_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = LocalMediaStore::new(tmp.path().join("uploads"), "/uploads".to_string());
        let policy = UploadPolicy::from_config(&UploadsConfig::default()).unwrap();

        assert!(store.list().await.unwrap().is_empty());

        let stored = store_upload(
            &store,
            &policy,
            Some("cover.jpg"),
            Some("image/jpeg"),
            b"jpegbytes".to_vec(),
        )
        .await
        .unwrap();
        assert!(stored.url.starts_with("/uploads/"));
        assert!(stored.name.ends_with("-cover.jpg"));
        assert_eq!(stored.size, 9);
        assert_eq!(stored.original_name.as_deref(), Some("cover.jpg"));
        assert!(store.dir().join(&stored.name).exists());

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].content_type, "image/jpeg");

        store.delete(&stored.name).await.unwrap();
        assert!(matches!(
            store.delete(&stored.name).await,
            Err(MediaError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_upload_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = LocalMediaStore::new(tmp.path().join("uploads"), "/uploads".to_string());
        let policy = UploadPolicy::from_config(&UploadsConfig::default()).unwrap();

        let err = store_upload(&store, &policy, Some("run.exe"), None, b"MZ".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedType(_)));
        assert!(!store.dir().exists());
    }
}
