//! JSON document store.
//!
//! All portfolio data lives in one JSON file. Every read parses the file from
//! disk; every mutation is a read-modify-write cycle that holds the store's
//! write lock and replaces the file atomically (write to a sibling temp file,
//! then rename), so concurrent requests never lose each other's updates and a
//! crash never leaves a truncated document behind.
//!
//! ```text
//! handler ──▶ Store::update::<Project>(id, patch)
//!               │  lock
//!               ├─ read schema.json ──▶ Document
//!               ├─ merge patch, refresh updatedAt
//!               ├─ write schema.json.tmp, rename
//!               └─ unlock
//! ```

use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::{ContentItem, Document, Profile, Project, Record, RecordKind};

/// Fields a patch may never overwrite.
const PROTECTED_FIELDS: &[&str] = &["id", "createdAt"];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: String },

    #[error("{kind} already exists: {id}")]
    Conflict { kind: RecordKind, id: String },

    #[error("{0}")]
    Invalid(String),

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Query filters for `GET /api/projects`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectFilter {
    pub featured: Option<bool>,
    pub category: Option<String>,
    pub technology: Option<String>,
}

impl ProjectFilter {
    pub fn matches(&self, project: &Project) -> bool {
        if let Some(featured) = self.featured {
            if project.featured != featured {
                return false;
            }
        }
        if let Some(ref category) = self.category {
            let hit = project
                .category
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(category));
            if !hit {
                return false;
            }
        }
        if let Some(ref tech) = self.technology {
            if !project
                .technologies
                .iter()
                .any(|t| t.eq_ignore_ascii_case(tech))
            {
                return false;
            }
        }
        true
    }
}

/// Query filters for `GET /api/content`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentFilter {
    pub featured: Option<bool>,
    pub platform: Option<String>,
    pub tag: Option<String>,
}

impl ContentFilter {
    pub fn matches(&self, item: &ContentItem) -> bool {
        if let Some(featured) = self.featured {
            if item.featured != featured {
                return false;
            }
        }
        if let Some(ref platform) = self.platform {
            let hit = item
                .platform
                .as_deref()
                .is_some_and(|p| p.eq_ignore_ascii_case(platform));
            if !hit {
                return false;
            }
        }
        if let Some(ref tag) = self.tag {
            if !item.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
                return false;
            }
        }
        true
    }
}

/// Handle to the JSON document on disk.
pub struct Store {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Store {
    /// Bind to a document path. No I/O happens until the first access.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the document (and its parent directory) if it does not exist.
    ///
    /// Returns `true` when a new file was written. Idempotent.
    pub async fn init(&self) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        if tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| self.io_err(e))?
        {
            // Refuse to report success over a corrupt file.
            self.read().await?;
            return Ok(false);
        }
        self.write(&Document::default()).await?;
        Ok(true)
    }

    /// Read the whole document.
    pub async fn snapshot(&self) -> StoreResult<Document> {
        self.read().await
    }

    // ============ Generic record operations ============

    pub async fn list<R: Record>(&self) -> StoreResult<Vec<R>> {
        let doc = self.read().await?;
        Ok(R::collection(&doc).clone())
    }

    pub async fn get<R: Record>(&self, id: &str) -> StoreResult<R> {
        let doc = self.read().await?;
        R::collection(&doc)
            .iter()
            .find(|r| r.id() == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: R::KIND,
                id: id.to_string(),
            })
    }

    /// Insert a new record built from client-supplied fields.
    ///
    /// A missing or empty `id` gets a fresh UUID; a supplied id that is
    /// already taken is a [`StoreError::Conflict`].
    pub async fn create<R: Record>(&self, fields: Value) -> StoreResult<R> {
        let fields = into_object(fields, R::KIND)?;
        let now = now_rfc3339();
        self.mutate(move |doc| {
            let record: R = build_record(fields, &now)?;
            let collection = R::collection_mut(doc);
            if collection.iter().any(|r| r.id() == record.id()) {
                return Err(StoreError::Conflict {
                    kind: R::KIND,
                    id: record.id().to_string(),
                });
            }
            collection.push(record.clone());
            Ok(record)
        })
        .await
    }

    /// Shallow-merge `patch` into an existing record.
    pub async fn update<R: Record>(&self, id: &str, patch: Value) -> StoreResult<R> {
        let patch = into_object(patch, R::KIND)?;
        let now = now_rfc3339();
        self.mutate(move |doc| {
            let collection = R::collection_mut(doc);
            let slot = collection
                .iter_mut()
                .find(|r| r.id() == id)
                .ok_or_else(|| StoreError::NotFound {
                    kind: R::KIND,
                    id: id.to_string(),
                })?;

            let mut fields = match serde_json::to_value(&*slot) {
                Ok(Value::Object(map)) => map,
                _ => return Err(StoreError::Invalid(format!("{} is not an object", R::KIND))),
            };
            merge_fields(&mut fields, patch);
            fields.insert("updatedAt".to_string(), Value::String(now));
            require_title(&fields, R::KIND)?;

            let updated: R = serde_json::from_value(Value::Object(fields))
                .map_err(|e| StoreError::Invalid(format!("invalid {}: {}", R::KIND, e)))?;
            *slot = updated.clone();
            Ok(updated)
        })
        .await
    }

    /// Remove a record, returning it.
    pub async fn delete<R: Record>(&self, id: &str) -> StoreResult<R> {
        self.mutate(|doc| {
            let collection = R::collection_mut(doc);
            let pos = collection
                .iter()
                .position(|r| r.id() == id)
                .ok_or_else(|| StoreError::NotFound {
                    kind: R::KIND,
                    id: id.to_string(),
                })?;
            Ok(collection.remove(pos))
        })
        .await
    }

    // ============ Projects ============

    pub async fn list_projects(&self, filter: &ProjectFilter) -> StoreResult<Vec<Project>> {
        let projects: Vec<Project> = self.list().await?;
        Ok(projects.into_iter().filter(|p| filter.matches(p)).collect())
    }

    pub async fn get_project(&self, id: &str) -> StoreResult<Project> {
        self.get(id).await
    }

    pub async fn create_project(&self, fields: Value) -> StoreResult<Project> {
        self.create(fields).await
    }

    pub async fn update_project(&self, id: &str, patch: Value) -> StoreResult<Project> {
        self.update(id, patch).await
    }

    pub async fn delete_project(&self, id: &str) -> StoreResult<Project> {
        self.delete(id).await
    }

    // ============ Content ============

    pub async fn list_content(&self, filter: &ContentFilter) -> StoreResult<Vec<ContentItem>> {
        let items: Vec<ContentItem> = self.list().await?;
        Ok(items.into_iter().filter(|c| filter.matches(c)).collect())
    }

    pub async fn get_content(&self, id: &str) -> StoreResult<ContentItem> {
        self.get(id).await
    }

    pub async fn create_content(&self, fields: Value) -> StoreResult<ContentItem> {
        self.create(fields).await
    }

    pub async fn update_content(&self, id: &str, patch: Value) -> StoreResult<ContentItem> {
        self.update(id, patch).await
    }

    pub async fn delete_content(&self, id: &str) -> StoreResult<ContentItem> {
        self.delete(id).await
    }

    // ============ Profile ============

    pub async fn get_profile(&self) -> StoreResult<Profile> {
        Ok(self.read().await?.profile)
    }

    pub async fn update_profile(&self, patch: Value) -> StoreResult<Profile> {
        let patch = match patch {
            Value::Object(map) => map,
            _ => return Err(StoreError::Invalid("profile must be a JSON object".to_string())),
        };
        let now = now_rfc3339();
        self.mutate(move |doc| {
            let mut fields = match serde_json::to_value(&doc.profile) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            };
            merge_fields(&mut fields, patch);
            fields.insert("updatedAt".to_string(), Value::String(now));
            let profile: Profile = serde_json::from_value(Value::Object(fields))
                .map_err(|e| StoreError::Invalid(format!("invalid profile: {}", e)))?;
            doc.profile = profile.clone();
            Ok(profile)
        })
        .await
    }

    // ============ File access ============

    /// Run `f` against the current document under the write lock and persist
    /// the result. Nothing is written when `f` fails.
    async fn mutate<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Document) -> StoreResult<T>,
    {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read().await?;
        let out = f(&mut doc)?;
        self.write(&doc).await?;
        Ok(out)
    }

    async fn read(&self) -> StoreResult<Document> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Document::default()),
            Err(e) => return Err(self.io_err(e)),
        };
        if text.trim().is_empty() {
            return Ok(Document::default());
        }
        serde_json::from_str(&text).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    async fn write(&self, doc: &Document) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_err(e))?;
            }
        }

        let body = serde_json::to_vec_pretty(doc).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| self.io_err(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_err(e))?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "schema.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn into_object(value: Value, kind: RecordKind) -> StoreResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::Invalid(format!("{} must be a JSON object", kind))),
    }
}

fn require_title(fields: &Map<String, Value>, kind: RecordKind) -> StoreResult<()> {
    match fields.get("title") {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(()),
        _ => Err(StoreError::Invalid(format!("{} title must not be empty", kind))),
    }
}

/// Assign id and timestamps to client fields and deserialize the record.
fn build_record<R: Record>(mut fields: Map<String, Value>, now: &str) -> StoreResult<R> {
    fields.retain(|_, v| !v.is_null());
    require_title(&fields, R::KIND)?;

    let id = match fields.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        // Older documents used numeric ids; keep them as strings.
        Some(Value::Number(n)) => n.to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    };
    fields.insert("id".to_string(), Value::String(id));
    fields.insert("createdAt".to_string(), Value::String(now.to_string()));
    fields.insert("updatedAt".to_string(), Value::String(now.to_string()));

    serde_json::from_value(Value::Object(fields))
        .map_err(|e| StoreError::Invalid(format!("invalid {}: {}", R::KIND, e)))
}

/// Shallow merge. A `null` in the patch clears the field back to its default.
fn merge_fields(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        if PROTECTED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        if value.is_null() {
            target.remove(&key);
        } else {
            target.insert(key, value);
        }
    }
}
