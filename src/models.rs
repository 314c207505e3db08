//! Core data models stored in the portfolio document.
//!
//! Records are loosely typed: the well-known fields are modelled explicitly
//! and anything else a client sends is kept in `extra` and written back
//! verbatim. Field names on disk and on the wire are camelCase.

use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The whole persisted document (`schema.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Document {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default)]
    pub profile: Profile,
    /// Top-level keys this crate does not model; written back untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Older documents store numeric ids; they are read as their decimal string.
pub(crate) fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!(
            "expected a string or number id, got {}",
            other
        ))),
    }
}

/// A portfolio project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub technologies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_url: Option<String>,
    #[serde(default)]
    pub featured: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A content-creation entry (video, article, post, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub featured: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The site owner's profile. Every field is optional on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub social: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Which collection a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Project,
    Content,
}

impl RecordKind {
    /// Collection name as used in the document and in URLs.
    pub fn collection(&self) -> &'static str {
        match self {
            RecordKind::Project => "projects",
            RecordKind::Content => "content",
        }
    }

    /// Singular label used in messages.
    pub fn label(&self) -> &'static str {
        match self {
            RecordKind::Project => "project",
            RecordKind::Content => "content",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "project" | "projects" => Some(RecordKind::Project),
            "content" => Some(RecordKind::Content),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A record stored in one of the document's collections.
///
/// Lets the store implement create/update/delete once for both projects
/// and content entries.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync {
    const KIND: RecordKind;

    fn id(&self) -> &str;
    fn title(&self) -> &str;
    fn featured(&self) -> bool;

    fn collection(doc: &Document) -> &Vec<Self>;
    fn collection_mut(doc: &mut Document) -> &mut Vec<Self>;
}

impl Record for Project {
    const KIND: RecordKind = RecordKind::Project;

    fn id(&self) -> &str {
        &self.id
    }
    fn title(&self) -> &str {
        &self.title
    }
    fn featured(&self) -> bool {
        self.featured
    }
    fn collection(doc: &Document) -> &Vec<Self> {
        &doc.projects
    }
    fn collection_mut(doc: &mut Document) -> &mut Vec<Self> {
        &mut doc.projects
    }
}

impl Record for ContentItem {
    const KIND: RecordKind = RecordKind::Content;

    fn id(&self) -> &str {
        &self.id
    }
    fn title(&self) -> &str {
        &self.title
    }
    fn featured(&self) -> bool {
        self.featured
    }
    fn collection(doc: &Document) -> &Vec<Self> {
        &doc.content
    }
    fn collection_mut(doc: &mut Document) -> &mut Vec<Self> {
        &mut doc.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_project_keeps_unknown_fields() {
        let raw = json!({
            "id": "p1",
            "title": "Ray tracer",
            "technologies": ["Rust"],
            "githubUrl": "https://github.com/me/rt",
            "stars": 42
        });
        let project: Project = serde_json::from_value(raw).unwrap();
        assert_eq!(project.github_url.as_deref(), Some("https://github.com/me/rt"));
        assert_eq!(project.extra.get("stars"), Some(&json!(42)));

        let back = serde_json::to_value(&project).unwrap();
        assert_eq!(back["stars"], json!(42));
        assert_eq!(back["githubUrl"], json!("https://github.com/me/rt"));
        assert!(back.get("longDescription").is_none());
    }

    #[test]
    fn test_legacy_records_load() {
        let doc: Document = serde_json::from_value(json!({
            "projects": [{ "id": 1700000000000u64, "title": "Old" }],
            "content": [{ "id": "c1" }],
            "settings": { "theme": "dark" }
        }))
        .unwrap();
        assert_eq!(doc.projects[0].id, "1700000000000");
        assert_eq!(doc.content[0].title, "");
        assert_eq!(doc.extra.get("settings"), Some(&json!({ "theme": "dark" })));

        let back = serde_json::to_value(&doc).unwrap();
        assert_eq!(back["projects"][0]["id"], json!("1700000000000"));
        assert_eq!(back["settings"]["theme"], json!("dark"));
    }

    #[test]
    fn test_id_must_be_scalar() {
        let err = serde_json::from_value::<Project>(json!({ "id": [1], "title": "x" }));
        assert!(err.is_err());
    }

    #[test]
    fn test_content_type_field_is_renamed() {
        let raw = json!({ "id": "c1", "title": "Intro", "type": "video", "platform": "YouTube" });
        let item: ContentItem = serde_json::from_value(raw).unwrap();
        assert_eq!(item.kind.as_deref(), Some("video"));
        let back = serde_json::to_value(&item).unwrap();
        assert_eq!(back["type"], json!("video"));
    }

    #[test]
    fn test_empty_document_parses() {
        let doc: Document = serde_json::from_str("{}").unwrap();
        assert!(doc.projects.is_empty());
        assert!(doc.content.is_empty());
        assert_eq!(doc.profile, Profile::default());
    }

    #[test]
    fn test_record_kind_parse() {
        assert_eq!(RecordKind::parse("projects"), Some(RecordKind::Project));
        assert_eq!(RecordKind::parse("content"), Some(RecordKind::Content));
        assert_eq!(RecordKind::parse("profile"), None);
    }
}
