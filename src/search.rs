//! Keyword search over projects and content entries.
//!
//! Search is an in-memory scan of the document. A query is split on
//! whitespace; a record matches when every term occurs (case-insensitively)
//! in at least one of its searchable fields. Matches are ranked by where the
//! terms hit:
//!
//! | Field | Weight |
//! |-------|--------|
//! | title | 3 |
//! | technologies / tags / category / platform | 2 |
//! | description / long description / type | 1 |
//!
//! Ties keep document order.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::config::Config;
use crate::models::{ContentItem, Document, Project};
use crate::store::Store;

const TITLE_WEIGHT: u32 = 3;
const LABEL_WEIGHT: u32 = 2;
const BODY_WEIGHT: u32 = 1;

/// Combined result for `GET /api/search`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub projects: Vec<Project>,
    pub content: Vec<ContentItem>,
}

/// A searchable field with its weight.
struct Field<'a> {
    text: &'a str,
    weight: u32,
}

fn project_fields(p: &Project) -> Vec<Field<'_>> {
    let mut fields = vec![
        Field {
            text: &p.title,
            weight: TITLE_WEIGHT,
        },
        Field {
            text: &p.description,
            weight: BODY_WEIGHT,
        },
    ];
    if let Some(ref long) = p.long_description {
        fields.push(Field {
            text: long,
            weight: BODY_WEIGHT,
        });
    }
    if let Some(ref category) = p.category {
        fields.push(Field {
            text: category,
            weight: LABEL_WEIGHT,
        });
    }
    for tech in &p.technologies {
        fields.push(Field {
            text: tech,
            weight: LABEL_WEIGHT,
        });
    }
    fields
}

fn content_fields(c: &ContentItem) -> Vec<Field<'_>> {
    let mut fields = vec![
        Field {
            text: &c.title,
            weight: TITLE_WEIGHT,
        },
        Field {
            text: &c.description,
            weight: BODY_WEIGHT,
        },
    ];
    if let Some(ref platform) = c.platform {
        fields.push(Field {
            text: platform,
            weight: LABEL_WEIGHT,
        });
    }
    if let Some(ref kind) = c.kind {
        fields.push(Field {
            text: kind,
            weight: BODY_WEIGHT,
        });
    }
    for tag in &c.tags {
        fields.push(Field {
            text: tag,
            weight: LABEL_WEIGHT,
        });
    }
    fields
}

/// Lower-cased, whitespace-separated query terms.
fn terms(query: &str) -> Vec<String> {
    query.split_whitespace().map(|t| t.to_lowercase()).collect()
}

/// Score a record's fields against the terms.
///
/// Returns `None` unless every term hits some field. Each term contributes
/// the highest weight among the fields it occurs in.
fn score(fields: &[Field<'_>], terms: &[String]) -> Option<u32> {
    let lowered: Vec<(String, u32)> = fields
        .iter()
        .map(|f| (f.text.to_lowercase(), f.weight))
        .collect();

    let mut total = 0;
    for term in terms {
        let best = lowered
            .iter()
            .filter(|(text, _)| text.contains(term.as_str()))
            .map(|(_, w)| *w)
            .max()?;
        total += best;
    }
    Some(total)
}

fn rank<'a, T: Clone + 'a>(
    records: impl Iterator<Item = (&'a T, Vec<Field<'a>>)>,
    terms: &[String],
    limit: Option<usize>,
) -> Vec<T> {
    let mut scored: Vec<(u32, usize, &T)> = records
        .enumerate()
        .filter_map(|(pos, (record, fields))| score(&fields, terms).map(|s| (s, pos, record)))
        .collect();

    // Highest score first; equal scores keep document order.
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let limit = limit.unwrap_or(usize::MAX);
    scored
        .into_iter()
        .take(limit)
        .map(|(_, _, r)| r.clone())
        .collect()
}

pub fn search_projects(doc: &Document, query: &str, limit: Option<usize>) -> Vec<Project> {
    let terms = terms(query);
    if terms.is_empty() {
        return Vec::new();
    }
    rank(
        doc.projects.iter().map(|p| (p, project_fields(p))),
        &terms,
        limit,
    )
}

pub fn search_content(doc: &Document, query: &str, limit: Option<usize>) -> Vec<ContentItem> {
    let terms = terms(query);
    if terms.is_empty() {
        return Vec::new();
    }
    rank(
        doc.content.iter().map(|c| (c, content_fields(c))),
        &terms,
        limit,
    )
}

pub fn search_all(doc: &Document, query: &str, limit: Option<usize>) -> SearchResults {
    SearchResults {
        query: query.trim().to_string(),
        projects: search_projects(doc, query, limit),
        content: search_content(doc, query, limit),
    }
}

/// CLI entry point for `folio search`.
///
/// `kind` is `projects`, `content`, or `all`.
pub async fn run_search(
    config: &Config,
    query: &str,
    kind: &str,
    limit: Option<usize>,
) -> Result<()> {
    let (want_projects, want_content) = match kind {
        "all" => (true, true),
        "projects" | "project" => (true, false),
        "content" => (false, true),
        other => bail!("Unknown search kind: {} (expected projects, content, or all)", other),
    };

    let doc = Store::open(config.store.path.clone()).snapshot().await?;
    let results = search_all(&doc, query, limit);

    if results.query.is_empty() {
        println!("Empty query.");
        return Ok(());
    }

    let mut shown = 0;
    if want_projects {
        for p in &results.projects {
            shown += 1;
            println!("{}. [project] {}  ({})", shown, p.title, p.id);
            if !p.description.is_empty() {
                println!("    {}", p.description);
            }
        }
    }
    if want_content {
        for c in &results.content {
            shown += 1;
            let platform = c.platform.as_deref().unwrap_or("-");
            println!("{}. [content] {}  ({}, {})", shown, c.title, platform, c.id);
        }
    }

    if shown == 0 {
        println!("No results for \"{}\".", results.query);
    }
    Ok(())
}
