//! Record listing and retrieval for the `folio list` and `folio get` commands.

use anyhow::{anyhow, Result};

use crate::config::Config;
use crate::models::{ContentItem, Project, RecordKind};
use crate::store::Store;

fn parse_kind(kind: &str) -> Result<RecordKind> {
    RecordKind::parse(kind)
        .ok_or_else(|| anyhow!("Unknown record kind: {} (expected projects or content)", kind))
}

/// Print one line per record in the collection.
pub async fn run_list(config: &Config, kind: &str) -> Result<()> {
    let kind = parse_kind(kind)?;
    let store = Store::open(config.store.path.clone());

    match kind {
        RecordKind::Project => {
            let projects: Vec<Project> = store.list().await?;
            if projects.is_empty() {
                println!("No projects.");
                return Ok(());
            }
            println!("{:<38} {:<4} {}", "ID", "FEAT", "TITLE");
            for p in &projects {
                println!(
                    "{:<38} {:<4} {}",
                    p.id,
                    if p.featured { "*" } else { "" },
                    p.title
                );
            }
        }
        RecordKind::Content => {
            let items: Vec<ContentItem> = store.list().await?;
            if items.is_empty() {
                println!("No content.");
                return Ok(());
            }
            println!("{:<38} {:<12} {}", "ID", "PLATFORM", "TITLE");
            for c in &items {
                println!(
                    "{:<38} {:<12} {}",
                    c.id,
                    c.platform.as_deref().unwrap_or("-"),
                    c.title
                );
            }
        }
    }
    Ok(())
}

/// Print a single record as pretty JSON.
pub async fn run_get(config: &Config, kind: &str, id: &str) -> Result<()> {
    let kind = parse_kind(kind)?;
    let store = Store::open(config.store.path.clone());

    let json = match kind {
        RecordKind::Project => serde_json::to_string_pretty(&store.get_project(id).await?)?,
        RecordKind::Content => serde_json::to_string_pretty(&store.get_content(id).await?)?,
    };
    println!("{}", json);
    Ok(())
}
