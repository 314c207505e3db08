//! Export the portfolio document as JSON.
//!
//! Produces a pretty-printed snapshot of projects, content and profile,
//! suitable for backups or for seeding a static build of the site.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::store::Store;

/// Export the document.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(config: &Config, output: Option<&Path>) -> Result<()> {
    let doc = Store::open(config.store.path.clone()).snapshot().await?;
    let json = serde_json::to_string_pretty(&doc)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            eprintln!(
                "Exported {} projects, {} content entries to {}",
                doc.projects.len(),
                doc.content.len(),
                path.display()
            );
        }
        None => {
            println!("{}", json);
        }
    }

    Ok(())
}
