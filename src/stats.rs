//! Document statistics.
//!
//! Gives a quick summary of what the site holds: record counts, featured
//! entries, per-platform content counts and stored media. Used by
//! `folio stats`.

use anyhow::Result;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::media::create_media_store;
use crate::models::Document;
use crate::store::Store;

/// Counts derived from a document snapshot.
#[derive(Debug, Default, PartialEq)]
pub struct DocumentStats {
    pub projects: usize,
    pub featured_projects: usize,
    pub content: usize,
    pub featured_content: usize,
    pub by_platform: BTreeMap<String, usize>,
}

impl DocumentStats {
    pub fn from_document(doc: &Document) -> Self {
        let mut by_platform = BTreeMap::new();
        for c in &doc.content {
            let platform = c.platform.clone().unwrap_or_else(|| "other".to_string());
            *by_platform.entry(platform).or_insert(0) += 1;
        }
        Self {
            projects: doc.projects.len(),
            featured_projects: doc.projects.iter().filter(|p| p.featured).count(),
            content: doc.content.len(),
            featured_content: doc.content.iter().filter(|c| c.featured).count(),
            by_platform,
        }
    }
}

/// Run the stats command: read the document and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = Store::open(config.store.path.clone());
    let doc = store.snapshot().await?;
    let stats = DocumentStats::from_document(&doc);

    let file_size = std::fs::metadata(store.path())
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Folio — Document Stats");
    println!("======================");
    println!();
    println!("  Document:    {}", store.path().display());
    println!("  Size:        {}", format_bytes(file_size));
    println!();
    println!(
        "  Projects:    {} ({} featured)",
        stats.projects, stats.featured_projects
    );
    println!(
        "  Content:     {} ({} featured)",
        stats.content, stats.featured_content
    );

    if !stats.by_platform.is_empty() {
        println!();
        println!("  By platform:");
        for (platform, count) in &stats.by_platform {
            println!("    {:<20} {:>5}", platform, count);
        }
    }

    let media = create_media_store(config)?;
    match media.list().await {
        Ok(files) => {
            let total: u64 = files.iter().map(|f| f.size).sum();
            println!();
            println!(
                "  Media:       {} files, {} ({})",
                files.len(),
                format_bytes(total),
                media.backend()
            );
        }
        Err(e) => {
            println!();
            println!("  Media:       unavailable ({})", e);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
