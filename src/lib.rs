//! # Folio
//!
//! A JSON-document backed content API for personal portfolio sites.
//!
//! Folio keeps a site's projects, content entries (videos, articles, posts)
//! and owner profile in a single JSON document, stores uploaded images and
//! videos on local disk or an S3-compatible bucket, and serves it all as a
//! REST API next to the built frontend. A contact form and an optional
//! Gemini-backed chat assistant round out the public surface.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌─────────────────┐
//! │  HTTP (axum) │──▶│    Store    │──▶│  schema.json    │
//! │   + CLI      │   │ locked I/O  │   │  (atomic write) │
//! └──────┬───────┘   └─────────────┘   └─────────────────┘
//!        │
//!        ├──────────▶ MediaStore (local dir / S3)
//!        ├──────────▶ Contact outbox + relay
//!        └──────────▶ Chat (Gemini)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! folio init                    # create an empty document
//! folio serve                   # start the API server
//! folio search "rust" --kind projects
//! folio export --output backup.json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Projects, content entries, profile |
//! | [`store`] | Serialized, atomic document storage |
//! | [`search`] | Keyword search and ranking |
//! | [`media`] | Upload validation, naming, URL resolution, local backend |
//! | [`media_s3`] | S3-compatible media backend |
//! | [`contact`] | Contact form delivery |
//! | [`chat`] | AI chat assistant |
//! | [`server`] | HTTP API server |

pub mod chat;
pub mod config;
pub mod contact;
pub mod export;
pub mod get;
pub mod media;
pub mod media_s3;
pub mod models;
pub mod search;
pub mod server;
pub mod stats;
pub mod store;
