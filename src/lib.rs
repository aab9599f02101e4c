//! # EASM Collector Library
//!
//! Checkpointed incremental pulls from the Microsoft Defender External Attack
//! Surface Management (EASM) data-plane API. Each collection is walked page by
//! page; records are handed to an event sink and progress is persisted so an
//! interrupted run resumes where it stopped.
//!
//! ## Quick Start
//!
//! ```no_run
//! use easm_collector::collector::{build_context, CollectionTask, EnvironmentOptions};
//! use easm_collector::output::jsonl::JsonLinesSink;
//! use easm_collector::registry::CollectionRegistry;
//! use easm_collector::resume::FileCheckpointStore;
//! use easm_collector::settings::Settings;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (settings, secrets) = Settings::load(Some("easm.toml".as_ref()))?;
//! let store = Arc::new(FileCheckpointStore::new(".easm-state"));
//! let context = build_context(&settings, &secrets, store, &EnvironmentOptions::default())?;
//!
//! let registry = CollectionRegistry::load_embedded()?;
//! let hosts = registry.require("hosts")?.clone();
//! let sink = JsonLinesSink::append_to("out/hosts.jsonl", settings.target_index())?;
//!
//! let summary = CollectionTask::new(hosts, context, Box::new(sink)).run().await?;
//! println!("{} records", summary.records_emitted);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`settings`] - settings snapshot, secret lookup
//! - [`proxy`] - outbound proxy resolution
//! - [`auth`] - OAuth2 client-credentials token provider
//! - [`fetcher`] - HTTP transport with retry, paging, watermarks
//! - [`resume`] - durable cursor and watermark storage
//! - [`collector`] - collection descriptors and runs
//! - [`registry`] - built-in collection catalogue
//! - [`output`] - event sinks
//!
//! ## Delivery
//!
//! Delivery is at-least-once. A crash between emitting a page and committing
//! it replays that page on the next run; consumers deduplicate on the record
//! `id`.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// OAuth2 credentials and token caching
pub mod auth;

/// CLI command implementations
pub mod cli;

/// Collection descriptors, wiring and runs
pub mod collector;

/// HTTP transport, pagination and watermarks
pub mod fetcher;

/// Prometheus metrics
pub mod metrics;

/// Event sinks
pub mod output;

/// Proxy resolution
pub mod proxy;

/// Built-in collection catalogue
pub mod registry;

/// Checkpoint storage
pub mod resume;

/// Settings and secrets
pub mod settings;

/// Graceful shutdown and deadlines
pub mod shutdown;

/// One API record, passed through unchanged
pub type Record = serde_json::Value;
