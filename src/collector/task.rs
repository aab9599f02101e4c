//! One collection run
//!
//! Per page: every record is written to the sink, the sink is flushed, and
//! only then is the page committed. Cancellation is checked between pages and
//! also interrupts an in-flight page request; either way the stored cursor
//! stays at the last committed page and the watermark is left untouched.

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};

use super::{CollectError, CollectionTaskConfig};
use crate::fetcher::{PageWalker, WalkContext, WalkOutcome};
use crate::metrics::CollectionMetrics;
use crate::output::EventSink;
use crate::shutdown::{cancelled, check_cancelled, CancelReason, SharedShutdown};

/// Result of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Collection name
    pub collection: String,
    /// Events written to the sink
    pub records_emitted: u64,
    /// Pages fetched
    pub pages: u64,
    /// Newest watermark known after the run
    pub final_watermark: Option<String>,
    /// Whether a new watermark was persisted
    pub watermark_committed: bool,
    /// Records whose timestamp did not parse
    pub unparseable_timestamps: u64,
    /// Records without a timestamp field
    pub missing_timestamps: u64,
    /// Whether the run picked up a stored continuation
    pub resumed_from_cursor: bool,
    /// Why the run stopped early, if it did
    pub cancelled: Option<CancelReason>,
    /// Wall-clock duration
    pub duration_ms: u64,
}

impl RunSummary {
    fn from_outcome(
        collection: &str,
        records_emitted: u64,
        outcome: WalkOutcome,
        cancelled: Option<CancelReason>,
        duration: Duration,
    ) -> Self {
        Self {
            collection: collection.to_string(),
            records_emitted,
            pages: outcome.pages,
            final_watermark: outcome.final_watermark,
            watermark_committed: outcome.watermark_committed,
            unparseable_timestamps: outcome.unparseable_timestamps,
            missing_timestamps: outcome.missing_timestamps,
            resumed_from_cursor: outcome.resumed_from_cursor,
            cancelled,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Whether the listing was walked to the end
    pub fn is_complete(&self) -> bool {
        self.cancelled.is_none()
    }
}

/// Binds a collection descriptor to a walker and an event sink
pub struct CollectionTask {
    config: CollectionTaskConfig,
    context: WalkContext,
    sink: Box<dyn EventSink>,
    shutdown: Option<SharedShutdown>,
    deadline: Option<Instant>,
    progress: Option<ProgressBar>,
}

impl CollectionTask {
    /// Task writing `config`'s records to `sink`
    pub fn new(config: CollectionTaskConfig, context: WalkContext, sink: Box<dyn EventSink>) -> Self {
        Self {
            config,
            context,
            sink,
            shutdown: None,
            deadline: None,
            progress: None,
        }
    }

    /// Stop at the next page boundary once shutdown is requested.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Stop at the next page boundary after `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Show a spinner while running.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Collection descriptor
    pub fn config(&self) -> &CollectionTaskConfig {
        &self.config
    }

    /// Run the collection to completion, cancellation or the first error.
    pub async fn run(self) -> Result<RunSummary, CollectError> {
        let span = info_span!("collection", name = %self.config.name);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) -> Result<RunSummary, CollectError> {
        let metrics = CollectionMetrics::start(self.config.name.as_str());
        if let Some(pb) = &self.progress {
            pb.set_message(format!("{}: starting", self.config.name));
        }

        let result = self.collect(&metrics).await;
        match &result {
            Ok(summary) => {
                metrics.record_success(summary.records_emitted, summary.pages);
                if let Some(pb) = &self.progress {
                    pb.finish_with_message(format!(
                        "{}: {} records in {} pages",
                        summary.collection, summary.records_emitted, summary.pages
                    ));
                }
            }
            Err(e) => {
                metrics.record_failure(&e.to_string());
                if let Some(pb) = &self.progress {
                    pb.abandon_with_message(format!("{}: failed", self.config.name));
                }
            }
        }
        result
    }

    async fn collect(&mut self, metrics: &CollectionMetrics) -> Result<RunSummary, CollectError> {
        let mut walker = PageWalker::open(self.context.clone(), self.config.clone())?;
        let mut emitted: u64 = 0;
        let mut cancel_reason = None;

        loop {
            if let Some(reason) = check_cancelled(self.shutdown.as_deref(), self.deadline) {
                cancel_reason = Some(reason);
                break;
            }

            let next = tokio::select! {
                page = walker.next_page() => page?,
                reason = cancelled(self.shutdown.clone(), self.deadline) => {
                    cancel_reason = Some(reason);
                    break;
                }
            };
            let Some(page) = next else {
                break;
            };

            for record in &page.records {
                let payload =
                    serde_json::to_vec(record).map_err(|e| CollectError::Serialize(e.to_string()))?;
                self.sink.write(&self.config.sourcetype, &payload)?;
            }
            self.sink.flush()?;
            walker.commit_page()?;
            emitted += page.records.len() as u64;

            let pages = walker.outcome().pages;
            info!(
                collection = %self.config.name,
                page = pages,
                records = page.records.len(),
                total = emitted,
                "Page processed"
            );
            if let Some(pb) = &self.progress {
                pb.set_message(format!(
                    "{}: {} records, {} pages",
                    self.config.name, emitted, pages
                ));
            }
        }

        let outcome = match cancel_reason {
            Some(reason) => {
                walker.commit_page()?;
                warn!(
                    collection = %self.config.name,
                    reason = %reason,
                    records = emitted,
                    "Collection stopped early, cursor kept and watermark not advanced"
                );
                walker.outcome()
            }
            None => walker.finish()?,
        };

        Ok(RunSummary::from_outcome(
            &self.config.name,
            emitted,
            outcome,
            cancel_reason,
            metrics.elapsed(),
        ))
    }
}

/// Spinner used for a collection in human output mode
pub fn create_spinner(name: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(name.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
