//! Checkpointed paging over one collection
//!
//! [`PageWalker`] follows `nextLink` continuations and persists progress:
//! - the continuation of a page is stored only after the caller is done with
//!   the page (`commit_page`, or implicitly on the next `next_page`)
//! - a run that starts from a stored continuation uses it verbatim; the first
//!   request's filter and page size are already encoded in it
//! - the watermark is written once, by `finish`, and only when the listing
//!   was exhausted and the newest timestamp moved forward
//!
//! A crash between pages therefore replays at most one page, and a crash
//! before `finish` replays the whole window under the old watermark.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::watermark::{render_filter, Watermark, WatermarkTracker};
use super::{FetcherError, FetcherResult, RecordStream, Transport, TransportRequest};
use crate::auth::CredentialProvider;
use crate::collector::config::MAX_PAGES;
use crate::collector::{CollectionTaskConfig, ResponseStyle};
use crate::metrics::record_page;
use crate::resume::CheckpointStore;
use crate::Record;

/// Continuation link field names, in order of preference
const NEXT_LINK_FIELDS: &[&str] = &["nextLink", "@odata.nextLink"];

/// One listing page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Records in API order
    pub records: Vec<Record>,
    /// Continuation, `None` on the last page
    pub next_link: Option<String>,
}

/// Parse a listing response body.
///
/// An object with a `value` array yields its elements. With
/// [`ResponseStyle::SingleObject`] any other object is one record. A bare
/// array is taken as the record list. Every other shape, and an empty body,
/// yields zero records.
pub fn parse_page(body: &[u8], style: ResponseStyle) -> FetcherResult<Page> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Page::default());
    }
    let json: Value = serde_json::from_slice(body)
        .map_err(|e| FetcherError::ParseError(format!("listing response is not JSON: {e}")))?;
    Ok(page_from_value(json, style))
}

fn page_from_value(json: Value, style: ResponseStyle) -> Page {
    match json {
        Value::Object(mut map) => {
            let next_link = NEXT_LINK_FIELDS
                .iter()
                .find_map(|field| map.get(*field).and_then(Value::as_str))
                .map(str::trim)
                .filter(|link| !link.is_empty())
                .map(str::to_string);

            if matches!(map.get("value"), Some(Value::Array(_))) {
                let records = match map.remove("value") {
                    Some(Value::Array(records)) => records,
                    _ => Vec::new(),
                };
                return Page { records, next_link };
            }

            match style {
                ResponseStyle::SingleObject => Page {
                    records: vec![Value::Object(map)],
                    next_link: None,
                },
                ResponseStyle::List => {
                    debug!("Listing response has no value array");
                    Page {
                        records: Vec::new(),
                        next_link,
                    }
                }
            }
        }
        Value::Array(records) => Page {
            records,
            next_link: None,
        },
        other => {
            debug!(kind = json_kind(&other), "Listing response is not an object");
            Page::default()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Shared dependencies of a walk
#[derive(Clone)]
pub struct WalkContext {
    /// HTTP transport
    pub transport: Arc<Transport>,
    /// Bearer token source
    pub credentials: Arc<dyn CredentialProvider>,
    /// Cursor and watermark storage
    pub store: Arc<dyn CheckpointStore>,
    /// Data-plane base URL without trailing slash
    pub base_url: String,
    /// `api-version` query parameter
    pub api_version: String,
}

/// Where the next request goes
#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    Fresh,
    Cursor(String),
    Done,
}

/// Summary of a walk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalkOutcome {
    /// Pages fetched
    pub pages: u64,
    /// Records returned
    pub records: u64,
    /// Newest watermark seen, including the stored one
    pub final_watermark: Option<String>,
    /// Whether `finish` wrote a new watermark
    pub watermark_committed: bool,
    /// Records with a timestamp that did not parse
    pub unparseable_timestamps: u64,
    /// Records with none of the timestamp fields
    pub missing_timestamps: u64,
    /// Whether the run started from a stored continuation
    pub resumed_from_cursor: bool,
    /// Whether the listing was exhausted
    pub completed: bool,
}

/// Drives paging for one collection
pub struct PageWalker {
    ctx: WalkContext,
    config: CollectionTaskConfig,
    position: Position,
    /// Continuation of the last page handed out and not yet committed
    pending: Option<Option<String>>,
    visited: HashSet<String>,
    tracker: WatermarkTracker,
    pages: u64,
    records: u64,
    resumed_from_cursor: bool,
    watermark_committed: bool,
    finished: bool,
}

impl PageWalker {
    /// Read the stored cursor and watermark and prepare the first request.
    pub fn open(ctx: WalkContext, config: CollectionTaskConfig) -> FetcherResult<Self> {
        let cursor = ctx.store.get(&config.cursor_key())?;
        let stored_watermark = ctx.store.get(&config.watermark_key())?;

        let start = stored_watermark.as_deref().and_then(|raw| {
            let parsed = Watermark::parse(raw);
            if parsed.is_none() {
                warn!(
                    collection = %config.name,
                    watermark = raw,
                    "Ignoring stored watermark that is not a timestamp"
                );
            }
            parsed
        });

        let resumed_from_cursor = cursor.is_some();
        let position = match cursor {
            Some(link) => {
                info!(collection = %config.name, "Resuming from stored continuation");
                Position::Cursor(link)
            }
            None => Position::Fresh,
        };

        debug!(
            collection = %config.name,
            watermark = start.as_ref().map(Watermark::as_str),
            resumed_from_cursor,
            "Opened page walker"
        );

        Ok(Self {
            ctx,
            config,
            position,
            pending: None,
            visited: HashSet::new(),
            tracker: WatermarkTracker::new(start),
            pages: 0,
            records: 0,
            resumed_from_cursor,
            watermark_committed: false,
            finished: false,
        })
    }

    /// Collection descriptor
    pub fn config(&self) -> &CollectionTaskConfig {
        &self.config
    }

    /// Whether the run started from a stored continuation
    pub fn resumed_from_cursor(&self) -> bool {
        self.resumed_from_cursor
    }

    /// Fetch the next page, committing the previous one first.
    ///
    /// Returns `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> FetcherResult<Option<Page>> {
        self.commit_page()?;

        let url = match &self.position {
            Position::Done => return Ok(None),
            Position::Fresh => self.first_url()?,
            Position::Cursor(link) => self.resolve_link(link)?,
        };

        if self.pages >= MAX_PAGES {
            return Err(FetcherError::PageLimitExceeded(MAX_PAGES));
        }
        self.visited.insert(url.clone());

        let page = self.fetch(&url).await?;

        if let Some(next) = &page.next_link {
            let resolved = self.resolve_link(next)?;
            if self.visited.contains(&resolved) {
                warn!(
                    collection = %self.config.name,
                    next_link = %next,
                    "Continuation points at a page already fetched"
                );
                return Err(FetcherError::PaginationLoop(next.clone()));
            }
        }

        for record in &page.records {
            self.tracker.observe(record, &self.config.timestamp_fields);
        }
        self.pages += 1;
        self.records += page.records.len() as u64;
        record_page(&self.config.name, page.records.len());

        self.position = match &page.next_link {
            Some(next) => Position::Cursor(next.clone()),
            None => Position::Done,
        };
        self.pending = Some(page.next_link.clone());

        debug!(
            collection = %self.config.name,
            page = self.pages,
            records = page.records.len(),
            has_next = page.next_link.is_some(),
            "Fetched page"
        );
        Ok(Some(page))
    }

    /// Persist the continuation of the page last returned by `next_page`, or
    /// clear the cursor if it was the last page. No-op when nothing is pending.
    pub fn commit_page(&mut self) -> FetcherResult<()> {
        let Some(continuation) = self.pending.take() else {
            return Ok(());
        };
        let key = self.config.cursor_key();
        match continuation {
            Some(link) => self.ctx.store.set(&key, &link)?,
            None => self.ctx.store.clear(&key)?,
        }
        debug!(collection = %self.config.name, page = self.pages, "Committed page");
        Ok(())
    }

    /// Commit pending state and, when the listing was exhausted and the
    /// newest timestamp moved forward, persist the new watermark.
    pub fn finish(&mut self) -> FetcherResult<WalkOutcome> {
        self.commit_page()?;
        if self.finished {
            return Ok(self.outcome());
        }
        self.finished = true;

        if self.tracker.unparseable() > 0 {
            warn!(
                collection = %self.config.name,
                count = self.tracker.unparseable(),
                "Records with unparseable timestamps did not move the watermark"
            );
        }

        if self.position == Position::Done && self.tracker.advanced() {
            if let Some(watermark) = self.tracker.current() {
                self.ctx
                    .store
                    .set(&self.config.watermark_key(), watermark.as_str())?;
                self.watermark_committed = true;
                info!(
                    collection = %self.config.name,
                    watermark = %watermark,
                    "Watermark advanced"
                );
            }
        }
        Ok(self.outcome())
    }

    /// Progress so far, without writing anything
    pub fn outcome(&self) -> WalkOutcome {
        WalkOutcome {
            pages: self.pages,
            records: self.records,
            final_watermark: self.tracker.current().map(|w| w.as_str().to_string()),
            watermark_committed: self.watermark_committed,
            unparseable_timestamps: self.tracker.unparseable(),
            missing_timestamps: self.tracker.missing(),
            resumed_from_cursor: self.resumed_from_cursor,
            completed: self.position == Position::Done,
        }
    }

    fn first_url(&self) -> FetcherResult<String> {
        let base = format!(
            "{}{}",
            self.ctx.base_url.trim_end_matches('/'),
            self.config.resource_path
        );
        let mut params: Vec<(String, String)> =
            vec![("api-version".to_string(), self.ctx.api_version.clone())];
        if let Some(size) = self.config.page_size {
            params.push(("$top".to_string(), size.to_string()));
        }
        params.extend(
            self.config
                .extra_params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        if let (Some(template), Some(watermark)) =
            (&self.config.filter_template, self.tracker.start())
        {
            params.push(("$filter".to_string(), render_filter(template, watermark)));
        }

        Url::parse_with_params(&base, &params)
            .map(String::from)
            .map_err(|e| FetcherError::InvalidUrl(format!("{base}: {e}")))
    }

    /// Absolute continuation URL; relative links resolve against the base URL.
    fn resolve_link(&self, link: &str) -> FetcherResult<String> {
        resolve_continuation(&self.ctx.base_url, link)
    }

    /// GET `url` with a bearer token; one re-authentication on 401.
    async fn fetch(&self, url: &str) -> FetcherResult<Page> {
        let request = TransportRequest::get(url).accept_json();

        let token = self.ctx.credentials.get_token().await?;
        let response = match self
            .ctx
            .transport
            .request(&request.clone().bearer(&token))
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_unauthorized() => {
                warn!(
                    collection = %self.config.name,
                    "Token rejected, refreshing and retrying page once"
                );
                self.ctx.credentials.invalidate().await;
                let token = self.ctx.credentials.get_token().await?;
                self.ctx.transport.request(&request.bearer(&token)).await?
            }
            Err(e) => return Err(e.into()),
        };

        parse_page(&response.body, self.config.response_style)
    }
}

/// Lazy record stream over one collection.
///
/// Each page is committed when the consumer pulls past it, and the walk is
/// finished after the last record. Errors end the stream.
pub fn walk(ctx: WalkContext, config: CollectionTaskConfig) -> RecordStream {
    let stream = stream::unfold(
        Some(PageWalker::open(ctx, config)),
        |state| async move {
            let mut walker = match state? {
                Ok(walker) => walker,
                Err(e) => return Some((stream::iter(vec![Err(e)]), None)),
            };

            match walker.next_page().await {
                Ok(Some(page)) => {
                    let items: Vec<FetcherResult<Record>> =
                        page.records.into_iter().map(Ok).collect();
                    Some((stream::iter(items), Some(Ok(walker))))
                }
                Ok(None) => match walker.finish() {
                    Ok(_) => None,
                    Err(e) => Some((stream::iter(vec![Err(e)]), None)),
                },
                Err(e) => Some((stream::iter(vec![Err(e)]), None)),
            }
        },
    )
    .flatten();

    Box::pin(stream)
}

/// Resolve a continuation link against the data-plane base URL.
///
/// A slash-rooted link is a resource path under the base URL, the same way the
/// first request is built, so the workspace path prefix is kept.
fn resolve_continuation(base_url: &str, link: &str) -> FetcherResult<String> {
    if let Ok(url) = Url::parse(link) {
        return Ok(url.into());
    }
    let base = base_url.trim_end_matches('/');
    let resolved = if link.starts_with('/') {
        Url::parse(&format!("{base}{link}"))
    } else {
        Url::parse(&format!("{base}/")).and_then(|base| base.join(link))
    };
    resolved
        .map(String::from)
        .map_err(|e| FetcherError::InvalidUrl(format!("{link}: {e}")))
}
