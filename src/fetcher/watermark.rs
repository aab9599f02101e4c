//! Incremental watermarks
//!
//! A watermark is the newest record timestamp seen by a completed walk. It is
//! stored as the exact string the API returned, so a later `$filter` compares
//! against the same text, while ordering is decided on the parsed instant.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

use crate::Record;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A record timestamp with its parsed instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    raw: String,
    instant: DateTime<Utc>,
}

impl Watermark {
    /// Parse an API timestamp. Accepts RFC 3339, zone-less ISO 8601 (read as
    /// UTC) and bare dates.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let instant = parse_instant(trimmed)?;
        Some(Self {
            raw: trimmed.to_string(),
            instant,
        })
    }

    /// The text as returned by the API
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parsed instant
    pub fn instant(&self) -> DateTime<Utc> {
        self.instant
    }

    /// Strictly newer than `other`
    pub fn is_after(&self, other: &Watermark) -> bool {
        self.instant > other.instant
    }
}

impl PartialOrd for Watermark {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Watermark {
    fn cmp(&self, other: &Self) -> Ordering {
        self.instant
            .cmp(&other.instant)
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// First non-empty string found at one of `fields`.
///
/// Field paths may address nested objects with `.` or `/`, e.g.
/// `properties.lastSeen`.
pub fn extract_timestamp<'a>(record: &'a Record, fields: &[String]) -> Option<&'a str> {
    fields.iter().find_map(|field| {
        let mut current = record;
        for segment in field.split(['.', '/']).filter(|s| !s.is_empty()) {
            current = current.get(segment)?;
        }
        match current {
            Value::String(s) if !s.trim().is_empty() => Some(s.as_str()),
            _ => None,
        }
    })
}

/// Replace `{watermark}` in a filter template.
pub fn render_filter(template: &str, watermark: &Watermark) -> String {
    template.replace("{watermark}", watermark.as_str())
}

/// Tracks the newest timestamp seen during one walk
#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    start: Option<Watermark>,
    current: Option<Watermark>,
    unparseable: u64,
    missing: u64,
}

impl WatermarkTracker {
    /// Tracker starting from the stored watermark, if any
    pub fn new(start: Option<Watermark>) -> Self {
        Self {
            current: start.clone(),
            start,
            unparseable: 0,
            missing: 0,
        }
    }

    /// Fold one record into the maximum.
    pub fn observe(&mut self, record: &Record, fields: &[String]) {
        let Some(raw) = extract_timestamp(record, fields) else {
            self.missing += 1;
            return;
        };
        let Some(candidate) = Watermark::parse(raw) else {
            self.unparseable += 1;
            return;
        };
        let newer = match &self.current {
            Some(current) => candidate.is_after(current),
            None => true,
        };
        if newer {
            self.current = Some(candidate);
        }
    }

    /// Whether the maximum moved past the starting watermark
    pub fn advanced(&self) -> bool {
        match (&self.start, &self.current) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(start), Some(current)) => current.is_after(start),
        }
    }

    /// Newest watermark seen, including the starting one
    pub fn current(&self) -> Option<&Watermark> {
        self.current.as_ref()
    }

    /// Watermark the walk started from
    pub fn start(&self) -> Option<&Watermark> {
        self.start.as_ref()
    }

    /// Records whose timestamp could not be parsed
    pub fn unparseable(&self) -> u64 {
        self.unparseable
    }

    /// Records with none of the timestamp fields
    pub fn missing(&self) -> u64 {
        self.missing
    }
}
