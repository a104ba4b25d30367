// ABOUTME: Timestamp formatting and string helpers
// ABOUTME: Emits ISO-8601 with colon-separated UTC offsets for LastUpdatedTime

use crate::{Error, Result};
use chrono::{DateTime, FixedOffset, Offset, Utc};

/// Formats instants as `YYYY-MM-DDTHH:MM:SS±HH:MM` in a fixed offset.
/// The offset always carries a colon and UTC is written `+00:00`, never `Z`.
#[derive(Debug, Clone, Copy)]
pub struct LastUpdatedFormatter {
    offset: FixedOffset,
}

impl LastUpdatedFormatter {
    pub fn new(offset_minutes: i32) -> Result<Self> {
        let offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                Error::Config(format!("UTC offset out of range: {} minutes", offset_minutes))
            })?;
        Ok(LastUpdatedFormatter { offset })
    }

    pub fn utc() -> Self {
        LastUpdatedFormatter {
            offset: Utc.fix(),
        }
    }

    pub fn format(&self, instant: DateTime<Utc>) -> String {
        instant
            .with_timezone(&self.offset)
            .format("%Y-%m-%dT%H:%M:%S%:z")
            .to_string()
    }

    pub fn now(&self) -> String {
        self.format(Utc::now())
    }
}

impl Default for LastUpdatedFormatter {
    fn default() -> Self {
        Self::utc()
    }
}

pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.len() <= max_chars {
        return s.to_string();
    }

    // Find a valid UTF-8 boundary at or before max_chars
    let mut boundary = max_chars;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }

    if boundary == 0 {
        return String::new();
    }

    format!("{}...", &s[..boundary])
}
