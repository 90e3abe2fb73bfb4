//! Structured search filters rendered as IMAP `SEARCH` criteria, plus result ordering and
//! offset pagination.

use chrono::{DateTime, NaiveDate};

use crate::error::CommandError;
use crate::types::Message;
use crate::utils::validate_str;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

/// Filters accepted by the search and list operations. Blank strings count as unset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub query: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub keyword: Option<String>,
    pub unread: bool,
    /// Lowest UID to include, as given by the caller.
    pub since_uid: Option<String>,
    /// `YYYY-MM-DD` or RFC 3339.
    pub after: Option<String>,
    /// `YYYY-MM-DD` or RFC 3339.
    pub before: Option<String>,
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl SearchFilters {
    /// Render the filters as `UID SEARCH` criteria; no filters at all yields `ALL`.
    ///
    /// Everything is validated here, so bad input fails before a connection is opened.
    pub fn criteria(&self) -> Result<String, CommandError> {
        let mut parts = Vec::new();
        let quoted = [
            ("TEXT", &self.query),
            ("SUBJECT", &self.subject),
            ("FROM", &self.from),
            ("TO", &self.to),
            ("KEYWORD", &self.keyword),
        ];
        for (key, value) in quoted {
            if let Some(value) = present(value) {
                let value = validate_str(value)
                    .map_err(|e| CommandError::validation(format!("{}: {}", key, e)))?;
                parts.push(format!("{} {}", key, value));
            }
        }
        if self.unread {
            parts.push("UNSEEN".to_string());
        }
        if let Some(raw) = present(&self.since_uid) {
            match raw.parse::<i64>() {
                Ok(n) if n > 0 && n <= i64::from(u32::MAX) => parts.push(format!("UID {}:*", n)),
                _ => {
                    return Err(CommandError::validation(format!(
                        "invalid since-id {:?} (expected positive integer)",
                        raw
                    )))
                }
            }
        }
        if let Some(date) = parse_date(self.after.as_deref())? {
            parts.push(format!("SINCE {}", imap_date(date)));
        }
        if let Some(date) = parse_date(self.before.as_deref())? {
            parts.push(format!("BEFORE {}", imap_date(date)));
        }
        if parts.is_empty() {
            return Ok("ALL".to_string());
        }
        Ok(parts.join(" "))
    }
}

/// Accept `YYYY-MM-DD` or a full RFC 3339 timestamp; the latter keeps the calendar date in its
/// own offset.
pub fn parse_date(raw: Option<&str>) -> Result<Option<NaiveDate>, CommandError> {
    let raw = match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(None),
    };
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(Some(date));
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.date_naive()));
    }
    Err(CommandError::validation(format!(
        "invalid date {:?} (expected YYYY-MM-DD or RFC3339)",
        raw
    )))
}

fn imap_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

/// Most recent first, whatever order the server returned.
pub fn sort_by_uid_desc(messages: &mut [Message]) {
    messages.sort_by(|a, b| b.uid.cmp(&a.uid));
}

/// An offset into an already filtered and sorted result set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Page {
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Page {
    /// Build a page from caller input. Unparsable cursors start from the beginning, a missing or
    /// non-positive limit means the default, and limits above the maximum are capped.
    pub fn new(cursor: Option<&str>, limit: Option<i64>) -> Self {
        let offset = cursor
            .and_then(|c| c.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let limit = match limit {
            Some(n) if n > 0 => (n as u64).min(MAX_PAGE_SIZE as u64) as usize,
            _ => DEFAULT_PAGE_SIZE,
        };
        Page { offset, limit }
    }

    /// The slice of `items` on this page and the cursor for the next one, if any remain.
    pub fn apply<'a, T>(&self, items: &'a [T]) -> (&'a [T], Option<String>) {
        if self.offset >= items.len() {
            return (&[], None);
        }
        let end = self.offset.saturating_add(self.limit).min(items.len());
        let next = if end < items.len() {
            Some(end.to_string())
        } else {
            None
        };
        (&items[self.offset..end], next)
    }
}
