//! Provider response header parsing
//!
//! Header names are normalized to lowercase on capture so every lookup is
//! case-insensitive. Each quota field parses to a [`HeaderField`], and the
//! per-field results are composed into [`WriteCapHeaders`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const USER_24H_REMAINING: &str = "x-user-limit-24hour-remaining";
pub const USER_24H_LIMIT: &str = "x-user-limit-24hour-limit";
pub const USER_24H_RESET: &str = "x-user-limit-24hour-reset";
pub const RATE_LIMIT_RESET: &str = "x-rate-limit-reset";

/// Response headers captured from a remote call, keyed by lowercase name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderSnapshot(BTreeMap<String, String>);

impl HeaderSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header. Later values for the same name replace earlier ones.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Parse one header as an integer.
    pub fn int_field(&self, name: &str) -> HeaderField {
        match self.get(name).map(str::trim).map(str::parse::<i64>) {
            Some(Ok(value)) => HeaderField::Found(value),
            _ => HeaderField::Absent,
        }
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for HeaderSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut snapshot = HeaderSnapshot::new();
        for (k, v) in iter {
            snapshot.insert(k, v);
        }
        snapshot
    }
}

/// Result of parsing a single integer header.
///
/// Missing and malformed values are both `Absent`: neither may overwrite
/// previously observed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderField {
    Found(i64),
    Absent,
}

impl HeaderField {
    pub fn value(self) -> Option<i64> {
        match self {
            HeaderField::Found(v) => Some(v),
            HeaderField::Absent => None,
        }
    }

    pub fn is_found(self) -> bool {
        matches!(self, HeaderField::Found(_))
    }
}

/// The 24-hour per-user write quota fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCapHeaders {
    pub remaining: HeaderField,
    pub limit: HeaderField,
    /// Reset time in epoch seconds.
    pub reset_epoch: HeaderField,
}

impl WriteCapHeaders {
    pub fn parse(headers: &HeaderSnapshot) -> Self {
        Self {
            remaining: headers.int_field(USER_24H_REMAINING),
            limit: headers.int_field(USER_24H_LIMIT),
            reset_epoch: headers.int_field(USER_24H_RESET),
        }
    }

    /// Whether any quota field was present.
    pub fn any_found(&self) -> bool {
        self.remaining.is_found() || self.limit.is_found() || self.reset_epoch.is_found()
    }
}

/// Parse the window-level `x-rate-limit-reset` header (epoch seconds).
pub fn parse_rate_limit_reset(headers: &HeaderSnapshot) -> HeaderField {
    headers.int_field(RATE_LIMIT_RESET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let headers = HeaderSnapshot::new().with("X-User-Limit-24Hour-Reset", "1700000000");
        assert_eq!(headers.get(USER_24H_RESET), Some("1700000000"));
        assert_eq!(headers.get("X-USER-LIMIT-24HOUR-RESET"), Some("1700000000"));
    }

    #[test]
    fn test_parse_all_fields() {
        let headers: HeaderSnapshot = [
            ("x-user-limit-24hour-remaining", "0"),
            ("X-User-Limit-24hour-Limit", "17"),
            ("x-user-limit-24hour-reset", " 1700000000 "),
        ]
        .into_iter()
        .collect();
        let parsed = WriteCapHeaders::parse(&headers);
        assert_eq!(parsed.remaining, HeaderField::Found(0));
        assert_eq!(parsed.limit, HeaderField::Found(17));
        assert_eq!(parsed.reset_epoch, HeaderField::Found(1_700_000_000));
        assert!(parsed.any_found());
    }

    #[test]
    fn test_malformed_and_missing_are_absent() {
        let headers = HeaderSnapshot::new().with(USER_24H_REMAINING, "many");
        let parsed = WriteCapHeaders::parse(&headers);
        assert_eq!(parsed.remaining, HeaderField::Absent);
        assert_eq!(parsed.limit, HeaderField::Absent);
        assert!(!parsed.any_found());
    }

    #[test]
    fn test_rate_limit_reset() {
        let headers = HeaderSnapshot::new().with("X-Rate-Limit-Reset", "42");
        assert_eq!(parse_rate_limit_reset(&headers).value(), Some(42));
        assert_eq!(parse_rate_limit_reset(&HeaderSnapshot::new()), HeaderField::Absent);
    }
}
