//! Archive links recorded in an item's annotations.
//!
//! Recognized lines, case-insensitive:
//! ```text
//! archive_internetarchive: https://web.archive.org/web/20240101000000/https://example.org
//! internetarchiveArchived: https://...
//! Archived: https://...
//! Internet Archive: https://...
//! Archive.today: https://...
//! Perma.cc: https://...
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::memento::{detect_backend, MementoRecord};

const ARCHIVE_PREFIX: &str = "archive_";
const LEGACY_SUFFIX: &str = "archived";
const NAMED_LABELS: [(&str, &str); 3] = [
    ("internet archive", "internetarchive"),
    ("archive.today", "archivetoday"),
    ("perma.cc", "permacc"),
];

/// Parse every archive link in `extra`. Duplicate URLs are reported once.
///
/// A record's datetime comes from a 14-digit capture timestamp in its URL;
/// links without one are dated `now`.
pub fn parse_stored_mementos(extra: &str, now: DateTime<Utc>) -> Vec<MementoRecord> {
    let mut records: Vec<MementoRecord> = Vec::new();

    for line in extra.lines() {
        let Some((label, rest)) = line.trim().split_once(':') else {
            continue;
        };
        let Some(url) = rest.split_whitespace().next() else {
            continue;
        };
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            continue;
        }
        let Some(labelled_backend) = backend_for_label(label.trim()) else {
            continue;
        };
        if records.iter().any(|r| r.url == url) {
            continue;
        }

        let source_backend = labelled_backend
            .or_else(|| detect_backend(url).map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());

        records.push(MementoRecord {
            url: url.to_string(),
            datetime: capture_time(url).unwrap_or(now),
            source_backend,
        });
    }

    records
}

/// `Some(backend)` if the label names an archive link, with the backend
/// id when the label carries one.
fn backend_for_label(label: &str) -> Option<Option<String>> {
    let lower = label.to_ascii_lowercase();

    if let Some(id) = lower.strip_prefix(ARCHIVE_PREFIX) {
        return (!id.is_empty()).then(|| Some(id.to_string()));
    }
    if let Some(id) = lower.strip_suffix(LEGACY_SUFFIX) {
        return Some((!id.is_empty()).then(|| id.to_string()));
    }
    NAMED_LABELS
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, id)| Some(id.to_string()))
}

/// Capture time encoded as a 14-digit path segment, e.g. `/web/20240101123000/`.
fn capture_time(url: &str) -> Option<DateTime<Utc>> {
    url.split('/')
        .map(|segment| segment.trim_end_matches(|c: char| c.is_ascii_alphabetic() || c == '_'))
        .find(|segment| segment.len() == 14 && segment.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|stamp| NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S").ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parses_all_label_styles() {
        let extra = "\
tex.note: unrelated
archive_internetarchive: https://web.archive.org/web/20240101120000/https://example.org
permaccArchived: https://perma.cc/ABCD-1234
Archive.today: https://archive.ph/xyz
Archived: https://unknown.example/capture";

        let records = parse_stored_mementos(extra, now());
        let summary: Vec<_> = records
            .iter()
            .map(|r| (r.source_backend.as_str(), r.url.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("internetarchive", "https://web.archive.org/web/20240101120000/https://example.org"),
                ("permacc", "https://perma.cc/ABCD-1234"),
                ("archivetoday", "https://archive.ph/xyz"),
                ("unknown", "https://unknown.example/capture"),
            ]
        );
    }

    #[test]
    fn test_capture_time_from_wayback_url() {
        let records = parse_stored_mementos(
            "Internet Archive: https://web.archive.org/web/20240101120000id_/https://example.org",
            now(),
        );
        assert_eq!(records[0].datetime, Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_undated_links_are_dated_now() {
        let records = parse_stored_mementos("Perma.cc: https://perma.cc/ABCD-1234", now());
        assert_eq!(records[0].datetime, now());
    }

    #[test]
    fn test_duplicates_and_non_links_skipped() {
        let extra = "\
Archived: https://archive.ph/xyz
Archive.today: https://archive.ph/xyz
Archived: not-a-link
Publisher: https://publisher.example";
        let records = parse_stored_mementos(extra, now());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_backend, "archivetoday");
    }
}
