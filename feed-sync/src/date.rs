//! Best-effort timestamp parsing for feed dates.
//!
//! Formats are tried in order and the first strict match wins. Input that
//! matches nothing becomes the current time: a bad date never blocks
//! ingestion.

use chrono::{DateTime, NaiveDateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    /// `Tue, 18 Jun 2024 05:24:16 GMT`
    Rfc1123Gmt,
    /// RFC 2822 with numeric offsets or other zone names.
    Rfc2822,
    /// `2024-06-18T05:24:16Z`, as used by Atom.
    Rfc3339,
}

pub const FORMATS: &[DateFormat] = &[
    DateFormat::Rfc1123Gmt,
    DateFormat::Rfc2822,
    DateFormat::Rfc3339,
];

impl DateFormat {
    pub fn parse(&self, raw: &str) -> Option<DateTime<Utc>> {
        match self {
            DateFormat::Rfc1123Gmt => {
                NaiveDateTime::parse_from_str(raw, "%a, %d %b %Y %H:%M:%S GMT")
                    .ok()
                    .map(|naive| naive.and_utc())
            }
            DateFormat::Rfc2822 => DateTime::parse_from_rfc2822(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            DateFormat::Rfc3339 => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// Parses `raw` with the first matching known format.
pub fn try_normalize(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    FORMATS.iter().find_map(|format| format.parse(raw))
}

/// Like [`try_normalize`], falling back to now.
pub fn normalize(raw: &str) -> DateTime<Utc> {
    try_normalize(raw).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn parses_rfc1123_gmt() {
        let parsed = normalize("Tue, 18 Jun 2024 05:24:16 GMT");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 6, 18, 5, 24, 16).unwrap());
    }

    #[test]
    fn first_format_in_list_is_rfc1123() {
        assert_eq!(FORMATS[0], DateFormat::Rfc1123Gmt);
        assert!(DateFormat::Rfc1123Gmt
            .parse("Tue, 18 Jun 2024 05:24:16 GMT")
            .is_some());
        assert!(DateFormat::Rfc1123Gmt
            .parse("Tue, 18 Jun 2024 05:24:16 +0800")
            .is_none());
    }

    #[test]
    fn parses_numeric_offsets_and_atom_dates() {
        assert_eq!(
            normalize("Tue, 18 Jun 2024 13:24:16 +0800"),
            Utc.with_ymd_and_hms(2024, 6, 18, 5, 24, 16).unwrap()
        );
        assert_eq!(
            normalize("2024-06-18T05:24:16Z"),
            Utc.with_ymd_and_hms(2024, 6, 18, 5, 24, 16).unwrap()
        );
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert!(try_normalize("\n   Tue, 18 Jun 2024 05:24:16 GMT  \n").is_some());
    }

    #[test]
    fn unparseable_input_falls_back_to_now() {
        assert!(try_normalize("not-a-date").is_none());

        let before = Utc::now();
        let parsed = normalize("not-a-date");
        let after = Utc::now();
        assert!(parsed >= before - Duration::seconds(1));
        assert!(parsed <= after + Duration::seconds(1));

        let empty = normalize("");
        assert!((Utc::now() - empty).num_seconds().abs() <= 1);
    }
}
