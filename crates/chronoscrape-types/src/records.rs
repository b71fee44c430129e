//! CDX capture records as returned by every archive source.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// How a domain query is matched against capture URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Prefix,
    Domain,
    Regex,
}

impl MatchType {
    /// Provider-grammar spelling of the match type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Prefix => "prefix",
            MatchType::Domain => "domain",
            MatchType::Regex => "regex",
        }
    }
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single archived capture of a URL at a point in time.
///
/// Every source strategy normalizes its rows to this shape. The `digest` is
/// an opaque content fingerprint; two captures with equal digests are
/// content-equivalent. Only `status_code == 200` captures enter the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdxRecord {
    /// 14-digit UTC timestamp, `YYYYMMDDHHMMSS`. Shorter values are
    /// zero-padded on parse.
    pub timestamp: String,
    pub original_url: String,
    pub mime_type: String,
    pub status_code: u16,
    pub digest: String,
    /// Advertised capture length in bytes, when the index knows it.
    pub length: Option<u64>,
}

impl CdxRecord {
    /// Playback URL for human consumption.
    pub fn archive_url(&self) -> String {
        format!(
            "https://web.archive.org/web/{}/{}",
            self.timestamp, self.original_url
        )
    }

    /// Raw byte-stream URL (`if_` flag skips the playback chrome).
    pub fn raw_content_url(&self) -> String {
        format!(
            "https://web.archive.org/web/{}if_/{}",
            self.timestamp, self.original_url
        )
    }

    pub fn content_length_bytes(&self) -> u64 {
        self.length.unwrap_or(0)
    }

    /// Timestamp parsed as a UTC instant. Short timestamps are right-padded
    /// with zeros, matching CDX server behavior.
    pub fn capture_instant(&self) -> Option<DateTime<Utc>> {
        let padded = format!("{:0<14}", self.timestamp);
        NaiveDateTime::parse_from_str(&padded, "%Y%m%d%H%M%S")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    }

    pub fn is_pdf(&self) -> bool {
        self.mime_type.to_ascii_lowercase().contains("pdf")
    }

    pub fn is_html(&self) -> bool {
        self.mime_type.to_ascii_lowercase().contains("html")
    }
}
