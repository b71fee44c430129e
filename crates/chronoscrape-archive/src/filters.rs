//! Content-filtering passes applied to capture streams.
//!
//! Order inside the pipeline is fixed: size, attachment extension,
//! list-page heuristic, digest dedup. The static-asset prefilter runs
//! earlier, at the strategy boundary, because extension membership is
//! independent of the other passes.

use chronoscrape_types::CdxRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Extensions that never carry article content.
const STATIC_ASSET_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".woff", ".woff2", ".ttf",
    ".eot", ".map",
];

/// Attachment extensions dropped when `include_attachments` is off.
const ATTACHMENT_EXTENSIONS: &[&str] = &[
    // documents
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".odt", ".ods", ".odp", ".rtf",
    ".txt",
    // archives
    ".zip", ".rar", ".7z", ".tar", ".gz", ".bz2",
    // heavyweight image formats
    ".bmp", ".tiff", ".eps", ".ai", ".psd",
    // audio / video
    ".mp3", ".mp4", ".avi", ".mov", ".wmv", ".flv", ".wav", ".ogg",
    // binaries
    ".exe", ".dmg", ".deb", ".rpm", ".msi", ".iso",
];

/// URL patterns of list/overview pages. Extensions of this set must only add
/// matches, never remove them.
static LIST_PAGE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // blog and news lists
        r"/blog/?$",
        r"/posts/?$",
        r"/news/?$",
        r"/articles/?$",
        r"/blog/page/\d+",
        r"/posts/page/\d+",
        r"/news/page/\d+",
        // category and archive pages
        r"/category/",
        r"/tag/",
        r"/archive/",
        r"/archives/",
        r"/\d{4}/?$",
        r"/\d{4}/\d{2}/?$",
        r"/\d{4}/\d{2}/\d{2}/?$",
        // index and overview pages
        r"/index\.html?$",
        r"/sitemap",
        r"/overview",
        r"/all-posts",
        r"/all-articles",
        r"/post-list",
        // pagination
        r"/page/\d+",
        r"/p/\d+",
        r"\?page=\d+",
        r"&page=\d+",
        r"/\d+/?$",
        // search and filter pages
        r"/search/",
        r"\?search=",
        r"\?filter=",
        r"\?sort=",
        r"\?category=",
        r"\?tag=",
        r"\?author=",
        // feeds and API endpoints
        r"/feed/?$",
        r"/rss/?$",
        r"/api/",
        r"\.xml$",
        r"\.json$",
        // common CMS list pages
        r"/wp-admin/",
        r"/admin/",
        r"/dashboard/",
        r"/categories/?$",
        r"/tags/?$",
        r"/authors/?$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("list-page pattern must compile"))
    .collect()
});

fn url_path_part(url: &str) -> &str {
    let no_query = url.split('?').next().unwrap_or(url);
    no_query.split('#').next().unwrap_or(no_query)
}

/// Static asset check applied at every strategy boundary.
pub fn is_static_asset(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    let path = url_path_part(&lower);
    STATIC_ASSET_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn is_attachment_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    let path = url_path_part(&lower);
    ATTACHMENT_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Heuristic for list/overview pages that churn on every capture.
///
/// A URL is a list page when (i) it matches one of the frozen patterns,
/// (ii) it splits into at most four `/` segments none longer than ten
/// characters, or (iii) it carries more than two `&` query separators.
/// The check is idempotent by construction: it only reads the URL.
pub fn is_list_page(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();

    if LIST_PAGE_PATTERNS.iter().any(|p| p.is_match(&lower)) {
        return true;
    }

    let parts: Vec<&str> = url.split('/').collect();
    if parts.len() <= 4 && !parts.iter().any(|part| part.len() > 10) {
        return true;
    }

    if url.contains('?') && url.matches('&').count() > 2 {
        return true;
    }

    false
}

/// Drop captures outside `min_size ..= max_size`. Unknown lengths pass.
pub fn filter_by_size(
    records: Vec<CdxRecord>,
    min_size: u64,
    max_size: u64,
) -> (Vec<CdxRecord>, u64) {
    let mut filtered = 0;
    let kept = records
        .into_iter()
        .filter(|record| {
            let length = record.content_length_bytes();
            if length > 0 && length < min_size {
                filtered += 1;
                return false;
            }
            if max_size > 0 && length > max_size {
                filtered += 1;
                return false;
            }
            true
        })
        .collect();
    (kept, filtered)
}

/// Drop attachment-extension captures unless attachments are wanted.
pub fn filter_attachments(
    records: Vec<CdxRecord>,
    include_attachments: bool,
) -> (Vec<CdxRecord>, u64) {
    if include_attachments {
        return (records, 0);
    }
    let mut filtered = 0;
    let kept = records
        .into_iter()
        .filter(|record| {
            if is_attachment_url(&record.original_url) {
                filtered += 1;
                false
            } else {
                true
            }
        })
        .collect();
    (kept, filtered)
}

/// Drop list pages.
pub fn filter_list_pages(records: Vec<CdxRecord>) -> (Vec<CdxRecord>, u64) {
    let mut filtered = 0;
    let kept = records
        .into_iter()
        .filter(|record| {
            if is_list_page(&record.original_url) {
                filtered += 1;
                false
            } else {
                true
            }
        })
        .collect();
    (kept, filtered)
}

/// Keep the first capture of each digest; later duplicates and anything in
/// `existing` are dropped. Relative order is preserved.
pub fn filter_duplicates(
    records: Vec<CdxRecord>,
    existing: &HashSet<String>,
) -> (Vec<CdxRecord>, u64) {
    let mut seen = existing.clone();
    let mut filtered = 0;
    let kept = records
        .into_iter()
        .filter(|record| {
            if seen.contains(&record.digest) {
                filtered += 1;
                false
            } else {
                seen.insert(record.digest.clone());
                true
            }
        })
        .collect();
    (kept, filtered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str, digest: &str, length: Option<u64>) -> CdxRecord {
        CdxRecord {
            timestamp: "20200315120000".into(),
            original_url: url.into(),
            mime_type: "text/html".into(),
            status_code: 200,
            digest: digest.into(),
            length,
        }
    }

    #[test]
    fn static_assets_detected() {
        assert!(is_static_asset("https://example.com/theme/site.css"));
        assert!(is_static_asset("https://example.com/app.js?v=3"));
        assert!(!is_static_asset("https://example.com/article/cascade-css-history"));
    }

    #[test]
    fn list_page_scenarios() {
        // the four URLs of the heuristic acceptance scenario
        assert!(is_list_page("https://s/blog/"));
        assert!(!is_list_page("https://s/blog/2020/03/15/post-title"));
        assert!(is_list_page("https://s/tag/politics/"));
        assert!(!is_list_page("https://s/about/our-mission-and-team"));
    }

    #[test]
    fn list_page_query_param_heuristic() {
        assert!(is_list_page(
            "https://example.com/search-results-page?q=x&page=2&sort=asc&filter=recent"
        ));
    }

    #[test]
    fn list_page_filter_is_idempotent() {
        let records = vec![
            record("https://s/blog/", "D1", None),
            record("https://s/blog/2020/03/15/post-title", "D2", None),
            record("https://s/tag/politics/", "D3", None),
        ];
        let (once, dropped) = filter_list_pages(records);
        assert_eq!(dropped, 2);
        let (twice, dropped_again) = filter_list_pages(once.clone());
        assert_eq!(dropped_again, 0);
        assert_eq!(once, twice);
    }

    #[test]
    fn size_filter_bounds() {
        let records = vec![
            record("https://example.com/long-form-piece", "D1", Some(150)),
            record("https://example.com/long-form-piece2", "D2", Some(2048)),
            record("https://example.com/long-form-piece3", "D3", Some(20_000_000)),
            record("https://example.com/long-form-piece4", "D4", None),
        ];
        let (kept, dropped) = filter_by_size(records, 200, 10 * 1024 * 1024);
        assert_eq!(dropped, 2);
        let digests: Vec<_> = kept.iter().map(|r| r.digest.as_str()).collect();
        assert_eq!(digests, ["D2", "D4"]);
    }

    #[test]
    fn attachment_filter_respects_flag() {
        let records = vec![
            record("https://example.com/annual-report.pdf", "D1", None),
            record("https://example.com/annual-report-summary", "D2", None),
        ];
        let (kept, dropped) = filter_attachments(records.clone(), true);
        assert_eq!((kept.len(), dropped), (2, 0));
        let (kept, dropped) = filter_attachments(records, false);
        assert_eq!((kept.len(), dropped), (1, 1));
        assert_eq!(kept[0].digest, "D2");
    }

    #[test]
    fn duplicate_filter_keeps_first_occurrence() {
        let records = vec![
            record("https://example.com/page-one-long", "D1", None),
            record("https://example.com/page-two-long", "D2", None),
            record("https://example.com/page-two-copy", "D2", None),
            record("https://example.com/page-five-long", "D5", None),
            record("https://example.com/page-zero-long", "D0", None),
        ];
        let existing: HashSet<String> = ["D0".to_string()].into_iter().collect();
        let (kept, dropped) = filter_duplicates(records, &existing);
        let digests: Vec<_> = kept.iter().map(|r| r.digest.as_str()).collect();
        assert_eq!(digests, ["D1", "D2", "D5"]);
        assert_eq!(dropped, 2);
    }
}
