//! DOM-based content extraction.
//!
//! Parses the capture body (UTF-8, lossy), pulls document metadata, selects
//! the main content region through a selector cascade, strips chrome
//! (navigation, ads, comments) and renders a best-effort markdown view.

use crate::error::ExtractionError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chronoscrape_types::ExtractedContent;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

/// Elements dropped wholesale, content included.
const REMOVE_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "menu", "menuitem", "noscript",
    "object", "embed", "iframe", "frame", "frameset", "canvas",
];

/// Class names whose subtrees are pruned from the content region.
const EXCLUDE_CLASSES: &[&str] = &[
    "nav", "navigation", "menu", "sidebar", "ad", "ads", "advertisement", "social", "share",
    "comments", "comment", "related", "recommended",
];

/// Tags that typically hold main content, used by the body fallback.
const CONTENT_TAGS: &[&str] = &[
    "article", "section", "div", "p", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "pre",
    "code",
];

/// Selector cascade for the main content region, most specific first.
static CONTENT_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "[role=\"main\"]",
        "main",
        "article",
        "#content",
        "#main",
        "#primary",
        "#post",
        "#article",
        ".content",
        ".main",
        ".primary",
        ".post",
        ".article",
        ".entry-content",
        ".post-content",
        ".article-content",
        ".content-body",
        ".main-content",
    ]
    .iter()
    .map(|s| Selector::parse(s).expect("content selector must parse"))
    .collect()
});

static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());
static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static META_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("meta").unwrap());
static HTML_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("html").unwrap());
static HEADING_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").unwrap());
static PARAGRAPH_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("p").unwrap());
static BLOCKQUOTE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("blockquote").unwrap());

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static NEWLINE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Collapse whitespace runs to single spaces. Idempotent.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RUN.replace_all(text.trim(), " ").into_owned()
}

fn is_excluded(element: &ElementRef<'_>) -> bool {
    let name = element.value().name();
    if REMOVE_TAGS.contains(&name) {
        return true;
    }
    element
        .value()
        .classes()
        .any(|class| EXCLUDE_CLASSES.contains(&class))
}

/// Text of `element` with comments skipped and excluded subtrees pruned.
fn filtered_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_text(element, &mut out);
    out
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(_) => {
                let child_ref = ElementRef::wrap(child).expect("element node wraps");
                if !is_excluded(&child_ref) {
                    collect_text(child_ref, out);
                }
            }
            // Comment and other node kinds contribute nothing.
            _ => {}
        }
    }
}

/// Pick the main content region: first cascade selector with matches wins,
/// largest text body among its matches.
fn main_content<'a>(document: &'a Html) -> Option<ElementRef<'a>> {
    for selector in CONTENT_SELECTORS.iter() {
        let candidates: Vec<ElementRef<'a>> = document.select(selector).collect();
        if let Some(best) = candidates
            .into_iter()
            .max_by_key(|el| filtered_text(*el).len())
        {
            return Some(best);
        }
    }
    None
}

#[derive(Debug, Default)]
struct Metadata {
    title: Option<String>,
    description: Option<String>,
    keywords: Option<String>,
    author: Option<String>,
    published_date: Option<String>,
    language: Option<String>,
}

fn extract_metadata(document: &Html) -> Metadata {
    let mut meta = Metadata::default();

    if let Some(title) = document.select(&TITLE_SELECTOR).next() {
        let text = collapse_whitespace(&title.text().collect::<String>());
        if !text.is_empty() {
            meta.title = Some(text);
        }
    }

    for element in document.select(&META_SELECTOR) {
        let name = element.value().attr("name").unwrap_or("").to_ascii_lowercase();
        let property = element
            .value()
            .attr("property")
            .unwrap_or("")
            .to_ascii_lowercase();
        let Some(content) = element.value().attr("content").map(str::trim) else {
            continue;
        };
        if content.is_empty() {
            continue;
        }

        if name == "description" || name == "og:description" || property == "og:description" {
            meta.description = Some(content.to_string());
        } else if name == "keywords" {
            meta.keywords = Some(content.to_string());
        } else if name == "author"
            || name == "article:author"
            || property == "article:author"
            || property == "og:author"
        {
            meta.author = Some(content.to_string());
        } else if name == "date"
            || name == "published"
            || name == "article:published_time"
            || property == "article:published_time"
        {
            meta.published_date = Some(content.to_string());
        }
    }

    if let Some(html) = document.select(&HTML_SELECTOR).next() {
        let lang = html
            .value()
            .attr("lang")
            .or_else(|| html.value().attr("xml:lang"));
        if let Some(lang) = lang {
            let primary = lang.split('-').next().unwrap_or(lang).to_ascii_lowercase();
            if !primary.is_empty() {
                meta.language = Some(primary);
            }
        }
    }

    meta
}

/// Parse a published-date meta value. Accepts `YYYY-MM-DD`,
/// `YYYY-MM-DDTHH:MM:SS` and RFC 3339 with or without fractional seconds.
pub fn parse_published_date(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    let head: String = trimmed.chars().take(19).collect();
    if let Ok(naive) = NaiveDateTime::parse_from_str(&head, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    let date_part = head.get(..10)?;
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

fn extract_main_text(document: &Html) -> String {
    if let Some(main) = main_content(document) {
        return collapse_whitespace(&filtered_text(main));
    }

    // No content selector matched: harvest substantial blocks from the body.
    let Some(body) = document.select(&BODY_SELECTOR).next() else {
        return String::new();
    };
    let mut parts: Vec<String> = Vec::new();
    for tag in CONTENT_TAGS {
        let selector = Selector::parse(tag).expect("tag selector must parse");
        for element in body.select(&selector) {
            if is_excluded(&element) {
                continue;
            }
            let text = collapse_whitespace(&filtered_text(element));
            if text.len() > 50 {
                parts.push(text);
            }
        }
    }
    collapse_whitespace(&parts.join(" "))
}

fn html_to_markdown(document: &Html) -> String {
    let scope = main_content(document)
        .or_else(|| document.select(&BODY_SELECTOR).next());
    let Some(scope) = scope else {
        return String::new();
    };

    let mut parts: Vec<String> = Vec::new();

    for heading in scope.select(&HEADING_SELECTOR) {
        let level = heading.value().name()[1..].parse::<usize>().unwrap_or(1);
        let text = collapse_whitespace(&heading.text().collect::<String>());
        if !text.is_empty() {
            parts.push(format!("{} {}\n", "#".repeat(level), text));
        }
    }

    for paragraph in scope.select(&PARAGRAPH_SELECTOR) {
        let text = collapse_whitespace(&paragraph.text().collect::<String>());
        if !text.is_empty() {
            parts.push(format!("{text}\n"));
        }
    }

    for quote in scope.select(&BLOCKQUOTE_SELECTOR) {
        let text = collapse_whitespace(&quote.text().collect::<String>());
        if !text.is_empty() {
            let quoted: Vec<String> = text.lines().map(|line| format!("> {line}")).collect();
            parts.push(format!("{}\n", quoted.join("\n")));
        }
    }

    let markdown = parts.join("\n");
    NEWLINE_RUN.replace_all(&markdown, "\n\n").trim().to_string()
}

/// DOM extractor over raw capture bytes.
#[derive(Debug, Default, Clone)]
pub struct HtmlExtractor;

impl HtmlExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, bytes: &[u8]) -> Result<ExtractedContent, ExtractionError> {
        let html_text = String::from_utf8_lossy(bytes);
        let document = Html::parse_document(&html_text);

        let metadata = extract_metadata(&document);
        let text = extract_main_text(&document);
        let markdown = html_to_markdown(&document);

        let mut content = ExtractedContent::new(
            metadata.title.unwrap_or_else(|| "No Title".to_string()),
            text,
            markdown,
            "dom",
        );
        content.html = Some(html_text.into_owned());
        content.meta_description = metadata.description;
        content.meta_keywords = metadata.keywords;
        content.author = metadata.author;
        content.published_date = metadata.published_date.as_deref().and_then(parse_published_date);
        content.language = metadata.language;
        Ok(content)
    }
}
