//! Canonical extraction output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an extractor produced for one capture. `word_count` and `char_count`
/// are derived from `text` on construction and never set directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub title: String,
    pub text: String,
    pub markdown: String,
    pub html: Option<String>,
    pub meta_description: Option<String>,
    pub meta_keywords: Option<String>,
    pub author: Option<String>,
    pub published_date: Option<DateTime<Utc>>,
    pub language: Option<String>,
    pub word_count: usize,
    pub char_count: usize,
    pub extraction_method: String,
    pub extraction_secs: f64,
}

impl ExtractedContent {
    pub fn new(
        title: impl Into<String>,
        text: impl Into<String>,
        markdown: impl Into<String>,
        extraction_method: impl Into<String>,
    ) -> Self {
        let text = text.into();
        let word_count = text.split_whitespace().count();
        let char_count = text.chars().count();
        Self {
            title: title.into(),
            text,
            markdown: markdown.into(),
            html: None,
            meta_description: None,
            meta_keywords: None,
            author: None,
            published_date: None,
            language: None,
            word_count,
            char_count,
            extraction_method: extraction_method.into(),
            extraction_secs: 0.0,
        }
    }

    /// An extraction that produced nothing, tagged with the failing method.
    pub fn empty(extraction_method: impl Into<String>) -> Self {
        Self::new("", "", "", extraction_method)
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}
