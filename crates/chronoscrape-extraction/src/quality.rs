//! Extraction quality scoring on a 0-10 scale.

use chronoscrape_types::ExtractedContent;

/// Score an extraction result.
///
/// Zero when there is no text or the method records an error. Otherwise an
/// additive score: body length (up to 3), title presence (1), metadata
/// richness (0.4 each, capped at 2), markdown structure (1), structured
/// service bonus (1), success bonus (1); capped at 10.
pub fn quality_score(content: &ExtractedContent) -> f64 {
    if !content.has_text() || content.extraction_method.contains("error") {
        return 0.0;
    }

    let mut score = 0.0;

    if content.word_count > 50 {
        score += (content.word_count as f64 / 200.0).min(3.0);
    }

    if content.title.trim().len() >= 5 {
        score += 1.0;
    }

    let metadata_fields = [
        content.author.is_some(),
        content.meta_description.is_some(),
        content.meta_keywords.is_some(),
        content.language.is_some(),
        content.published_date.is_some(),
    ];
    let metadata_score = metadata_fields.iter().filter(|present| **present).count() as f64 * 0.4;
    score += metadata_score.min(2.0);

    if !content.markdown.is_empty() && content.markdown.len() >= content.text.len() / 2 {
        score += 1.0;
    }

    if content.extraction_method.contains("firecrawl") {
        score += 1.0;
    }

    // Success bonus.
    score += 1.0;

    score.min(10.0)
}
