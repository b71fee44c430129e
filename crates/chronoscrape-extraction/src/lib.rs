//! Content extraction for archived captures.
//!
//! Three extractors feed one canonical output shape: a DOM-based HTML
//! extractor, a PDF text extractor (via `chronoscrape-pdf`), and a client
//! for an external high-quality structured extraction service. The
//! [`HybridExtractor`] routes each capture between them based on value
//! signals (TLD, size, URL path) and scores the result 0-10.

pub mod error;
pub mod html;
pub mod hybrid;
pub mod quality;
pub mod structured;

pub use error::ExtractionError;
pub use html::HtmlExtractor;
pub use hybrid::{HybridConfig, HybridExtractor, HybridMetricsSnapshot};
pub use quality::quality_score;
pub use structured::StructuredExtractor;
