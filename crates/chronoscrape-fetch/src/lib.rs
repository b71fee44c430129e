//! HTTP retrieval of raw capture bytes.
//!
//! One concern only: given a playback or raw-content URL, return the body
//! bytes and content type, with a hard size cap enforced before and during
//! the read, and transport-level retries with exponential backoff. Status
//! classification is the caller's job beyond the >= 400 short-circuit.

mod fetcher;

pub use fetcher::{ContentFetcher, FetchError, FetcherConfig};
