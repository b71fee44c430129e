//! Port traits for the external collaborators of the core pipeline.
//!
//! The relational store, the search indexer and the key-admin API are
//! deliberately abstract here; concrete adapters live outside the core.
//! Every operation is transactional from the core's point of view.

mod indexer;
mod key_engine;
mod store;

pub use indexer::Indexer;
pub use key_engine::KeyEngine;
pub use store::Store;
