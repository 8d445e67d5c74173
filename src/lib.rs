//! Website analytics on a single DynamoDB table.
//!
//! Visitors, their locations, browsers, sessions and page visits share one
//! table with per-page rollups. [`ingest`] turns click-stream exports into
//! those records and [`client::TableClient::recompute_page`] rebuilds the
//! rollups of a page from its visits.

pub mod aggregate;
pub mod client;
pub mod codec;
pub mod config;
pub mod entities;
pub mod error;
pub mod export;
pub mod geo;
pub mod ingest;
pub mod sessionize;
pub mod store;

pub use error::{Error, Result};
