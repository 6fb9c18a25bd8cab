//! Remote deny-list retrieval.
//!
//! Fetches a list of account identifiers from a remote text or JSON
//! resource, retrying on empty responses and caching results per call
//! signature for a fixed window.

mod cache;
mod fetcher;
mod http;

pub use cache::TtlCache;
pub use fetcher::{BlacklistFetcher, BlacklistId, CACHE_CAPACITY, CACHE_TTL, parse_text};
pub use http::{Fetch, FetchResponse, HttpFetcher, SourceFormat};
