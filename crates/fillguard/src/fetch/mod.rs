//! Origin retrieval.
//!
//! - [`OriginFetcher`] - single cancellable fetch, no internal retries.
//! - [`HttpFetcher`] - `GET` over reqwest (feature `http`).

mod interface;
#[cfg(feature = "http")]
mod http;

pub use interface::*;
#[cfg(feature = "http")]
pub use http::*;
