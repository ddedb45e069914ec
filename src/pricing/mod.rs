//! Price aggregation for many assets without tripping upstream rate limits

pub mod fetcher;
pub mod source;

pub use fetcher::{BatchedRetryingFetcher, FetchPolicy};
pub use source::{HttpPriceSource, PriceSource};

#[cfg(test)]
pub use source::MockPriceSource;
