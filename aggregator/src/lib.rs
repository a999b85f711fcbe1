pub mod aggregator;
pub mod api;
pub mod config;
pub mod enrichment;
pub mod fetcher;
pub mod parser;
pub mod reconciler;
pub mod resolver;
pub mod scoring;
pub mod sources;
pub mod store;
pub mod types;
pub mod utils;

pub use aggregator::Aggregator;
pub use config::{SourceConfig, SourcesConfig};
pub use enrichment::ArticleSummarizer;
pub use fetcher::Fetcher;
pub use parser::FeedParser;
pub use sources::RssTransport;
pub use store::{ItemQuery, SortOrder, Store};
pub use types::*;
