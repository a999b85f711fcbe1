use crate::types::{FetchConfig, InputItem, LiveSourceSpec, Result, Transport};
use crate::{FeedParser, Fetcher};
use async_trait::async_trait;
use tracing::info;

/// Pulls the latest page of an RSS or Atom feed over HTTP.
pub struct RssTransport {
    fetcher: Fetcher,
    parser: FeedParser,
}

impl RssTransport {
    pub fn new(fetch_config: FetchConfig) -> Result<Self> {
        Ok(Self {
            fetcher: Fetcher::new(fetch_config)?,
            parser: FeedParser::new(),
        })
    }
}

#[async_trait]
impl Transport for RssTransport {
    async fn fetch(&self, source: &LiveSourceSpec) -> anyhow::Result<Vec<InputItem>> {
        info!("Pulling RSS feed: {}", source.uri);

        let content = self.fetcher.fetch_feed(&source.uri).await?;
        let entries = self.parser.parse_feed(&content, source.max_entries)?;

        info!("Pulled {} entries from RSS feed {}", entries.len(), source.uri);
        Ok(entries)
    }
}
