use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A pollable feed the transport knows how to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSourceSpec {
    pub uri: String,
    pub max_entries: usize,
}

/// One raw observation yielded by a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputItem {
    pub url: String,
    pub title: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Text fields produced by an enrichment pass over an article.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub text: String,
    pub bullet_points: Vec<String>,
    pub tags: Vec<String>,
    pub language: String,
}

// Object style note:
// Transports and enrichers are called from short-lived ingestion passes.
// Each call is independent and may be retried by the caller; implementations
// must not retry forever and must bound their own request time.

#[async_trait]
pub trait Transport: Send + Sync {
    /// Pull at most `source.max_entries` observations. Entries without a URL
    /// are dropped here, never surfaced to the caller.
    async fn fetch(&self, source: &LiveSourceSpec) -> anyhow::Result<Vec<InputItem>>;
}

#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, url: &str) -> anyhow::Result<Enrichment>;
}
