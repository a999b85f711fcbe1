#![allow(dead_code)]

use async_trait::async_trait;
use matome_aggregator::types::*;
use matome_aggregator::{Aggregator, Store};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Serves a fixed page of entries per feed URI and fails for unknown ones.
#[derive(Default)]
pub struct StaticTransport {
    pages: HashMap<String, Vec<InputItem>>,
    pub calls: Mutex<Vec<LiveSourceSpec>>,
}

impl StaticTransport {
    pub fn with_page(mut self, uri: &str, entries: Vec<InputItem>) -> Self {
        self.pages.insert(uri.to_string(), entries);
        self
    }
}

#[async_trait]
impl Transport for StaticTransport {
    async fn fetch(&self, source: &LiveSourceSpec) -> anyhow::Result<Vec<InputItem>> {
        self.calls.lock().unwrap().push(source.clone());
        match self.pages.get(&source.uri) {
            Some(entries) => Ok(entries.iter().take(source.max_entries).cloned().collect()),
            None => anyhow::bail!("connection refused: {}", source.uri),
        }
    }
}

/// Records every URL it is asked to enrich.
#[derive(Default)]
pub struct CountingEnricher {
    pub calls: AtomicUsize,
    pub urls: Mutex<Vec<String>>,
}

impl CountingEnricher {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Enricher for CountingEnricher {
    async fn enrich(&self, url: &str) -> anyhow::Result<Enrichment> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        Ok(Enrichment {
            text: format!("Summary of {}", url),
            bullet_points: vec!["First point.".to_string(), "Second point.".to_string()],
            tags: vec!["rust".to_string(), "news".to_string()],
            language: "en".to_string(),
        })
    }
}

pub struct FailingEnricher;

#[async_trait]
impl Enricher for FailingEnricher {
    async fn enrich(&self, _url: &str) -> anyhow::Result<Enrichment> {
        anyhow::bail!("article fetch timed out")
    }
}

pub struct Harness {
    pub aggregator: Arc<Aggregator>,
    pub store: Arc<Store>,
    pub enricher: Arc<CountingEnricher>,
}

pub async fn harness() -> Result<Harness> {
    harness_with_transport(StaticTransport::default()).await
}

pub async fn harness_with_transport(transport: StaticTransport) -> Result<Harness> {
    let store = Arc::new(Store::in_memory().await?);
    let enricher = Arc::new(CountingEnricher::default());
    let aggregator = Arc::new(Aggregator::new(store.clone(), Arc::new(transport), enricher.clone()));
    Ok(Harness {
        aggregator,
        store,
        enricher,
    })
}

/// Pooled store on a database file, for tests that need more than one
/// connection. Keep the returned directory alive for the test's duration.
pub async fn file_store() -> Result<(Arc<Store>, String, tempfile::TempDir)> {
    let dir = tempfile::tempdir().map_err(|e| AggregatorError::General(e.to_string()))?;
    let database_url = format!("sqlite://{}", dir.path().join("matome.db").display());
    let store = Store::connect(&database_url).await?;
    store.migrate().await?;
    Ok((Arc::new(store), database_url, dir))
}

pub fn aggregator_for(store: Arc<Store>, transport: StaticTransport) -> Arc<Aggregator> {
    Arc::new(Aggregator::new(
        store,
        Arc::new(transport),
        Arc::new(CountingEnricher::default()),
    ))
}

pub async fn failing_enricher_harness() -> Result<(Arc<Aggregator>, Arc<Store>)> {
    let store = Arc::new(Store::in_memory().await?);
    let aggregator = Arc::new(Aggregator::new(
        store.clone(),
        Arc::new(StaticTransport::default()),
        Arc::new(FailingEnricher),
    ));
    Ok((aggregator, store))
}

pub fn observation(item_url: &str, source_name: &str) -> Observation {
    Observation {
        item: ItemObservation {
            url: item_url.to_string(),
            source_type: Some("twitter".to_string()),
            ..Default::default()
        },
        source: SourceDescriptor {
            name: source_name.to_string(),
            source_type: "twitter".to_string(),
            ..Default::default()
        },
        mention: MentionObservation::default(),
    }
}

pub fn entry(url: &str, title: &str) -> InputItem {
    InputItem {
        url: url.to_string(),
        title: Some(title.to_string()),
        published_at: None,
    }
}
