use crate::config::{SourceConfig, SourcesConfig};
use crate::reconciler::reconcile_mention;
use crate::resolver::{resolve_item, resolve_source, Resolved};
use crate::store::Store;
use crate::types::{
    AggregatorError, CycleReport, Enricher, EnrichmentStatus, FetchConfig, IngestOutcome, InputItem, Item,
    ItemObservation, MentionObservation, Observation, Result, Source, SourceDescriptor, Transport,
};
use crate::utils::url::{canonicalize, is_valid_http_url};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Runs observations through resolve, reconcile and score, and drives
/// ingestion cycles over configured sources.
pub struct Aggregator {
    store: Arc<Store>,
    transport: Arc<dyn Transport>,
    enricher: Arc<dyn Enricher>,
    page_size: usize,
}

impl Aggregator {
    pub fn new(store: Arc<Store>, transport: Arc<dyn Transport>, enricher: Arc<dyn Enricher>) -> Self {
        Self {
            store,
            transport,
            enricher,
            page_size: FetchConfig::default().page_size,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// One pass over every configured source. Source and per-entry failures
    /// are logged and counted; only an invalid config aborts the cycle.
    pub async fn run_once(&self, config: &SourcesConfig) -> Result<CycleReport> {
        config.validate()?;

        let run_id = Uuid::new_v4();
        self.run_cycle(config)
            .instrument(info_span!("ingest_cycle", %run_id))
            .await
    }

    async fn run_cycle(&self, config: &SourcesConfig) -> Result<CycleReport> {
        info!("Starting ingestion cycle over {} sources", config.sources.len());
        let mut report = CycleReport::default();

        for source_config in &config.sources {
            report.sources_seen += 1;
            self.ingest_source(source_config, &mut report).await;
        }

        info!(
            sources = report.sources_seen,
            skipped = report.sources_skipped,
            failed = report.sources_failed,
            observations = report.observations,
            observations_failed = report.observations_failed,
            items_created = report.items_created,
            "Ingestion cycle finished"
        );
        Ok(report)
    }

    async fn ingest_source(&self, source_config: &SourceConfig, report: &mut CycleReport) {
        let descriptor = source_config.descriptor();
        let source = match self.refresh_source(&descriptor).await {
            Ok(source) => source,
            Err(e) => {
                error!("Failed to refresh source {}: {}", descriptor.name, e);
                report.sources_failed += 1;
                return;
            }
        };

        let Some(spec) = source_config.live_spec(self.page_size) else {
            debug!("Skipping source {} of kind {}", source.name, source_config.kind);
            report.sources_skipped += 1;
            return;
        };

        let entries = match self.transport.fetch(&spec).await {
            Ok(entries) => entries,
            Err(e) => {
                let e = AggregatorError::Transport {
                    source_name: source.name.clone(),
                    message: e.to_string(),
                };
                warn!("{}", e);
                report.sources_failed += 1;
                return;
            }
        };

        let source_type = source_config.effective_type();
        for entry in entries {
            let entry_url = entry.url.clone();
            report.observations += 1;
            match self.record_mention(feed_observation(entry, &descriptor, &source_type)).await {
                Ok(outcome) if outcome.item_created => report.items_created += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!("Failed to ingest {} from {}: {}", entry_url, source.name, e);
                    report.observations_failed += 1;
                }
            }
        }
    }

    async fn refresh_source(&self, descriptor: &SourceDescriptor) -> Result<Source> {
        let mut tx = self.store.begin().await?;
        let source = resolve_source(&mut *tx, descriptor, Utc::now()).await?;
        tx.commit().await?;
        Ok(source.record)
    }

    /// Validated entry point for externally submitted mentions.
    pub async fn record_mention(&self, observation: Observation) -> Result<IngestOutcome> {
        self.record_mention_at(observation, Utc::now()).await
    }

    pub async fn record_mention_at(&self, observation: Observation, now: DateTime<Utc>) -> Result<IngestOutcome> {
        validate_observation(&observation)?;
        self.ingest_at(&observation, now).await
    }

    /// Resolve the source and item, reconcile the mention and rescore, all in
    /// one transaction. A newly created item is enriched after commit;
    /// enrichment failure never undoes the ingest.
    pub async fn ingest_at(&self, observation: &Observation, now: DateTime<Utc>) -> Result<IngestOutcome> {
        let normalized_url = canonicalize(&observation.item.url);

        let mut tx = self.store.begin().await?;
        let source = resolve_source(&mut *tx, &observation.source, now).await?;

        let item_observation = ItemObservation {
            source_type: observation
                .item
                .source_type
                .clone()
                .filter(|value| !value.trim().is_empty())
                .or_else(|| Some(source.record.display_type())),
            ..observation.item.clone()
        };
        let Resolved { record: mut item, created: item_created } =
            resolve_item(&mut *tx, &normalized_url, &item_observation, now).await?;

        let mention = reconcile_mention(&mut *tx, &mut item, &source.record, &observation.mention, now).await?;
        tx.commit().await?;

        let enrichment = if item_created {
            self.enrich(&mut item).await
        } else {
            EnrichmentStatus::NotAttempted
        };

        Ok(IngestOutcome {
            item,
            source: source.record,
            mention: mention.record,
            item_created,
            mention_created: mention.created,
            enrichment,
        })
    }

    async fn enrich(&self, item: &mut Item) -> EnrichmentStatus {
        let enrichment = match self.enricher.enrich(&item.url).await {
            Ok(enrichment) => enrichment,
            Err(e) => {
                warn!("Enrichment failed for item {} ({}): {}", item.id, item.url, e);
                return EnrichmentStatus::Failed(e.to_string());
            }
        };

        match self.store.apply_enrichment(item.id, &enrichment).await {
            Ok(true) => {
                if let Ok(updated) = self.store.get_item(item.id).await {
                    *item = updated;
                }
                debug!("Enriched item {}", item.id);
                EnrichmentStatus::Applied
            }
            Ok(false) => EnrichmentStatus::NotAttempted,
            Err(e) => {
                error!("Failed to store enrichment for item {}: {}", item.id, e);
                EnrichmentStatus::Failed(e.to_string())
            }
        }
    }
}

fn feed_observation(entry: InputItem, descriptor: &SourceDescriptor, source_type: &str) -> Observation {
    Observation {
        item: ItemObservation {
            url: entry.url,
            title: entry.title,
            published_at: entry.published_at,
            source_type: Some(source_type.to_string()),
        },
        source: descriptor.clone(),
        mention: MentionObservation::default(),
    }
}

/// Boundary checks for submitted observations. Nothing is written when this
/// fails.
pub fn validate_observation(observation: &Observation) -> Result<()> {
    if !is_valid_http_url(&observation.item.url) {
        return Err(AggregatorError::Validation(format!(
            "item url must be an absolute http(s) URL: {}",
            observation.item.url
        )));
    }
    if observation.source.name.trim().is_empty() {
        return Err(AggregatorError::Validation("source name must not be empty".to_string()));
    }
    if observation.source.source_type.trim().is_empty() {
        return Err(AggregatorError::Validation("source type must not be empty".to_string()));
    }
    if let Some(weight) = observation.source.weight {
        if !weight.is_finite() || weight < 0.0 {
            return Err(AggregatorError::Validation(format!("source weight must be non-negative, got {}", weight)));
        }
    }

    for (field, value) in [
        ("source_url", &observation.source.url),
        ("post_url", &observation.mention.post_url),
    ] {
        if let Some(value) = value {
            if !is_valid_http_url(value) {
                return Err(AggregatorError::Validation(format!("{} must be an http(s) URL: {}", field, value)));
            }
        }
    }

    let mention = &observation.mention;
    for (field, value) in [
        ("like_count", mention.like_count),
        ("repost_count", mention.repost_count),
        ("reply_count", mention.reply_count),
    ] {
        if value.is_some_and(|count| count < 0) {
            return Err(AggregatorError::Validation(format!("{} must be non-negative", field)));
        }
    }

    Ok(())
}
