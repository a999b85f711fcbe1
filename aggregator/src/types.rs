use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// Collaborator contracts live in the interfaces crate
pub use interfaces::defs::{Enricher, Enrichment, InputItem, LiveSourceSpec, Transport};

/// Placeholder classification used until something better is known.
pub const UNKNOWN_SOURCE_TYPE: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub handle: Option<String>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub source_type: String,
    pub url: Option<String>,
    pub weight: f64,
    pub metadata_json: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    /// Decoded metadata bag. Malformed JSON reads as empty.
    pub fn metadata(&self) -> Map<String, Value> {
        self.metadata_json
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Map<String, Value>>(raw).ok())
            .unwrap_or_default()
    }

    /// Type shown to readers: metadata `platform`, then metadata `source_type`,
    /// then the declared type.
    pub fn display_type(&self) -> String {
        let metadata = self.metadata();
        ["platform", "source_type"]
            .iter()
            .find_map(|key| metadata.get(*key).and_then(Value::as_str))
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.source_type.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Item {
    pub id: i64,
    pub url: String,
    pub normalized_url: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub summary_points_json: Option<String>,
    pub tags_json: Option<String>,
    pub language: Option<String>,
    pub source_type: Option<String>,
    pub score_raw: f64,
    pub score_new: f64,
    pub score_buzz: f64,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn summary_points(&self) -> Vec<String> {
        deserialize_list(self.summary_points_json.as_deref())
    }

    pub fn tags(&self) -> Vec<String> {
        deserialize_list(self.tags_json.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Mention {
    pub id: i64,
    pub item_id: i64,
    pub source_id: i64,
    pub external_id: Option<String>,
    pub post_url: Option<String>,
    pub merge_key: String,
    pub embed_html: Option<String>,
    pub note: Option<String>,
    pub like_count: Option<i64>,
    pub repost_count: Option<i64>,
    pub reply_count: Option<i64>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Latest known description of a publisher, as carried by one observation.
///
/// `None` fields leave the stored value alone; `source_type` always wins.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    pub handle: Option<String>,
    pub source_type: String,
    pub url: Option<String>,
    pub weight: Option<f64>,
    pub metadata: Option<Map<String, Value>>,
}

/// Item-level fields carried by one observation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ItemObservation {
    pub url: String,
    pub title: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub source_type: Option<String>,
}

/// Mention-level fields carried by one observation. Absent fields never
/// overwrite stored values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MentionObservation {
    pub external_id: Option<String>,
    pub post_url: Option<String>,
    pub embed_html: Option<String>,
    pub note: Option<String>,
    pub like_count: Option<i64>,
    pub repost_count: Option<i64>,
    pub reply_count: Option<i64>,
}

/// Everything needed to run one resolve, reconcile and score pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Observation {
    pub item: ItemObservation,
    pub source: SourceDescriptor,
    pub mention: MentionObservation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentStatus {
    /// The item already existed, so enrichment was not invoked.
    NotAttempted,
    Applied,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub item: Item,
    pub source: Source,
    pub mention: Mention,
    pub item_created: bool,
    pub mention_created: bool,
    pub enrichment: EnrichmentStatus,
}

/// Per-cycle tally returned by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub sources_seen: usize,
    pub sources_skipped: usize,
    pub sources_failed: usize,
    pub observations: usize,
    pub observations_failed: usize,
    pub items_created: usize,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
    pub page_size: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Matome-Aggregator/0.1".to_string(),
            timeout_seconds: 30,
            max_retries: 2,
            retry_delay_seconds: 2,
            max_feed_size_mb: 10,
            max_redirects: 5,
            page_size: 50,
        }
    }
}

pub fn serialize_list(values: &[String]) -> Result<String> {
    Ok(serde_json::to_string(values)?)
}

pub fn deserialize_list(raw: Option<&str>) -> Vec<String> {
    raw.and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Item not found: {id}")]
    ItemNotFound { id: i64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error for {source_name}: {message}")]
    Transport { source_name: String, message: String },

    #[error("Enrichment failed: {0}")]
    Enrichment(String),

    #[error("Feed size exceeds limit: {size_mb}MB")]
    FeedTooLarge { size_mb: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
