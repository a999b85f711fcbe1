//! Sources file and process settings.

use crate::types::{AggregatorError, LiveSourceSpec, Result, SourceDescriptor, UNKNOWN_SOURCE_TYPE};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/matome.db";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_SOURCES_PATH: &str = "config/sources.toml";

/// The only transport kind the ingestion cycle knows how to pull.
pub const RSS_KIND: &str = "rss";

fn default_weight() -> f64 {
    1.0
}

/// One `[[sources]]` entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub feed_url: Option<String>,
    pub handle: Option<String>,
    pub url: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub source_type: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl SourceConfig {
    /// Explicit `source_type`, then metadata `platform`, then metadata
    /// `source_type`, then the declared kind.
    pub fn effective_type(&self) -> String {
        let from_metadata = ["platform", "source_type"]
            .iter()
            .find_map(|key| self.metadata.get(*key).and_then(Value::as_str));

        [self.source_type.as_deref(), from_metadata, Some(self.kind.as_str())]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|value| !value.is_empty())
            .unwrap_or(UNKNOWN_SOURCE_TYPE)
            .to_string()
    }

    pub fn descriptor(&self) -> SourceDescriptor {
        SourceDescriptor {
            name: self.name.clone(),
            handle: self.handle.clone(),
            source_type: self.effective_type(),
            url: self.url.clone(),
            weight: Some(self.weight),
            metadata: Some(self.metadata.clone()),
        }
    }

    /// Pull target for sources the cycle can fetch.
    pub fn live_spec(&self, max_entries: usize) -> Option<LiveSourceSpec> {
        if self.kind != RSS_KIND {
            return None;
        }
        self.feed_url.as_ref().map(|uri| LiveSourceSpec {
            uri: uri.clone(),
            max_entries,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AggregatorError::Config("source name must not be empty".to_string()));
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(AggregatorError::Config(format!(
                "source {} has invalid weight {}",
                self.name, self.weight
            )));
        }
        if self.kind == RSS_KIND && self.feed_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
            return Err(AggregatorError::Config(format!(
                "rss source {} is missing feed_url",
                self.name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl SourcesConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AggregatorError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SourcesConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !names.insert(source.name.as_str()) {
                return Err(AggregatorError::Config(format!("duplicate source name {}", source.name)));
            }
        }
        Ok(())
    }
}
