//! Find-or-create for sources and items.
//!
//! Both lookups are transactional upserts: insert with `ON CONFLICT DO
//! NOTHING`, and when the unique key already exists read the stored row and
//! fold the new observation into it with a merge function. A concurrent
//! writer that wins the insert race is therefore read back, never reported.

use crate::types::{Item, ItemObservation, Result, Source, SourceDescriptor, UNKNOWN_SOURCE_TYPE};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteConnection;
use tracing::{debug, info};

/// A record plus whether this call inserted it.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub record: T,
    pub created: bool,
}

fn metadata_json(descriptor: &SourceDescriptor) -> Option<String> {
    descriptor
        .metadata
        .as_ref()
        .map(|metadata| Value::Object(metadata.clone()).to_string())
}

/// Fold the latest descriptor into a stored source.
///
/// The declared type always takes the newest value. Handle, url, weight and
/// metadata take the descriptor's value whenever it carries one.
/// Timestamps are left to the caller.
pub fn merge_source(current: &Source, incoming: &SourceDescriptor) -> Source {
    let mut merged = current.clone();

    if !incoming.source_type.is_empty() {
        merged.source_type = incoming.source_type.clone();
    }
    if let Some(handle) = &incoming.handle {
        merged.handle = Some(handle.clone());
    }
    if let Some(url) = &incoming.url {
        merged.url = Some(url.clone());
    }
    if let Some(weight) = incoming.weight {
        merged.weight = weight;
    }
    if incoming.metadata.is_some() {
        merged.metadata_json = metadata_json(incoming);
    }

    merged
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |value| value.trim().is_empty())
}

/// Fold one observation into a stored item.
///
/// - `title` is filled only while empty
/// - `source_type` is filled only while empty or unknown
/// - `published_at` only moves to a strictly earlier instant
/// - `last_seen_at` advances to `now` and never moves backwards
pub fn merge_item(current: &Item, incoming: &ItemObservation, now: DateTime<Utc>) -> Item {
    let mut merged = current.clone();

    if is_blank(merged.title.as_deref()) && !is_blank(incoming.title.as_deref()) {
        merged.title = incoming.title.clone();
    }

    let type_is_placeholder = match merged.source_type.as_deref() {
        None => true,
        Some(value) => value.trim().is_empty() || value == UNKNOWN_SOURCE_TYPE,
    };
    if type_is_placeholder && !is_blank(incoming.source_type.as_deref()) {
        merged.source_type = incoming.source_type.clone();
    }

    if let Some(published_at) = incoming.published_at {
        if current.published_at.map_or(true, |known| published_at < known) {
            merged.published_at = Some(published_at);
        }
    }

    merged.last_seen_at = Some(current.last_seen_at.map_or(now, |seen| seen.max(now)));

    merged
}

pub async fn resolve_source(
    conn: &mut SqliteConnection,
    descriptor: &SourceDescriptor,
    now: DateTime<Utc>,
) -> Result<Resolved<Source>> {
    let inserted = sqlx::query_as::<_, Source>(
        r#"
        INSERT INTO sources (name, handle, type, url, weight, metadata_json, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (name) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(&descriptor.name)
    .bind(&descriptor.handle)
    .bind(&descriptor.source_type)
    .bind(&descriptor.url)
    .bind(descriptor.weight.unwrap_or(1.0))
    .bind(metadata_json(descriptor))
    .bind(now)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(source) = inserted {
        info!("Added new source: {} (ID: {})", source.name, source.id);
        return Ok(Resolved { record: source, created: true });
    }

    let current = sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE name = ?")
        .bind(&descriptor.name)
        .fetch_one(&mut *conn)
        .await?;

    let mut merged = merge_source(&current, descriptor);
    if merged != current {
        merged.updated_at = now;
        sqlx::query(
            r#"
            UPDATE sources
            SET handle = ?, type = ?, url = ?, weight = ?, metadata_json = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&merged.handle)
        .bind(&merged.source_type)
        .bind(&merged.url)
        .bind(merged.weight)
        .bind(&merged.metadata_json)
        .bind(merged.updated_at)
        .bind(merged.id)
        .execute(&mut *conn)
        .await?;
        debug!("Refreshed source {} (ID: {})", merged.name, merged.id);
    }

    Ok(Resolved { record: merged, created: false })
}

/// Find or create the item for `normalized_url`. A new item starts with zero
/// scores and `last_seen_at = now`; callers rescore it in the same transaction.
pub async fn resolve_item(
    conn: &mut SqliteConnection,
    normalized_url: &str,
    incoming: &ItemObservation,
    now: DateTime<Utc>,
) -> Result<Resolved<Item>> {
    let inserted = sqlx::query_as::<_, Item>(
        r#"
        INSERT INTO items (url, normalized_url, title, source_type, published_at, last_seen_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (normalized_url) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(&incoming.url)
    .bind(normalized_url)
    .bind(incoming.title.as_deref().filter(|title| !title.trim().is_empty()))
    .bind(&incoming.source_type)
    .bind(incoming.published_at)
    .bind(now)
    .bind(now)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(item) = inserted {
        info!("Added new item: {} (ID: {})", item.normalized_url, item.id);
        return Ok(Resolved { record: item, created: true });
    }

    let current = sqlx::query_as::<_, Item>("SELECT * FROM items WHERE normalized_url = ?")
        .bind(normalized_url)
        .fetch_one(&mut *conn)
        .await?;

    let mut merged = merge_item(&current, incoming, now);
    merged.updated_at = now;
    sqlx::query(
        r#"
        UPDATE items
        SET title = ?, source_type = ?, published_at = ?, last_seen_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&merged.title)
    .bind(&merged.source_type)
    .bind(merged.published_at)
    .bind(merged.last_seen_at)
    .bind(merged.updated_at)
    .bind(merged.id)
    .execute(&mut *conn)
    .await?;

    Ok(Resolved { record: merged, created: false })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn stored_source() -> Source {
        let now = Utc::now();
        Source {
            id: 3,
            name: "Hacker News".to_string(),
            handle: Some("hn".to_string()),
            source_type: "rss".to_string(),
            url: Some("https://news.ycombinator.com".to_string()),
            weight: 1.5,
            metadata_json: Some(r#"{"platform":"hn"}"#.to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    fn stored_item(now: DateTime<Utc>) -> Item {
        Item {
            id: 9,
            url: "https://example.com/a?utm_source=x".to_string(),
            normalized_url: "https://example.com/a".to_string(),
            title: None,
            summary: None,
            summary_points_json: None,
            tags_json: None,
            language: None,
            source_type: Some(UNKNOWN_SOURCE_TYPE.to_string()),
            score_raw: 0.0,
            score_new: 0.0,
            score_buzz: 0.0,
            last_seen_at: Some(now - Duration::hours(1)),
            published_at: Some(now - Duration::hours(5)),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn source_merge_takes_newest_type_and_carried_fields() {
        let current = stored_source();
        let incoming = SourceDescriptor {
            name: current.name.clone(),
            handle: Some("hackernews".to_string()),
            source_type: "aggregator".to_string(),
            url: None,
            weight: Some(2.0),
            metadata: Some(json!({"platform": "ycombinator"}).as_object().cloned().unwrap()),
        };

        let merged = merge_source(&current, &incoming);
        assert_eq!(merged.source_type, "aggregator");
        assert_eq!(merged.handle.as_deref(), Some("hackernews"));
        assert_eq!(merged.url, current.url);
        assert_eq!(merged.weight, 2.0);
        assert_eq!(merged.display_type(), "ycombinator");
    }

    #[test]
    fn source_merge_without_optional_fields_keeps_stored_values() {
        let current = stored_source();
        let incoming = SourceDescriptor {
            name: current.name.clone(),
            source_type: "rss".to_string(),
            ..Default::default()
        };
        assert_eq!(merge_source(&current, &incoming), current);
    }

    #[test]
    fn item_merge_applies_every_field_policy_together() {
        let now = Utc::now();
        let current = stored_item(now);
        let earlier = now - Duration::hours(8);
        let incoming = ItemObservation {
            url: current.url.clone(),
            title: Some("Fresh title".to_string()),
            published_at: Some(earlier),
            source_type: Some("twitter".to_string()),
        };

        let merged = merge_item(&current, &incoming, now);
        assert_eq!(merged.title.as_deref(), Some("Fresh title"));
        assert_eq!(merged.source_type.as_deref(), Some("twitter"));
        assert_eq!(merged.published_at, Some(earlier));
        assert_eq!(merged.last_seen_at, Some(now));
        assert_eq!(merged.score_raw, current.score_raw);

        let later = ItemObservation {
            url: current.url.clone(),
            title: Some("Another title".to_string()),
            published_at: Some(now - Duration::hours(1)),
            source_type: Some("rss".to_string()),
        };
        let again = merge_item(&merged, &later, now + Duration::minutes(5));
        assert_eq!(again.title.as_deref(), Some("Fresh title"));
        assert_eq!(again.source_type.as_deref(), Some("twitter"));
        assert_eq!(again.published_at, Some(earlier));
        assert_eq!(again.last_seen_at, Some(now + Duration::minutes(5)));
    }

    #[test]
    fn item_merge_ignores_equal_publish_time_and_blank_values() {
        let now = Utc::now();
        let current = stored_item(now);
        let incoming = ItemObservation {
            url: current.url.clone(),
            title: Some("   ".to_string()),
            published_at: current.published_at,
            source_type: Some(String::new()),
        };
        let merged = merge_item(&current, &incoming, now);
        assert_eq!(merged.title, None);
        assert_eq!(merged.source_type.as_deref(), Some(UNKNOWN_SOURCE_TYPE));
        assert_eq!(merged.published_at, current.published_at);
    }

    #[test]
    fn item_merge_never_rewinds_last_seen() {
        let now = Utc::now();
        let current = stored_item(now);
        let merged = merge_item(&current, &ItemObservation::default(), now - Duration::hours(3));
        assert_eq!(merged.last_seen_at, current.last_seen_at);
    }
}
