use crate::resolver::Resolved;
use crate::store::rescore_item;
use crate::types::{Item, Mention, MentionObservation, Result, Source};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnection;
use tracing::debug;

/// How an observation is matched against existing mentions of one
/// (item, source) pair, most specific first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MentionKey {
    External(String),
    PostUrl(String),
    Pair,
}

/// Blank identifiers count as absent.
fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|v| !v.trim().is_empty()).map(str::to_string)
}

impl MentionKey {
    /// An external id always wins over a post URL, even when both are present.
    pub fn for_observation(observation: &MentionObservation) -> Self {
        if let Some(external_id) = non_empty(&observation.external_id) {
            MentionKey::External(external_id)
        } else if let Some(post_url) = non_empty(&observation.post_url) {
            MentionKey::PostUrl(post_url)
        } else {
            MentionKey::Pair
        }
    }

    /// Value of the `merge_key` column, unique per (item, source).
    pub fn merge_key(&self) -> String {
        match self {
            MentionKey::External(external_id) => format!("ext:{}", external_id),
            MentionKey::PostUrl(post_url) => format!("url:{}", post_url),
            MentionKey::Pair => "pair".to_string(),
        }
    }
}

/// Partial update: only fields present in the observation change, and
/// `fetched_at` always advances.
pub fn merge_mention(current: &Mention, observation: &MentionObservation, now: DateTime<Utc>) -> Mention {
    let mut merged = current.clone();

    if observation.post_url.is_some() {
        merged.post_url = observation.post_url.clone();
    }
    if observation.embed_html.is_some() {
        merged.embed_html = observation.embed_html.clone();
    }
    if let Some(external_id) = non_empty(&observation.external_id) {
        merged.external_id = Some(external_id);
    }
    if observation.note.is_some() {
        merged.note = observation.note.clone();
    }
    if observation.like_count.is_some() {
        merged.like_count = observation.like_count;
    }
    if observation.repost_count.is_some() {
        merged.repost_count = observation.repost_count;
    }
    if observation.reply_count.is_some() {
        merged.reply_count = observation.reply_count;
    }
    merged.fetched_at = Some(current.fetched_at.map_or(now, |fetched| fetched.max(now)));

    merged
}

pub async fn find_mention(
    conn: &mut SqliteConnection,
    item_id: i64,
    source_id: i64,
    key: &MentionKey,
) -> Result<Option<Mention>> {
    let query = match key {
        MentionKey::External(external_id) => sqlx::query_as::<_, Mention>(
            "SELECT * FROM mentions WHERE item_id = ? AND source_id = ? AND external_id = ? ORDER BY id LIMIT 1",
        )
        .bind(item_id)
        .bind(source_id)
        .bind(external_id.clone()),
        MentionKey::PostUrl(post_url) => sqlx::query_as::<_, Mention>(
            "SELECT * FROM mentions WHERE item_id = ? AND source_id = ? AND post_url = ? ORDER BY id LIMIT 1",
        )
        .bind(item_id)
        .bind(source_id)
        .bind(post_url.clone()),
        MentionKey::Pair => sqlx::query_as::<_, Mention>(
            "SELECT * FROM mentions WHERE item_id = ? AND source_id = ? ORDER BY id LIMIT 1",
        )
        .bind(item_id)
        .bind(source_id),
    };

    Ok(query.fetch_optional(&mut *conn).await?)
}

async fn insert_mention(
    conn: &mut SqliteConnection,
    item_id: i64,
    source_id: i64,
    key: &MentionKey,
    observation: &MentionObservation,
    now: DateTime<Utc>,
) -> Result<Option<Mention>> {
    let inserted = sqlx::query_as::<_, Mention>(
        r#"
        INSERT INTO mentions (
            item_id, source_id, external_id, post_url, merge_key, embed_html, note,
            like_count, repost_count, reply_count, fetched_at, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (item_id, source_id, merge_key) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(item_id)
    .bind(source_id)
    .bind(non_empty(&observation.external_id))
    .bind(&observation.post_url)
    .bind(key.merge_key())
    .bind(&observation.embed_html)
    .bind(&observation.note)
    .bind(observation.like_count)
    .bind(observation.repost_count)
    .bind(observation.reply_count)
    .bind(now)
    .bind(now)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(inserted)
}

async fn update_mention(
    conn: &mut SqliteConnection,
    current: &Mention,
    observation: &MentionObservation,
    now: DateTime<Utc>,
) -> Result<Mention> {
    let mut merged = merge_mention(current, observation, now);
    merged.updated_at = now;

    sqlx::query(
        r#"
        UPDATE mentions
        SET external_id = ?, post_url = ?, embed_html = ?, note = ?,
            like_count = ?, repost_count = ?, reply_count = ?, fetched_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&merged.external_id)
    .bind(&merged.post_url)
    .bind(&merged.embed_html)
    .bind(&merged.note)
    .bind(merged.like_count)
    .bind(merged.repost_count)
    .bind(merged.reply_count)
    .bind(merged.fetched_at)
    .bind(merged.updated_at)
    .bind(merged.id)
    .execute(&mut *conn)
    .await?;

    Ok(merged)
}

/// Create or refresh the mention linking `item` to `source`, then rescore
/// `item` on the same connection so the scores see the write.
pub async fn reconcile_mention(
    conn: &mut SqliteConnection,
    item: &mut Item,
    source: &Source,
    observation: &MentionObservation,
    now: DateTime<Utc>,
) -> Result<Resolved<Mention>> {
    let key = MentionKey::for_observation(observation);

    let resolved = match find_mention(conn, item.id, source.id, &key).await? {
        Some(current) => Resolved {
            record: update_mention(conn, &current, observation, now).await?,
            created: false,
        },
        None => match insert_mention(conn, item.id, source.id, &key, observation, now).await? {
            Some(mention) => Resolved { record: mention, created: true },
            None => {
                // Another writer created this key between lookup and insert
                let current = sqlx::query_as::<_, Mention>(
                    "SELECT * FROM mentions WHERE item_id = ? AND source_id = ? AND merge_key = ?",
                )
                .bind(item.id)
                .bind(source.id)
                .bind(key.merge_key())
                .fetch_one(&mut *conn)
                .await?;
                Resolved {
                    record: update_mention(conn, &current, observation, now).await?,
                    created: false,
                }
            }
        },
    };

    debug!(
        mention_id = resolved.record.id,
        item_id = item.id,
        source_id = source.id,
        key = %key.merge_key(),
        created = resolved.created,
        "Reconciled mention"
    );

    rescore_item(conn, item, now).await?;
    Ok(resolved)
}
