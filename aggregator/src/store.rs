use crate::scoring;
use crate::types::{serialize_list, AggregatorError, Enrichment, Item, Mention, Result, Source};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};

pub const MAX_PAGE_LIMIT: i64 = 100;
pub const DEFAULT_PAGE_LIMIT: i64 = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    New,
    Buzz,
}

/// Read-side filter over items. Every filter is optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ItemQuery {
    pub sort: SortOrder,
    pub tag: Option<String>,
    pub q: Option<String>,
    pub source_type: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ItemQuery {
    fn default() -> Self {
        Self {
            sort: SortOrder::New,
            tag: None,
            q: None,
            source_type: None,
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl ItemQuery {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_PAGE_LIMIT).contains(&self.limit) {
            return Err(AggregatorError::Validation(format!(
                "limit must be between 1 and {}, got {}",
                MAX_PAGE_LIMIT, self.limit
            )));
        }
        if self.offset < 0 {
            return Err(AggregatorError::Validation(format!(
                "offset must be non-negative, got {}",
                self.offset
            )));
        }
        Ok(())
    }
}

/// An item together with its mentions and their sources.
#[derive(Debug, Clone)]
pub struct ItemView {
    pub item: Item,
    pub mentions: Vec<(Mention, Option<Source>)>,
}

pub struct Store {
    db: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { db })
    }

    /// Private in-memory database, migrated and ready. A single long-lived
    /// connection keeps the database alive for the life of the pool.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { db };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.db).await?;
        debug!("Database migrations applied");
        Ok(())
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.db.begin().await?)
    }

    pub async fn get_item(&self, item_id: i64) -> Result<Item> {
        sqlx::query_as::<_, Item>("SELECT * FROM items WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(AggregatorError::ItemNotFound { id: item_id })
    }

    pub async fn get_item_view(&self, item_id: i64) -> Result<ItemView> {
        let item = self.get_item(item_id).await?;
        let mut views = self.attach_mentions(vec![item]).await?;
        views
            .pop()
            .ok_or(AggregatorError::ItemNotFound { id: item_id })
    }

    pub async fn find_item_by_normalized_url(&self, normalized_url: &str) -> Result<Option<Item>> {
        let item = sqlx::query_as::<_, Item>("SELECT * FROM items WHERE normalized_url = ?")
            .bind(normalized_url)
            .fetch_optional(&self.db)
            .await?;
        Ok(item)
    }

    pub async fn find_source_by_name(&self, name: &str) -> Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.db)
            .await?;
        Ok(source)
    }

    pub async fn mentions_for_item(&self, item_id: i64) -> Result<Vec<Mention>> {
        let mentions = sqlx::query_as::<_, Mention>("SELECT * FROM mentions WHERE item_id = ? ORDER BY id")
            .bind(item_id)
            .fetch_all(&self.db)
            .await?;
        Ok(mentions)
    }

    /// Items ordered by the requested score, highest first.
    pub async fn list_items(&self, query: &ItemQuery) -> Result<Vec<ItemView>> {
        query.validate()?;

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM items WHERE 1 = 1");

        if let Some(tag) = query.tag.as_deref().filter(|tag| !tag.is_empty()) {
            // tags are stored as a JSON array, so match the quoted element
            let quoted = serde_json::to_string(tag)?;
            builder
                .push(" AND tags_json IS NOT NULL AND tags_json LIKE ")
                .push_bind(format!("%{}%", escape_like(&quoted)))
                .push(" ESCAPE '\\'");
        }

        if let Some(text) = query.q.as_deref().filter(|text| !text.is_empty()) {
            let pattern = format!("%{}%", escape_like(text));
            builder
                .push(" AND ((title IS NOT NULL AND title LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\') OR (summary IS NOT NULL AND summary LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\'))");
        }

        if let Some(source_type) = query.source_type.as_deref().filter(|value| !value.is_empty()) {
            builder.push(" AND source_type = ").push_bind(source_type.to_string());
        }

        builder.push(match query.sort {
            SortOrder::New => " ORDER BY score_new DESC, id DESC",
            SortOrder::Buzz => " ORDER BY score_buzz DESC, id DESC",
        });
        builder
            .push(" LIMIT ")
            .push_bind(query.limit)
            .push(" OFFSET ")
            .push_bind(query.offset);

        let items = builder.build_query_as::<Item>().fetch_all(&self.db).await?;
        self.attach_mentions(items).await
    }

    async fn attach_mentions(&self, items: Vec<Item>) -> Result<Vec<ItemView>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM mentions WHERE item_id IN (");
        let mut ids = builder.separated(", ");
        for item in &items {
            ids.push_bind(item.id);
        }
        builder.push(") ORDER BY id");
        let mentions = builder.build_query_as::<Mention>().fetch_all(&self.db).await?;

        let sources = self.sources_by_id(mentions.iter().map(|m| m.source_id)).await?;

        let mut by_item: HashMap<i64, Vec<(Mention, Option<Source>)>> = HashMap::new();
        for mention in mentions {
            let source = sources.get(&mention.source_id).cloned();
            by_item.entry(mention.item_id).or_default().push((mention, source));
        }

        Ok(items
            .into_iter()
            .map(|item| {
                let mentions = by_item.remove(&item.id).unwrap_or_default();
                ItemView { item, mentions }
            })
            .collect())
    }

    async fn sources_by_id(&self, ids: impl Iterator<Item = i64>) -> Result<HashMap<i64, Source>> {
        let mut ids: Vec<i64> = ids.collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM sources WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in &ids {
            separated.push_bind(*id);
        }
        builder.push(")");
        let sources = builder.build_query_as::<Source>().fetch_all(&self.db).await?;
        Ok(sources.into_iter().map(|source| (source.id, source)).collect())
    }

    /// Delete an item and, through the foreign key cascade, its mentions.
    pub async fn delete_item(&self, item_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(item_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Write enrichment fields unless some enrichment was already stored.
    pub async fn apply_enrichment(&self, item_id: i64, enrichment: &Enrichment) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE items
            SET summary = ?, summary_points_json = ?, tags_json = ?, language = ?, updated_at = ?
            WHERE id = ?
              AND summary IS NULL AND summary_points_json IS NULL
              AND tags_json IS NULL AND language IS NULL
            "#,
        )
        .bind(&enrichment.text)
        .bind(serialize_list(&enrichment.bullet_points)?)
        .bind(serialize_list(&enrichment.tags)?)
        .bind(&enrichment.language)
        .bind(Utc::now())
        .bind(item_id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Recompute every item's scores as of `now`, one short transaction per item.
    /// Returns how many items changed.
    pub async fn rescore_all(&self, now: DateTime<Utc>) -> Result<usize> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM items ORDER BY id")
            .fetch_all(&self.db)
            .await?;

        let mut changed = 0;
        for id in ids {
            let mut tx = self.begin().await?;
            let Some(mut item) = sqlx::query_as::<_, Item>("SELECT * FROM items WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
            else {
                continue;
            };
            let before = (item.score_raw, item.score_new, item.score_buzz);
            rescore_item(&mut *tx, &mut item, now).await?;
            if before != (item.score_raw, item.score_new, item.score_buzz) {
                changed += 1;
            }
            tx.commit().await?;
        }

        info!("Rescored items: {} changed", changed);
        Ok(changed)
    }

    pub async fn get_stats(&self) -> Result<HashMap<String, i64>> {
        let mut stats = HashMap::new();

        for (key, sql) in [
            ("sources", "SELECT COUNT(*) FROM sources"),
            ("items", "SELECT COUNT(*) FROM items"),
            ("mentions", "SELECT COUNT(*) FROM mentions"),
            ("items_without_summary", "SELECT COUNT(*) FROM items WHERE summary IS NULL"),
        ] {
            let count: i64 = sqlx::query_scalar(sql).fetch_one(&self.db).await?;
            stats.insert(key.to_string(), count);
        }

        Ok(stats)
    }
}

/// Escape LIKE wildcards so user input matches literally under `ESCAPE '\'`.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Current mentions of an item, each with its source when one resolves.
pub async fn load_scored_mentions(conn: &mut SqliteConnection, item_id: i64) -> Result<Vec<(Mention, Option<Source>)>> {
    let mentions = sqlx::query_as::<_, Mention>("SELECT * FROM mentions WHERE item_id = ? ORDER BY id")
        .bind(item_id)
        .fetch_all(&mut *conn)
        .await?;

    let sources: HashMap<i64, Source> = sqlx::query_as::<_, Source>(
        "SELECT * FROM sources WHERE id IN (SELECT source_id FROM mentions WHERE item_id = ?)",
    )
    .bind(item_id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|source| (source.id, source))
    .collect();

    Ok(mentions
        .into_iter()
        .map(|mention| {
            let source = sources.get(&mention.source_id).cloned();
            (mention, source)
        })
        .collect())
}

/// Recompute and persist an item's scores from the mention set visible on
/// `conn`. Callers run this on the same transaction that wrote the mention.
pub async fn rescore_item(conn: &mut SqliteConnection, item: &mut Item, now: DateTime<Utc>) -> Result<()> {
    let mentions = load_scored_mentions(conn, item.id).await?;
    scoring::compute_item_scores(item, &mentions, now);

    sqlx::query("UPDATE items SET score_raw = ?, score_new = ?, score_buzz = ? WHERE id = ?")
        .bind(item.score_raw)
        .bind(item.score_new)
        .bind(item.score_buzz)
        .bind(item.id)
        .execute(&mut *conn)
        .await?;

    debug!(
        item_id = item.id,
        mentions = mentions.len(),
        score_raw = item.score_raw,
        score_new = item.score_new,
        score_buzz = item.score_buzz,
        "Rescored item"
    );
    Ok(())
}
