//! Read and write HTTP endpoints over the aggregator.

use crate::aggregator::Aggregator;
use crate::store::{ItemQuery, ItemView};
use crate::types::{
    AggregatorError, ItemObservation, Mention, MentionObservation, Observation, Source, SourceDescriptor,
};
use axum::{
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/items", get(list_items))
        .route("/items/{item_id}", get(get_item))
        .route("/mentions", post(create_mention))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub struct ApiError(AggregatorError);

impl From<AggregatorError> for ApiError {
    fn from(e: AggregatorError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self.0 {
            AggregatorError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            e @ AggregatorError::ItemNotFound { .. } => (StatusCode::NOT_FOUND, e.to_string()),
            e => {
                error!("Internal error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": msg }))).into_response()
    }
}

/// Submitted mention of an item by a source.
#[derive(Debug, Clone, Deserialize)]
pub struct MentionCreate {
    pub item_url: String,
    pub source_name: String,
    pub source_type: String,
    pub source_handle: Option<String>,
    pub source_url: Option<String>,
    pub post_url: Option<String>,
    pub external_id: Option<String>,
    pub embed_html: Option<String>,
    pub like_count: Option<i64>,
    pub repost_count: Option<i64>,
    pub reply_count: Option<i64>,
    pub note: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl From<MentionCreate> for Observation {
    fn from(payload: MentionCreate) -> Self {
        Observation {
            item: ItemObservation {
                url: payload.item_url,
                title: None,
                published_at: payload.published_at,
                source_type: Some(payload.source_type.clone()),
            },
            source: SourceDescriptor {
                name: payload.source_name,
                handle: payload.source_handle,
                source_type: payload.source_type,
                url: payload.source_url,
                weight: None,
                metadata: None,
            },
            mention: MentionObservation {
                external_id: payload.external_id,
                post_url: payload.post_url,
                embed_html: payload.embed_html,
                note: payload.note,
                like_count: payload.like_count,
                repost_count: payload.repost_count,
                reply_count: payload.reply_count,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentionResponse {
    pub id: i64,
    pub item_id: i64,
    pub source_id: i64,
    pub post_url: Option<String>,
    pub external_id: Option<String>,
    pub like_count: Option<i64>,
    pub repost_count: Option<i64>,
    pub reply_count: Option<i64>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl From<Mention> for MentionResponse {
    fn from(mention: Mention) -> Self {
        Self {
            id: mention.id,
            item_id: mention.item_id,
            source_id: mention.source_id,
            post_url: mention.post_url,
            external_id: mention.external_id,
            like_count: mention.like_count,
            repost_count: mention.repost_count,
            reply_count: mention.reply_count,
            fetched_at: mention.fetched_at,
        }
    }
}

/// A mention as shown inside an item, with its source flattened in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentionSummary {
    pub id: i64,
    pub source_name: Option<String>,
    pub source_handle: Option<String>,
    pub source_type: Option<String>,
    pub post_url: Option<String>,
    pub embed_html: Option<String>,
    pub like_count: Option<i64>,
    pub repost_count: Option<i64>,
    pub reply_count: Option<i64>,
    pub note: Option<String>,
}

impl MentionSummary {
    fn new(mention: Mention, source: Option<Source>) -> Self {
        Self {
            id: mention.id,
            source_name: source.as_ref().map(|s| s.name.clone()),
            source_handle: source.as_ref().and_then(|s| s.handle.clone()),
            source_type: source.as_ref().map(Source::display_type),
            post_url: mention.post_url,
            embed_html: mention.embed_html,
            like_count: mention.like_count,
            repost_count: mention.repost_count,
            reply_count: mention.reply_count,
            note: mention.note,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResponse {
    pub id: i64,
    pub url: String,
    pub normalized_url: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub summary_points: Vec<String>,
    pub tags: Vec<String>,
    pub language: Option<String>,
    pub source_type: Option<String>,
    pub score_raw: f64,
    pub score_new: f64,
    pub score_buzz: f64,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub mentions: Vec<MentionSummary>,
}

impl From<ItemView> for ItemResponse {
    fn from(view: ItemView) -> Self {
        let item = view.item;
        Self {
            id: item.id,
            summary_points: item.summary_points(),
            tags: item.tags(),
            url: item.url,
            normalized_url: item.normalized_url,
            title: item.title,
            summary: item.summary,
            language: item.language,
            source_type: item.source_type,
            score_raw: item.score_raw,
            score_new: item.score_new,
            score_buzz: item.score_buzz,
            last_seen_at: item.last_seen_at,
            published_at: item.published_at,
            created_at: item.created_at,
            mentions: view
                .mentions
                .into_iter()
                .map(|(mention, source)| MentionSummary::new(mention, source))
                .collect(),
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_items(
    State(state): State<AppState>,
    Query(query): Query<ItemQuery>,
) -> Result<Json<Vec<ItemResponse>>, ApiError> {
    let views = state.aggregator.store().list_items(&query).await?;
    Ok(Json(views.into_iter().map(ItemResponse::from).collect()))
}

async fn get_item(State(state): State<AppState>, Path(item_id): Path<i64>) -> Result<Json<ItemResponse>, ApiError> {
    let view = state.aggregator.store().get_item_view(item_id).await?;
    Ok(Json(view.into()))
}

async fn create_mention(
    State(state): State<AppState>,
    Json(payload): Json<MentionCreate>,
) -> Result<Json<MentionResponse>, ApiError> {
    let outcome = state.aggregator.record_mention(payload.into()).await?;
    info!(
        item_id = outcome.item.id,
        mention_id = outcome.mention.id,
        item_created = outcome.item_created,
        mention_created = outcome.mention_created,
        "Recorded mention"
    );
    Ok(Json(outcome.mention.into()))
}
