mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::*;
use matome_aggregator::api::{self, AppState, ItemResponse, MentionResponse};
use matome_aggregator::types::Result;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn app() -> Result<(Router, Harness)> {
    let h = harness().await?;
    let router = api::router(AppState {
        aggregator: h.aggregator.clone(),
    });
    Ok((router, h))
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

fn post_mention(payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/mentions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health() -> Result<()> {
    let (router, _) = app().await?;
    let (status, body) = send(&router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body)?;
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn test_post_mention_then_read_item() -> Result<()> {
    let (router, _h) = app().await?;

    let (status, body) = send(
        &router,
        post_mention(json!({
            "item_url": "https://example.com/story?utm_medium=social",
            "source_name": "alice",
            "source_type": "twitter",
            "source_handle": "alice",
            "post_url": "https://x.com/alice/status/1",
            "external_id": "1",
            "like_count": 7,
            "note": "worth a read"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let mention: MentionResponse = serde_json::from_slice(&body)?;
    assert_eq!(mention.external_id.as_deref(), Some("1"));
    assert_eq!(mention.like_count, Some(7));

    let (status, body) = send(&router, get(&format!("/items/{}", mention.item_id))).await;
    assert_eq!(status, StatusCode::OK);
    let item: ItemResponse = serde_json::from_slice(&body)?;
    assert_eq!(item.normalized_url, "https://example.com/story");
    assert_eq!(item.source_type.as_deref(), Some("twitter"));
    assert_eq!(item.score_raw, 7.0);
    assert_eq!(item.tags, vec!["rust", "news"]);
    assert_eq!(item.mentions.len(), 1);
    assert_eq!(item.mentions[0].source_name.as_deref(), Some("alice"));
    assert_eq!(item.mentions[0].source_handle.as_deref(), Some("alice"));
    assert_eq!(item.mentions[0].note.as_deref(), Some("worth a read"));
    Ok(())
}

#[tokio::test]
async fn test_list_items_over_http() -> Result<()> {
    let (router, _h) = app().await?;
    for (url, likes) in [("https://example.com/a", 1), ("https://example.com/b", 50)] {
        let (status, _) = send(
            &router,
            post_mention(json!({
                "item_url": url,
                "source_name": "alice",
                "source_type": "twitter",
                "like_count": likes
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&router, get("/items?sort=buzz&limit=10")).await;
    assert_eq!(status, StatusCode::OK);
    let items: Vec<ItemResponse> = serde_json::from_slice(&body)?;
    let urls: Vec<&str> = items.iter().map(|item| item.normalized_url.as_str()).collect();
    assert_eq!(urls, vec!["https://example.com/b", "https://example.com/a"]);

    let (status, body) = send(&router, get("/items?limit=1&offset=1&sort=buzz")).await;
    assert_eq!(status, StatusCode::OK);
    let items: Vec<ItemResponse> = serde_json::from_slice(&body)?;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].normalized_url, "https://example.com/a");
    Ok(())
}

#[tokio::test]
async fn test_out_of_range_limits_are_rejected() -> Result<()> {
    let (router, _) = app().await?;
    for uri in ["/items?limit=0", "/items?limit=101", "/items?offset=-1"] {
        let (status, body) = send(&router, get(uri)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{uri}");
        let body: Value = serde_json::from_slice(&body)?;
        assert!(body["error"].is_string());
    }

    let (status, _) = send(&router, get("/items?sort=oldest")).await;
    assert!(status.is_client_error());
    Ok(())
}

#[tokio::test]
async fn test_unknown_item_is_404() -> Result<()> {
    let (router, _) = app().await?;
    let (status, _) = send(&router, get("/items/9999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_invalid_mentions_are_rejected_without_writes() -> Result<()> {
    let (router, h) = app().await?;

    let (status, _) = send(
        &router,
        post_mention(json!({
            "item_url": "not a url",
            "source_name": "alice",
            "source_type": "twitter"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(
        &router,
        post_mention(json!({
            "item_url": "https://example.com/a",
            "source_name": "alice",
            "source_type": "twitter",
            "reply_count": -1
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(&router, post_mention(json!({ "item_url": "https://example.com/a" }))).await;
    assert!(status.is_client_error());

    let stats = h.store.get_stats().await?;
    assert_eq!(stats["items"], 0);
    assert_eq!(stats["sources"], 0);
    Ok(())
}
