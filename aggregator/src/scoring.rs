//! Engagement and freshness scoring.
//!
//! Everything here is pure: callers pass the current mention set and the
//! evaluation time, and only the three score fields of the item change.

use crate::types::{Item, Mention, Source};
use crate::utils::time::minutes_between;
use chrono::{DateTime, Utc};

pub const FRESHNESS_HALF_LIFE_MINUTES: f64 = 120.0;
pub const FRESHNESS_FLOOR: f64 = 0.05;

/// Exponential freshness factor in `[0.05, 1.0]`.
///
/// An item that was never timestamped counts as maximally fresh.
pub fn freshness_decay(last_seen_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(last_seen_at) = last_seen_at else {
        return 1.0;
    };
    let age_minutes = minutes_between(last_seen_at, now);
    if age_minutes <= 0.0 {
        return 1.0;
    }
    0.5_f64
        .powf(age_minutes / FRESHNESS_HALF_LIFE_MINUTES)
        .max(FRESHNESS_FLOOR)
}

pub fn engagement(mention: &Mention) -> f64 {
    mention.like_count.unwrap_or(0) as f64
        + 2.0 * mention.repost_count.unwrap_or(0) as f64
        + 0.5 * mention.reply_count.unwrap_or(0) as f64
}

/// Every mention counts for at least one unit of its source's weight.
pub fn compute_mention_score(mention: &Mention, source: &Source) -> f64 {
    engagement(mention).max(1.0) * source.weight
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemScores {
    pub raw: f64,
    pub new: f64,
    pub buzz: f64,
}

pub fn score(mentions: &[(Mention, Option<Source>)], last_seen_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> ItemScores {
    let raw: f64 = mentions
        .iter()
        .filter_map(|(mention, source)| source.as_ref().map(|source| compute_mention_score(mention, source)))
        .sum();
    let freshness = freshness_decay(last_seen_at, now);
    ItemScores {
        raw,
        new: raw + freshness,
        buzz: raw * freshness,
    }
}

/// Recompute `score_raw`, `score_new` and `score_buzz` on `item` in place.
/// Mentions without a resolved source contribute nothing.
pub fn compute_item_scores(item: &mut Item, mentions: &[(Mention, Option<Source>)], now: DateTime<Utc>) {
    let scores = score(mentions, item.last_seen_at, now);
    item.score_raw = scores.raw;
    item.score_new = scores.new;
    item.score_buzz = scores.buzz;
}
