//! Best-effort article summarization used to enrich newly created items.

use crate::types::{AggregatorError, Enricher, Enrichment, FetchConfig, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

pub const SUMMARY_TIMEOUT_SECONDS: u64 = 10;
pub const MAX_SENTENCES: usize = 5;
pub const SUMMARY_LIMIT: usize = 300;
pub const BULLET_POINTS: usize = 3;
pub const BULLET_LIMIT: usize = 120;
pub const MAX_TAGS: usize = 3;

const SENTENCE_TERMINATORS: &[char] = &['。', '．', '.', '!', '?', '？'];

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "that", "with", "have", "this", "from", "your", "about", "https", "http", "www", "com",
];

const LANGUAGE_HINTS: &[(&str, &str)] = &[("の", "ja"), ("する", "ja"), ("the", "en"), ("with", "en")];
const DEFAULT_LANGUAGE: &str = "ja";

fn tag_split() -> &'static Regex {
    static TAG_SPLIT: OnceLock<Regex> = OnceLock::new();
    TAG_SPLIT.get_or_init(|| Regex::new(r"[^A-Za-z0-9ぁ-んァ-ヴ一-龠+#-]+").expect("valid tag split regex"))
}

/// Fetches an article page and condenses it into summary fields.
pub struct ArticleSummarizer {
    client: Client,
}

impl ArticleSummarizer {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(SUMMARY_TIMEOUT_SECONDS))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;
        Ok(Self { client })
    }

    pub async fn fetch_article_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let html = response.text().await?;
        Ok(extract_article_text(&html))
    }
}

#[async_trait]
impl Enricher for ArticleSummarizer {
    async fn enrich(&self, url: &str) -> anyhow::Result<Enrichment> {
        let text = self.fetch_article_text(url).await?;
        debug!("Extracted {} chars of article text from {}", text.len(), url);
        Ok(summarize_text(&text)?)
    }
}

/// Paragraph text of an HTML page, or all visible body text when the page has
/// no paragraphs.
pub fn extract_article_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let paragraphs = Selector::parse("p")
        .map(|selector| {
            document
                .select(&selector)
                .map(|p| collapse_whitespace(&p.text().collect::<Vec<_>>().join(" ")))
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();

    if !paragraphs.is_empty() {
        return paragraphs;
    }

    Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
        .map(|body| collapse_whitespace(&body.text().collect::<Vec<_>>().join(" ")))
        .unwrap_or_else(|| collapse_whitespace(&document.root_element().text().collect::<Vec<_>>().join(" ")))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut `text` to at most `limit` characters, preferring a word boundary, and
/// mark the cut with an ellipsis.
pub fn truncate_text(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let truncated: String = text.chars().take(limit.saturating_sub(1)).collect();
    let truncated = match truncated.rfind(' ') {
        Some(space) => truncated[..space].to_string(),
        None => truncated,
    };
    format!("{}…", truncated)
}

/// Split after each sentence terminator, keeping the terminator.
pub fn extract_sentences(text: &str, max_sentences: usize) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);
        if SENTENCE_TERMINATORS.contains(&c) {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }

    sentences.truncate(max_sentences);
    sentences
}

/// Lowercase, collapse every run of non-alphanumerics to one dash.
pub fn slugify(word: &str) -> String {
    let mut slug = String::new();
    for c in word.to_lowercase().chars() {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

/// Most frequent tokens, ties broken by first appearance.
pub fn extract_tags(text: &str, max_tags: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, token) in tag_split()
        .split(text)
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .filter(|token| !STOPWORDS.contains(&token.as_str()) && token.chars().count() > 2)
        .enumerate()
    {
        counts.entry(token).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(token, (count, first))| (token, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    let mut tags: Vec<String> = Vec::new();
    for (token, _, _) in ranked.into_iter().take(max_tags * 2) {
        let slug = slugify(&token);
        if !slug.is_empty() && !tags.contains(&slug) {
            tags.push(slug);
        }
        if tags.len() >= max_tags {
            break;
        }
    }
    tags
}

pub fn detect_language(text: &str) -> String {
    let lowered = text.to_lowercase();
    LANGUAGE_HINTS
        .iter()
        .find(|(hint, _)| lowered.contains(hint))
        .map(|(_, language)| language.to_string())
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
}

/// Condense extracted article text. Fails when no sentence can be found.
pub fn summarize_text(text: &str) -> Result<Enrichment> {
    let sentences = extract_sentences(text, MAX_SENTENCES);
    if sentences.is_empty() {
        return Err(AggregatorError::Enrichment("No sentences extracted".to_string()));
    }

    Ok(Enrichment {
        text: truncate_text(&sentences.join(" "), SUMMARY_LIMIT),
        bullet_points: sentences
            .iter()
            .take(BULLET_POINTS)
            .map(|sentence| truncate_text(sentence, BULLET_LIMIT))
            .collect(),
        tags: extract_tags(text, MAX_TAGS),
        language: detect_language(text),
    })
}
