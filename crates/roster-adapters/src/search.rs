//! Web search: Brave's JSON API when a key is configured, DuckDuckGo's HTML
//! endpoint otherwise or as a fallback.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Url;
use roster_storage::{RateLimitPolicy, RateLimiter};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::http::{decode_html_entities, send_json, send_text};
use crate::{AdapterError, SearchHit, WebResearchProvider};

fn search_policy(inter_call_delay: Duration) -> RateLimitPolicy {
    RateLimitPolicy {
        inter_call_delay,
        ..RateLimitPolicy::default()
    }
}

#[derive(Debug, Deserialize)]
struct BraveReply {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    url: String,
}

pub struct BraveSearch {
    client: reqwest::Client,
    endpoint: String,
    limiter: RateLimiter<String>,
}

impl BraveSearch {
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.search.brave.com/res/v1/web/search";

    /// The free tier allows about one request per second.
    pub fn new(client: reqwest::Client, api_key: String, inter_call_delay: Duration) -> Self {
        Self {
            client,
            endpoint: Self::DEFAULT_ENDPOINT.into(),
            limiter: RateLimiter::new("brave", search_policy(inter_call_delay), vec![api_key]),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl WebResearchProvider for BraveSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, AdapterError> {
        let count = max_results.clamp(1, 20).to_string();
        let reply: BraveReply = self
            .limiter
            .call(|key| {
                send_json(
                    self.client
                        .get(&self.endpoint)
                        .query(&[("q", query), ("count", count.as_str())])
                        .header("X-Subscription-Token", key)
                        .header(ACCEPT, "application/json"),
                )
            })
            .await?;
        let hits: Vec<SearchHit> = reply
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .take(max_results)
            .map(|r| SearchHit {
                title: decode_html_entities(&strip_tags(&r.title)),
                description: decode_html_entities(&strip_tags(&r.description)),
                url: r.url,
            })
            .collect();
        debug!(query, hits = hits.len(), "brave search");
        Ok(hits)
    }
}

pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    endpoint: String,
    limiter: RateLimiter<()>,
}

impl DuckDuckGoSearch {
    pub const DEFAULT_ENDPOINT: &'static str = "https://html.duckduckgo.com/html/";

    pub fn new(client: reqwest::Client, inter_call_delay: Duration) -> Self {
        Self {
            client,
            endpoint: Self::DEFAULT_ENDPOINT.into(),
            limiter: RateLimiter::new("duckduckgo", search_policy(inter_call_delay), vec![()]),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl WebResearchProvider for DuckDuckGoSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, AdapterError> {
        let html = self
            .limiter
            .call(|_| send_text(self.client.get(&self.endpoint).query(&[("q", query)])))
            .await?;
        let hits = parse_duckduckgo(&html, max_results)?;
        debug!(query, hits = hits.len(), "duckduckgo search");
        Ok(hits)
    }
}

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::parse("duckduckgo", e.to_string()))
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extracts result links from the HTML results page. Redirect links carry
/// the target in the `uddg` query parameter.
pub fn parse_duckduckgo(html: &str, max_results: usize) -> Result<Vec<SearchHit>, AdapterError> {
    let document = Html::parse_document(html);
    let result_sel = selector(".result")?;
    let link_sel = selector("a.result__a")?;
    let snippet_sel = selector(".result__snippet")?;

    let mut hits = Vec::new();
    for result in document.select(&result_sel) {
        if hits.len() >= max_results {
            break;
        }
        let Some(link) = result.select(&link_sel).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let title = element_text(link);
        if title.is_empty() {
            continue;
        }
        hits.push(SearchHit {
            title,
            description: result.select(&snippet_sel).next().map(element_text).unwrap_or_default(),
            url: decode_redirect(href),
        });
    }
    Ok(hits)
}

fn decode_redirect(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    Url::parse(&absolute)
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(k, _)| k == "uddg")
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or(absolute)
}

fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Tries `primary` first and falls back when it fails or finds nothing.
pub struct SearchChain {
    primary: Option<Box<dyn WebResearchProvider>>,
    fallback: Box<dyn WebResearchProvider>,
}

impl SearchChain {
    pub fn new(
        primary: Option<Box<dyn WebResearchProvider>>,
        fallback: Box<dyn WebResearchProvider>,
    ) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl WebResearchProvider for SearchChain {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, AdapterError> {
        if let Some(primary) = &self.primary {
            match primary.search(query, max_results).await {
                Ok(hits) if !hits.is_empty() => return Ok(hits),
                Ok(_) => debug!(query, "primary search found nothing; trying fallback"),
                Err(err) => warn!(query, error = %err, "primary search failed; trying fallback"),
            }
        }
        self.fallback.search(query, max_results).await
    }
}
