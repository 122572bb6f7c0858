//! Messages API client used for research synthesis and bilingual content.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use roster_core::{
    ArtistCandidate, BilingualContent, ResearchResult, SocialLinks, SocialPlatform,
};
use roster_storage::{RateLimitPolicy, RateLimiter};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::http::send_json;
use crate::{AdapterError, ContentGenerator, SearchHit, SynthesisProvider};

const PROVIDER: &str = "anthropic";

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    /// Free-form description of the site, prepended to prompts.
    pub site_context: String,
    pub rate_limit: RateLimitPolicy,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: "https://api.anthropic.com".into(),
            model: "claude-sonnet-4-20250514".into(),
            site_context: "Independent electronic music label artist roster".into(),
            rate_limit: RateLimitPolicy {
                inter_call_delay: Duration::from_millis(500),
                ..RateLimitPolicy::default()
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SynthesisPayload {
    nationality: Option<String>,
    origin: Option<String>,
    labels: Vec<String>,
    style: Option<String>,
    collaborations: Vec<String>,
    achievements: Vec<String>,
    festivals: Vec<String>,
    bio: Option<String>,
    social_links: std::collections::BTreeMap<String, String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("unknown"))
}

fn clean_list(values: Vec<String>) -> impl Iterator<Item = String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl SynthesisPayload {
    fn into_result(self, identity: &str) -> ResearchResult {
        let mut result = ResearchResult::new(identity);
        result.nationality = non_empty(self.nationality);
        result.origin = non_empty(self.origin);
        result.labels = clean_list(self.labels).collect();
        result.style = non_empty(self.style);
        result.collaborations = clean_list(self.collaborations).collect();
        result.achievements = clean_list(self.achievements).collect();
        result.festivals = clean_list(self.festivals).collect();
        result.bio = non_empty(self.bio);
        let mut links = SocialLinks::default();
        for platform in SocialPlatform::ALL {
            if let Some(url) = self.social_links.get(platform.as_str()) {
                links.set(platform, url.trim());
            }
        }
        result.social_links = links;
        result.updated_at = Utc::now();
        result
    }
}

/// The text between the first `{` and the last `}`. Replies often wrap the
/// JSON in prose or code fences.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn parse_reply<T: DeserializeOwned>(text: &str) -> Result<T, AdapterError> {
    let raw = extract_json_object(text)
        .ok_or_else(|| AdapterError::parse(PROVIDER, "no JSON object in reply"))?;
    serde_json::from_str(raw).map_err(|e| AdapterError::parse(PROVIDER, e.to_string()))
}

fn format_hits(hits: &[SearchHit]) -> String {
    let mut out = String::new();
    for (i, hit) in hits.iter().enumerate() {
        let _ = writeln!(out, "{}. {}\n   {}\n   Source: {}\n", i + 1, hit.title, hit.description, hit.url);
    }
    if out.is_empty() {
        out.push_str("No web results found.");
    }
    out
}

fn genre_line(candidate: &ArtistCandidate) -> String {
    if candidate.genres.is_empty() {
        "Unknown".into()
    } else {
        candidate.genres.join(", ")
    }
}

pub struct AnthropicClient {
    client: reqwest::Client,
    config: AnthropicConfig,
    limiter: RateLimiter<String>,
}

impl AnthropicClient {
    pub fn new(client: reqwest::Client, config: AnthropicConfig) -> Result<Self, AdapterError> {
        if config.api_key.trim().is_empty() {
            return Err(AdapterError::NotConfigured {
                provider: PROVIDER,
                detail: "ANTHROPIC_API_KEY is not set".into(),
            });
        }
        let limiter = RateLimiter::new(PROVIDER, config.rate_limit, vec![config.api_key.clone()]);
        Ok(Self {
            client,
            config,
            limiter,
        })
    }

    /// Sends one user message and returns the first text block.
    pub async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, AdapterError> {
        let url = format!("{}/v1/messages", self.config.api_base);
        let body = json!({
            "model": self.config.model,
            "max_tokens": max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let reply: MessagesReply = self
            .limiter
            .call(|key| {
                send_json(
                    self.client
                        .post(&url)
                        .header("x-api-key", key)
                        .header("anthropic-version", "2023-06-01")
                        .json(&body),
                )
            })
            .await?;
        let text = reply
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| AdapterError::parse(PROVIDER, "reply has no text block"))?;
        debug!(chars = text.len(), "completion received");
        Ok(text)
    }

    fn synthesis_prompt(&self, candidate: &ArtistCandidate, hits: &[SearchHit]) -> String {
        format!(
            r#"{context}

---

Based on these web search results about {name}, extract and structure key information:

{results}

Catalog info:
- Genres: {genres}
- Popularity: {popularity}/100

Extract the following information as JSON:
{{
  "nationality": "...",
  "origin": "city, country",
  "labels": ["label1", "label2"],
  "style": "brief description of musical style",
  "collaborations": ["artist1", "artist2"],
  "achievements": ["achievement1", "achievement2"],
  "festivals": ["festival1", "festival2"],
  "bio": "2-3 sentence biography",
  "social_links": {{
    "soundcloud": "full URL to SoundCloud profile or empty string",
    "instagram": "full URL to Instagram profile or empty string",
    "facebook": "full URL to Facebook page or empty string",
    "twitter": "full URL to Twitter/X profile or empty string"
  }}
}}

Use ONLY the search results above. Social links must appear verbatim in the results; otherwise use "". Never guess URLs."#,
            context = self.config.site_context,
            name = candidate.display_name,
            results = format_hits(hits),
            genres = genre_line(candidate),
            popularity = candidate.popularity,
        )
    }

    fn generation_prompt(&self, candidate: &ArtistCandidate, research_text: &str) -> String {
        format!(
            r#"{context}

---

Create bilingual artist descriptions (English and French).

Artist: {name}
Genres: {genres}
Popularity: {popularity}/100

Research findings:
{research}

Write 3-4 paragraphs per language separated by <br><br>, with <strong> only around genres and labels. The French text is a natural rewrite, not a literal translation.

Return exactly this JSON:
{{
  "en": {{"description": "...", "meta_description": "~150 chars", "role": "DJ & Producer"}},
  "fr": {{"description": "...", "meta_description": "~150 caractères", "role": "DJ & Producteur"}}
}}"#,
            context = self.config.site_context,
            name = candidate.display_name,
            genres = genre_line(candidate),
            popularity = candidate.popularity,
            research = research_text,
        )
    }
}

#[async_trait]
impl SynthesisProvider for AnthropicClient {
    async fn synthesize(
        &self,
        candidate: &ArtistCandidate,
        hits: &[SearchHit],
    ) -> Result<Option<ResearchResult>, AdapterError> {
        if hits.is_empty() {
            return Ok(None);
        }
        let text = self
            .complete(&self.synthesis_prompt(candidate, hits), 1500)
            .await?;
        let payload: SynthesisPayload = parse_reply(&text)?;
        let result = payload.into_result(&candidate.canonical_identity);
        Ok((!result.is_empty()).then_some(result))
    }
}

#[async_trait]
impl ContentGenerator for AnthropicClient {
    async fn generate(
        &self,
        candidate: &ArtistCandidate,
        research_text: &str,
    ) -> Result<BilingualContent, AdapterError> {
        let text = self
            .complete(&self.generation_prompt(candidate, research_text), 2000)
            .await?;
        let content: BilingualContent = parse_reply(&text)?;
        if content.en.description.trim().is_empty() || content.fr.description.trim().is_empty() {
            return Err(AdapterError::parse(PROVIDER, "generated content is missing a locale"));
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_is_extracted_from_surrounding_prose() {
        let text = "Here you go:\n```json\n{\"en\": {\"role\": \"DJ\"}}\n```\nThanks";
        assert_eq!(extract_json_object(text), Some("{\"en\": {\"role\": \"DJ\"}}"));
        assert_eq!(extract_json_object("no braces"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn synthesis_payload_drops_blank_fields() {
        let payload: SynthesisPayload = serde_json::from_value(json!({
            "nationality": "Unknown",
            "origin": "Belfast, Northern Ireland",
            "labels": ["Ninja Tune", " "],
            "bio": "",
            "social_links": {"soundcloud": "https://soundcloud.com/bicep", "instagram": ""}
        }))
        .unwrap();
        let result = payload.into_result("bicep");
        assert_eq!(result.nationality, None);
        assert_eq!(result.origin.as_deref(), Some("Belfast, Northern Ireland"));
        assert_eq!(result.labels.len(), 1);
        assert_eq!(result.bio, None);
        assert_eq!(
            result.social_links.get(SocialPlatform::Soundcloud),
            "https://soundcloud.com/bicep"
        );
        assert_eq!(result.social_links.get(SocialPlatform::Instagram), "");
    }

    #[test]
    fn unparseable_reply_is_a_parse_error() {
        let err = parse_reply::<BilingualContent>("I could not find anything.").unwrap_err();
        assert_eq!(err.kind(), roster_core::ErrorKind::Parse);
    }
}
