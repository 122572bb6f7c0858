//! WordPress target: the published catalog is read from the public REST
//! API, pages are written through the site's tool endpoint, and images go
//! through the custom upload route.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use roster_core::{
    same_identity, ArtistCandidate, BilingualContent, Locale, MediaId, PageRef, PublishedArtist,
    SocialLinks, SocialPlatform,
};
use roster_storage::{Pacer, RateLimitPolicy, RateLimiter, UpstreamError};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::http::{decode_html_entities, send_json, send_text};
use crate::{
    AdapterError, ImageProvider, PublishedCatalogProvider, Publisher, ToolReply,
};

const PROVIDER: &str = "wordpress";

#[derive(Debug, Clone)]
pub struct WordPressConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Defaults to `{base_url}/wp-json/mcp/v1`.
    pub tool_endpoint: Option<String>,
    pub post_type: String,
    pub page_size: usize,
    /// Polylang language term ids.
    pub language_terms: BTreeMap<Locale, u64>,
    /// Pause between consecutive write calls for one artist.
    pub step_delay: Duration,
    pub read_policy: RateLimitPolicy,
}

impl WordPressConfig {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            tool_endpoint: None,
            post_type: "artist".into(),
            page_size: 100,
            language_terms: BTreeMap::from([(Locale::En, 4), (Locale::Fr, 7)]),
            step_delay: Duration::from_secs(1),
            read_policy: RateLimitPolicy {
                inter_call_delay: Duration::from_millis(500),
                ..RateLimitPolicy::default()
            },
        }
    }

    fn tool_url(&self) -> String {
        let endpoint = self
            .tool_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}/wp-json/mcp/v1", self.base_url));
        format!("{}/execute", endpoint.trim_end_matches('/'))
    }

    pub fn page_url(&self, locale: Locale, slug: &str) -> String {
        match locale {
            Locale::En => format!("{}/artists/{slug}/", self.base_url),
            Locale::Fr => format!("{}/fr/artistes/{slug}/", self.base_url),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RestPost {
    id: u64,
    #[serde(default)]
    title: Rendered,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    lang: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Rendered {
    #[serde(default)]
    rendered: String,
}

#[derive(Debug, Deserialize)]
struct RestMedia {
    id: u64,
    #[serde(default)]
    title: Rendered,
}

impl RestPost {
    fn into_published(self) -> PublishedArtist {
        let locale = self
            .lang
            .as_deref()
            .and_then(|l| l.parse().ok())
            .unwrap_or(Locale::En);
        PublishedArtist {
            id: Some(self.id),
            name: decode_html_entities(&self.title.rendered),
            slug: self.slug.filter(|s| !s.is_empty()),
            locale,
            canonical_identity: None,
        }
    }
}

pub struct WordPressClient {
    client: reqwest::Client,
    config: WordPressConfig,
    reads: RateLimiter<()>,
    steps: Pacer,
}

impl WordPressClient {
    pub fn new(client: reqwest::Client, config: WordPressConfig) -> Self {
        let reads = RateLimiter::new(PROVIDER, config.read_policy, vec![()]);
        let steps = Pacer::new(config.step_delay);
        Self {
            client,
            config,
            reads,
            steps,
        }
    }

    pub fn config(&self) -> &WordPressConfig {
        &self.config
    }

    fn api_key(&self) -> Result<&str, AdapterError> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| AdapterError::NotConfigured {
                provider: PROVIDER,
                detail: "WORDPRESS_API_KEY is not set".into(),
            })
    }

    async fn fetch_page(&self, page: usize) -> Result<Option<Vec<RestPost>>, UpstreamError> {
        let url = format!(
            "{}/wp-json/wp/v2/{}?per_page={}&page={page}&status=publish",
            self.config.base_url, self.config.post_type, self.config.page_size
        );
        let result = self
            .reads
            .call(|_| send_json::<Vec<RestPost>>(self.client.get(&url)))
            .await;
        match result {
            Ok(posts) => Ok(Some(posts)),
            // Asking past the last page is a 400 rather than an empty list.
            Err(UpstreamError::Status { status: 400, .. }) if page > 1 => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Runs one action on the tool endpoint and parses the reply.
    pub async fn tool(&self, action: &str, params: JsonValue) -> Result<ToolReply, AdapterError> {
        let key = self.api_key()?;
        self.steps.wait().await;
        let body = send_text(
            self.client
                .post(self.config.tool_url())
                .bearer_auth(key)
                .header("X-API-Key", key)
                .json(&json!({ "action": action, "params": params })),
        )
        .await?;
        let reply = ToolReply::parse(&body);
        debug!(action, ?reply, "tool call finished");
        Ok(reply)
    }

    async fn create_page(
        &self,
        locale: Locale,
        candidate: &ArtistCandidate,
        content: &BilingualContent,
        social_links: &SocialLinks,
    ) -> Result<PageRef, AdapterError> {
        let slug = &candidate.canonical_identity;
        let localized = content.for_locale(locale);
        let tag = |i: usize| candidate.genres.get(i).cloned().unwrap_or_default();
        let params = json!({
            "post_title": candidate.display_name,
            "post_name": slug,
            "post_type": self.config.post_type,
            "post_status": "publish",
            "meta_input": {
                "title": candidate.display_name,
                "role": localized.role,
                "description": localized.description,
                "spotify_link": candidate.external_url.clone().unwrap_or_default(),
                "soundcloud_link": social_links.get(SocialPlatform::Soundcloud),
                "instagram_link": social_links.get(SocialPlatform::Instagram),
                "tag1": tag(0),
                "tag2": tag(1),
                "tag3": tag(2),
                "_yoast_wpseo_title": "%%title%%",
                "_yoast_wpseo_focuskw": candidate.display_name,
                "_yoast_wpseo_metadesc": localized.meta_description,
            }
        });
        let id = self.tool("create_post", params).await?.into_id(PROVIDER)?;

        // post_name is sometimes ignored on create.
        if let Err(err) = self
            .tool("update_post", json!({ "post_id": id, "post_name": slug }))
            .await
        {
            warn!(post_id = id, error = %err, "could not force page slug");
        }
        info!(post_id = id, %locale, "page created");
        Ok(PageRef {
            id,
            url: self.config.page_url(locale, slug),
        })
    }

    async fn link_translations(&self, pages: &BTreeMap<Locale, PageRef>) -> Result<(), AdapterError> {
        for (locale, page) in pages {
            if let Some(term) = self.config.language_terms.get(locale) {
                self.tool(
                    "set_post_terms",
                    json!({ "post_id": page.id, "taxonomy": "language", "terms": [term], "append": false }),
                )
                .await?;
            }
        }
        let (Some(en), Some(fr)) = (pages.get(&Locale::En), pages.get(&Locale::Fr)) else {
            return Ok(());
        };
        let term_name = format!("pll_{:x}{}", Utc::now().timestamp_millis(), en.id);
        let term_id = self
            .tool(
                "create_term",
                json!({ "taxonomy": "post_translations", "term_name": term_name }),
            )
            .await?
            .into_id(PROVIDER)?;
        for page in [en, fr] {
            self.tool(
                "set_post_terms",
                json!({ "post_id": page.id, "taxonomy": "post_translations", "terms": [term_id], "append": false }),
            )
            .await?;
        }
        let description = format!(
            "a:2:{{s:2:\"en\";i:{};s:2:\"fr\";i:{};}}",
            en.id, fr.id
        );
        if let ToolReply::Error(message) = self
            .tool(
                "update_term",
                json!({ "term_id": term_id, "taxonomy": "post_translations", "description": description }),
            )
            .await?
        {
            return Err(AdapterError::Rejected {
                provider: PROVIDER,
                detail: message,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PublishedCatalogProvider for WordPressClient {
    async fn fetch_published(&self) -> Result<Vec<PublishedArtist>, AdapterError> {
        let mut published = Vec::new();
        let mut page = 1usize;
        while let Some(posts) = self.fetch_page(page).await? {
            let count = posts.len();
            published.extend(posts.into_iter().map(RestPost::into_published));
            if count < self.config.page_size {
                break;
            }
            page += 1;
        }
        info!(count = published.len(), pages = page, "fetched published catalog");
        Ok(published)
    }
}

#[async_trait]
impl ImageProvider for WordPressClient {
    async fn transfer(
        &self,
        image_ref: &str,
        artist_name: &str,
    ) -> Result<Option<MediaId>, AdapterError> {
        let key = self.api_key()?;
        let url = format!("{}/wp-json/dd-api/v1/upload-image", self.config.base_url);
        let reply: JsonValue = send_json(
            self.client
                .post(url)
                .header("X-API-Key", key)
                .json(&json!({ "url": image_ref, "title": artist_name, "alt_text": artist_name })),
        )
        .await?;
        match ToolReply::from_json(&reply) {
            ToolReply::Id(id) => Ok(Some(id)),
            ToolReply::Error(message) => Err(AdapterError::Rejected {
                provider: PROVIDER,
                detail: message,
            }),
            ToolReply::Text(_) => Ok(None),
        }
    }

    async fn find_existing(&self, artist_name: &str) -> Result<Option<MediaId>, AdapterError> {
        let url = format!("{}/wp-json/wp/v2/media", self.config.base_url);
        let media: Vec<RestMedia> = self
            .reads
            .call(|_| {
                send_json(
                    self.client
                        .get(&url)
                        .query(&[("search", artist_name), ("per_page", "10")]),
                )
            })
            .await?;
        Ok(media
            .into_iter()
            .find(|m| same_identity(&decode_html_entities(&m.title.rendered), artist_name))
            .map(|m| m.id))
    }
}

#[async_trait]
impl Publisher for WordPressClient {
    async fn publish(
        &self,
        candidate: &ArtistCandidate,
        content: &BilingualContent,
        media_id: Option<MediaId>,
        social_links: &SocialLinks,
    ) -> Result<BTreeMap<Locale, PageRef>, AdapterError> {
        let mut pages = BTreeMap::new();
        for locale in Locale::ALL {
            match self.create_page(locale, candidate, content, social_links).await {
                Ok(page) => {
                    pages.insert(locale, page);
                }
                Err(err) if pages.is_empty() => return Err(err),
                Err(err) => {
                    return Err(AdapterError::PartialPublish {
                        published: pages,
                        missing: locale,
                        detail: err.to_string(),
                    })
                }
            }
        }

        if let Err(err) = self.link_translations(&pages).await {
            warn!(artist = %candidate.display_name, error = %err, "translation linking failed; pages left unlinked");
        }
        if let Some(media_id) = media_id {
            for page in pages.values() {
                if let Err(err) = self
                    .tool(
                        "set_post_thumbnail",
                        json!({ "post_id": page.id, "thumbnail_id": media_id }),
                    )
                    .await
                {
                    warn!(post_id = page.id, media_id, error = %err, "could not set featured image");
                }
            }
        }
        Ok(pages)
    }
}
