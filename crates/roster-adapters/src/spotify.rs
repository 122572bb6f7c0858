//! Upstream catalog backed by a Spotify playlist: every distinct artist on
//! the playlist becomes a candidate.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use roster_core::ArtistCandidate;
use roster_storage::{RateLimitPolicy, RateLimiter, UpstreamError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::http::send_json;
use crate::{AdapterError, UpstreamCatalogProvider};

const PROVIDER: &str = "spotify";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotifyCredential {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub credentials: Vec<SpotifyCredential>,
    pub playlist_id: String,
    pub api_base: String,
    pub accounts_base: String,
    /// Artists per `/v1/artists?ids=` request; the API caps it at 50.
    pub batch_size: usize,
    pub rate_limit: RateLimitPolicy,
}

impl SpotifyConfig {
    pub fn new(playlist_id: impl Into<String>, credentials: Vec<SpotifyCredential>) -> Self {
        Self {
            credentials,
            playlist_id: playlist_id.into(),
            api_base: "https://api.spotify.com".into(),
            accounts_base: "https://accounts.spotify.com".into(),
            batch_size: 50,
            rate_limit: RateLimitPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenReply {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
struct PlaylistPage {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<Track>,
}

#[derive(Debug, Deserialize)]
struct Track {
    #[serde(default)]
    artists: Vec<ArtistRef>,
}

#[derive(Debug, Deserialize)]
struct ArtistRef {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArtistsReply {
    #[serde(default)]
    artists: Vec<Option<SpotifyArtist>>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    id: String,
    name: String,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    popularity: u32,
    #[serde(default)]
    images: Vec<SpotifyImage>,
    #[serde(default)]
    external_urls: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SpotifyImage {
    url: String,
}

impl From<SpotifyArtist> for ArtistCandidate {
    fn from(artist: SpotifyArtist) -> Self {
        let image = artist.images.into_iter().next().map(|i| i.url);
        let external = artist.external_urls.get("spotify").cloned();
        ArtistCandidate::new(artist.id, artist.name)
            .with_genres(artist.genres)
            .with_popularity(artist.popularity)
            .with_image_ref(image)
            .with_external_url(external)
    }
}

pub struct SpotifyCatalog {
    client: reqwest::Client,
    config: SpotifyConfig,
    limiter: RateLimiter<SpotifyCredential>,
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl SpotifyCatalog {
    pub fn new(client: reqwest::Client, config: SpotifyConfig) -> Result<Self, AdapterError> {
        if config.credentials.is_empty() {
            return Err(AdapterError::NotConfigured {
                provider: PROVIDER,
                detail: "no client credentials".into(),
            });
        }
        if config.playlist_id.trim().is_empty() {
            return Err(AdapterError::NotConfigured {
                provider: PROVIDER,
                detail: "no playlist id".into(),
            });
        }
        let limiter = RateLimiter::new(PROVIDER, config.rate_limit, config.credentials.clone());
        Ok(Self {
            client,
            config,
            limiter,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    async fn token(&self, credential: &SpotifyCredential) -> Result<String, UpstreamError> {
        {
            let tokens = self.tokens.lock().await;
            if let Some(cached) = tokens.get(&credential.client_id) {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.access_token.clone());
                }
            }
        }
        let url = format!("{}/api/token", self.config.accounts_base);
        let reply: TokenReply = send_json(
            self.client
                .post(url)
                .basic_auth(&credential.client_id, Some(&credential.client_secret))
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body("grant_type=client_credentials"),
        )
        .await?;
        // Refresh a minute early.
        let lifetime = Duration::from_secs(reply.expires_in.saturating_sub(60).max(1));
        self.tokens.lock().await.insert(
            credential.client_id.clone(),
            CachedToken {
                access_token: reply.access_token.clone(),
                expires_at: Instant::now() + lifetime,
            },
        );
        debug!(client_id = %credential.client_id, "spotify token issued");
        Ok(reply.access_token)
    }

    async fn authorized_get<T: DeserializeOwned>(
        &self,
        credential: SpotifyCredential,
        url: &str,
    ) -> Result<T, UpstreamError> {
        let token = self.token(&credential).await?;
        let result = send_json(self.client.get(url).bearer_auth(token)).await;
        if let Err(UpstreamError::Status { status: 401, .. }) = &result {
            self.tokens.lock().await.remove(&credential.client_id);
        }
        result
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, UpstreamError> {
        self.limiter
            .call(|credential| self.authorized_get(credential, url))
            .await
    }

    async fn playlist_artist_ids(&self) -> Result<Vec<String>, UpstreamError> {
        let mut next = Some(format!(
            "{}/v1/playlists/{}/tracks?limit=100",
            self.config.api_base, self.config.playlist_id
        ));
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut pages = 0usize;
        while let Some(url) = next {
            let page: PlaylistPage = self.get(&url).await?;
            pages += 1;
            for item in page.items {
                let Some(track) = item.track else { continue };
                for artist in track.artists {
                    if let Some(id) = artist.id.filter(|id| !id.is_empty()) {
                        if seen.insert(id.clone()) {
                            ids.push(id);
                        }
                    }
                }
            }
            next = page.next;
        }
        debug!(pages, artists = ids.len(), "playlist scanned");
        Ok(ids)
    }
}

#[async_trait]
impl UpstreamCatalogProvider for SpotifyCatalog {
    fn provider_id(&self) -> &str {
        PROVIDER
    }

    async fn fetch_candidates(&self) -> Result<Vec<ArtistCandidate>, AdapterError> {
        let ids = self.playlist_artist_ids().await?;
        let mut candidates = Vec::with_capacity(ids.len());
        for batch in ids.chunks(self.config.batch_size.clamp(1, 50)) {
            let url = format!(
                "{}/v1/artists?ids={}",
                self.config.api_base,
                batch.join(",")
            );
            let reply: ArtistsReply = self.get(&url).await?;
            candidates.extend(reply.artists.into_iter().flatten().map(ArtistCandidate::from));
        }
        info!(
            playlist = %self.config.playlist_id,
            candidates = candidates.len(),
            "fetched upstream catalog"
        );
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artist_payload_maps_to_candidate() {
        let artist: SpotifyArtist = serde_json::from_value(serde_json::json!({
            "id": "7jy3rLJdDQY21OgRLCZ9sD",
            "name": "Foo Fighters",
            "genres": ["rock", "alternative rock"],
            "popularity": 79,
            "images": [{"url": "https://i.scdn.co/image/large", "height": 640}],
            "external_urls": {"spotify": "https://open.spotify.com/artist/7jy3rLJdDQY21OgRLCZ9sD"}
        }))
        .unwrap();
        let candidate = ArtistCandidate::from(artist);
        assert_eq!(candidate.canonical_identity, "foo-fighters");
        assert_eq!(candidate.popularity, 79);
        assert_eq!(candidate.image_ref.as_deref(), Some("https://i.scdn.co/image/large"));
        assert!(candidate.external_url.unwrap().ends_with("7jy3rLJdDQY21OgRLCZ9sD"));
    }

    #[test]
    fn missing_credentials_are_a_configuration_error() {
        let client = reqwest::Client::new();
        let err = SpotifyCatalog::new(client, SpotifyConfig::new("playlist", vec![]))
            .err()
            .unwrap();
        assert_eq!(err.kind(), roster_core::ErrorKind::Configuration);
    }
}
