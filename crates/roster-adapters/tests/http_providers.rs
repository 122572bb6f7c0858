use std::time::Duration;

use roster_adapters::{
    AdapterError, AnthropicClient, AnthropicConfig, BraveSearch, ContentGenerator, ImageProvider,
    PublishedCatalogProvider, Publisher, SpotifyCatalog, SpotifyConfig, SpotifyCredential,
    UpstreamCatalogProvider, WebResearchProvider, WordPressClient, WordPressConfig,
};
use roster_core::{
    ArtistCandidate, BilingualContent, ErrorKind, Locale, LocalizedContent, SocialLinks,
    SocialPlatform,
};
use roster_storage::{BackoffPolicy, RateLimitPolicy};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_policy() -> RateLimitPolicy {
    RateLimitPolicy {
        backoff: BackoffPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        },
        inter_call_delay: Duration::ZERO,
    }
}

fn spotify(server: &MockServer, credentials: Vec<SpotifyCredential>) -> SpotifyCatalog {
    let mut config = SpotifyConfig::new("pl", credentials);
    config.api_base = server.uri();
    config.accounts_base = server.uri();
    config.batch_size = 2;
    config.rate_limit = fast_policy();
    SpotifyCatalog::new(reqwest::Client::new(), config).expect("spotify catalog")
}

fn credential(id: &str, secret: &str) -> SpotifyCredential {
    SpotifyCredential {
        client_id: id.into(),
        client_secret: secret.into(),
    }
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "tok", "expires_in": 3600})),
        )
        .mount(server)
        .await;
}

fn artist(id: &str, name: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "genres": ["techno"],
        "popularity": 40,
        "images": [{"url": format!("https://img.test/{id}")}],
        "external_urls": {"spotify": format!("https://open.spotify.com/artist/{id}")}
    })
}

#[tokio::test]
async fn spotify_playlist_is_paged_deduplicated_and_batched() {
    let server = MockServer::start().await;
    mount_token(&server).await;

    Mock::given(method("GET"))
        .and(path("/v1/playlists/pl/tracks"))
        .and(query_param("offset", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"track": {"artists": [{"id": "a3", "name": "Third"}]}}],
            "next": null
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/playlists/pl/tracks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"track": {"artists": [{"id": "a1", "name": "First"}, {"id": "a2", "name": "Second"}]}},
                {"track": {"artists": [{"id": "a1", "name": "First"}]}},
                {"track": null}
            ],
            "next": format!("{}/v1/playlists/pl/tracks?offset=100&limit=100", server.uri())
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/artists"))
        .and(query_param("ids", "a1,a2"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "artists": [artist("a1", "Café Tacvba"), artist("a2", "Röyksopp")]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/artists"))
        .and(query_param("ids", "a3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "artists": [artist("a3", "Rhi'N'B")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let catalog = spotify(&server, vec![credential("a", "x")]);
    let candidates = catalog.fetch_candidates().await.unwrap();
    let identities: Vec<_> = candidates.iter().map(|c| c.canonical_identity.as_str()).collect();
    assert_eq!(identities, vec!["cafe-tacvba", "royksopp", "rhinb"]);
    assert_eq!(candidates[0].image_ref.as_deref(), Some("https://img.test/a1"));
}

#[tokio::test]
async fn spotify_waits_out_a_rate_limit() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/playlists/pl/tracks"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/playlists/pl/tracks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [], "next": null})))
        .expect(1)
        .mount(&server)
        .await;

    let candidates = spotify(&server, vec![credential("a", "x")])
        .fetch_candidates()
        .await
        .unwrap();
    assert!(candidates.is_empty());
}

#[tokio::test]
async fn spotify_persistent_rate_limit_is_a_rate_limit_error() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/playlists/pl/tracks"))
        .respond_with(ResponseTemplate::new(429))
        .expect(4)
        .mount(&server)
        .await;

    let err = spotify(&server, vec![credential("a", "x")])
        .fetch_candidates()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimit);
}

#[tokio::test]
async fn spotify_rotates_to_the_next_credential_on_auth_failure() {
    let server = MockServer::start().await;
    // "a:x" and "b:y" in basic auth.
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(header("authorization", "Basic YTp4"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(header("authorization", "Basic Yjp5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok-b"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/playlists/pl/tracks"))
        .and(header("authorization", "Bearer tok-b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [], "next": null})))
        .mount(&server)
        .await;

    let catalog = spotify(&server, vec![credential("a", "x"), credential("b", "y")]);
    assert!(catalog.fetch_candidates().await.unwrap().is_empty());
}

fn wordpress(server: &MockServer) -> WordPressClient {
    let mut config = WordPressConfig::new(server.uri(), Some("secret".into()));
    config.page_size = 2;
    config.step_delay = Duration::ZERO;
    config.read_policy = fast_policy();
    WordPressClient::new(reqwest::Client::new(), config)
}

fn content() -> BilingualContent {
    BilingualContent {
        en: LocalizedContent {
            description: "<strong>Techno</strong> duo.".into(),
            meta_description: "Techno duo".into(),
            role: "DJ & Producer".into(),
        },
        fr: LocalizedContent {
            description: "Duo <strong>techno</strong>.".into(),
            meta_description: "Duo techno".into(),
            role: "DJ & Producteur".into(),
        },
    }
}

#[tokio::test]
async fn published_catalog_stops_at_the_end_of_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/artist"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "title": {"rendered": "Bicep"}, "slug": "bicep"},
            {"id": 2, "title": {"rendered": "Guns N&#8217; Roses"}, "slug": "guns-n-roses", "lang": "fr"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/artist"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"code": "rest_post_invalid_page_number"})),
        )
        .mount(&server)
        .await;

    let published = wordpress(&server).fetch_published().await.unwrap();
    assert_eq!(published.len(), 2);
    assert_eq!(published[1].locale, Locale::Fr);
    assert!(published[1].identities().contains("guns-n-roses"));
}

#[tokio::test]
async fn published_catalog_outage_is_an_error_not_an_empty_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/artist"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = wordpress(&server).fetch_published().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransientNetwork);
}

async fn mount_tool(server: &MockServer, body: serde_json::Value, reply: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/wp-json/mcp/v1/execute"))
        .and(header("x-api-key", "secret"))
        .and(body_partial_json(body))
        .respond_with(reply)
        .with_priority(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn publish_creates_both_locales_and_links_them() {
    let server = MockServer::start().await;
    mount_tool(
        &server,
        json!({"action": "create_post", "params": {"meta_input": {"role": "DJ & Producer"}}}),
        ResponseTemplate::new(200).set_body_json(json!({"post_id": 101})),
    )
    .await;
    mount_tool(
        &server,
        json!({"action": "create_post", "params": {"meta_input": {"role": "DJ & Producteur"}}}),
        ResponseTemplate::new(200).set_body_string("Post created ID 102"),
    )
    .await;
    mount_tool(
        &server,
        json!({"action": "create_term"}),
        ResponseTemplate::new(200).set_body_string("Term 55 created"),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/wp-json/mcp/v1/execute"))
        .and(body_partial_json(json!({"action": "set_post_thumbnail", "params": {"thumbnail_id": 9}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/wp-json/mcp/v1/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .with_priority(10)
        .mount(&server)
        .await;

    let candidate = ArtistCandidate::new("a1", "Bicep")
        .with_external_url(Some("https://open.spotify.com/artist/a1".into()));
    let mut links = SocialLinks::default();
    links.set(SocialPlatform::Soundcloud, "https://soundcloud.com/bicep");

    let pages = wordpress(&server)
        .publish(&candidate, &content(), Some(9), &links)
        .await
        .unwrap();
    assert_eq!(pages[&Locale::En].id, 101);
    assert_eq!(pages[&Locale::Fr].id, 102);
    assert_eq!(pages[&Locale::En].url, format!("{}/artists/bicep/", server.uri()));
    assert_eq!(pages[&Locale::Fr].url, format!("{}/fr/artistes/bicep/", server.uri()));
}

#[tokio::test]
async fn failed_second_locale_reports_a_partial_publish() {
    let server = MockServer::start().await;
    mount_tool(
        &server,
        json!({"action": "create_post", "params": {"meta_input": {"role": "DJ & Producer"}}}),
        ResponseTemplate::new(200).set_body_json(json!({"ID": 201})),
    )
    .await;
    mount_tool(
        &server,
        json!({"action": "create_post", "params": {"meta_input": {"role": "DJ & Producteur"}}}),
        ResponseTemplate::new(500),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/wp-json/mcp/v1/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .with_priority(10)
        .mount(&server)
        .await;

    let err = wordpress(&server)
        .publish(&ArtistCandidate::new("a1", "Bicep"), &content(), None, &SocialLinks::default())
        .await
        .unwrap_err();
    match &err {
        AdapterError::PartialPublish { published, missing, .. } => {
            assert_eq!(*missing, Locale::Fr);
            assert_eq!(published[&Locale::En].id, 201);
        }
        other => panic!("expected partial publish, got {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::Publish);
}

#[tokio::test]
async fn image_transfer_rejection_and_lookup_by_name() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/wp-json/dd-api/v1/upload-image"))
        .and(body_partial_json(json!({"title": "Bicep", "alt_text": "Bicep"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": false, "message": "remote fetch failed"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/media"))
        .and(query_param("search", "Bicep"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 9, "title": {"rendered": "Bicep live"}},
            {"id": 12, "title": {"rendered": "BICEP"}}
        ])))
        .mount(&server)
        .await;

    let client = wordpress(&server);
    let err = client
        .transfer("https://img.test/a1", "Bicep")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Publish);
    assert_eq!(client.find_existing("Bicep").await.unwrap(), Some(12));
}

#[tokio::test]
async fn brave_results_are_mapped_to_hits() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/res/v1/web/search"))
        .and(query_param("q", "Bicep biography"))
        .and(header("x-subscription-token", "brave-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "web": {"results": [
                {"title": "<strong>Bicep</strong> | Ninja Tune", "description": "Belfast duo", "url": "https://ninjatune.net/bicep"}
            ]}
        })))
        .mount(&server)
        .await;

    let brave = BraveSearch::new(reqwest::Client::new(), "brave-key".into(), Duration::ZERO)
        .with_endpoint(format!("{}/res/v1/web/search", server.uri()));
    let hits = brave.search("Bicep biography", 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "Bicep | Ninja Tune");
}

#[tokio::test]
async fn anthropic_generation_parses_wrapped_json() {
    let server = MockServer::start().await;
    let reply_text = format!(
        "Here is the content:\n{}",
        serde_json::to_string(&content()).unwrap()
    );
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": reply_text}]
        })))
        .mount(&server)
        .await;

    let mut config = AnthropicConfig::new("sk-test");
    config.api_base = server.uri();
    config.rate_limit = fast_policy();
    let client = AnthropicClient::new(reqwest::Client::new(), config).unwrap();
    let generated = client
        .generate(&ArtistCandidate::new("a1", "Bicep"), "Limited information available.")
        .await
        .unwrap();
    assert_eq!(generated, content());
}
