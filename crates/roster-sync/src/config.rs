use std::path::PathBuf;
use std::time::Duration;

use roster_adapters::SpotifyCredential;
use roster_storage::{BackoffPolicy, RateLimitPolicy, DEFAULT_LOCK_MAX_AGE};

use crate::SyncError;

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_string(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    env_string(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True" | "yes"))
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub data_dir: PathBuf,
    pub workspace_root: PathBuf,
    pub scheduler_enabled: bool,
    /// Six-field cron expression (seconds first).
    pub sync_cron: String,
    pub lock_max_age: Duration,
    pub inter_artist_delay: Duration,
    pub search_delay: Duration,
    pub max_retries: usize,
    pub base_backoff: Duration,
    pub http_timeout: Duration,
    pub user_agent: String,
    pub spotify_credentials: Vec<SpotifyCredential>,
    pub spotify_playlist_id: Option<String>,
    pub brave_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub wordpress_url: Option<String>,
    pub wordpress_api_key: Option<String>,
    /// Offline catalogs; when set they replace the Spotify and WordPress reads.
    pub upstream_fixture: Option<PathBuf>,
    pub published_fixture: Option<PathBuf>,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let spotify_credentials = ["", "_2", "_3"]
            .iter()
            .filter_map(|suffix| {
                let client_id = env_string(&format!("SPOTIFY_CLIENT_ID{suffix}"))?;
                let client_secret = env_string(&format!("SPOTIFY_CLIENT_SECRET{suffix}"))?;
                Some(SpotifyCredential {
                    client_id,
                    client_secret,
                })
            })
            .collect();

        Self {
            database_url: env_string("ROSTER_DATABASE_URL")
                .unwrap_or_else(|| "sqlite://./data/roster.db".to_string()),
            data_dir: env_string("ROSTER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            workspace_root: env_string("ROSTER_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            scheduler_enabled: env_flag("ROSTER_SCHEDULER_ENABLED"),
            sync_cron: env_string("ROSTER_SYNC_CRON").unwrap_or_else(|| "0 0 2 * * Fri".to_string()),
            lock_max_age: Duration::from_secs(env_parse(
                "ROSTER_LOCK_MAX_AGE_SECS",
                DEFAULT_LOCK_MAX_AGE.as_secs(),
            )),
            inter_artist_delay: Duration::from_millis(env_parse("ROSTER_INTER_ARTIST_DELAY_MS", 5_000)),
            search_delay: Duration::from_millis(env_parse("ROSTER_SEARCH_DELAY_MS", 1_500)),
            max_retries: env_parse("ROSTER_MAX_RETRIES", 5),
            base_backoff: Duration::from_millis(env_parse("ROSTER_BASE_BACKOFF_MS", 1_000)),
            http_timeout: Duration::from_secs(env_parse("ROSTER_HTTP_TIMEOUT_SECS", 30)),
            user_agent: env_string("ROSTER_USER_AGENT")
                .unwrap_or_else(|| format!("roster-sync/{}", env!("CARGO_PKG_VERSION"))),
            spotify_credentials,
            spotify_playlist_id: env_string("SPOTIFY_PLAYLIST_ID"),
            brave_api_key: env_string("BRAVE_SEARCH_API_KEY"),
            anthropic_api_key: env_string("ANTHROPIC_API_KEY"),
            wordpress_url: env_string("WORDPRESS_URL"),
            wordpress_api_key: env_string("WORDPRESS_API_KEY"),
            upstream_fixture: env_string("ROSTER_UPSTREAM_FIXTURE").map(PathBuf::from),
            published_fixture: env_string("ROSTER_PUBLISHED_FIXTURE").map(PathBuf::from),
        }
    }

    /// Checks that every credential a full run needs is present. The error
    /// lists all missing variables at once.
    pub fn validate(&self) -> Result<(), SyncError> {
        let mut missing = Vec::new();
        if self.upstream_fixture.is_none() {
            if self.spotify_credentials.is_empty() {
                missing.push("SPOTIFY_CLIENT_ID/SPOTIFY_CLIENT_SECRET");
            }
            if self.spotify_playlist_id.is_none() {
                missing.push("SPOTIFY_PLAYLIST_ID");
            }
        }
        if self.wordpress_url.is_none() {
            missing.push("WORDPRESS_URL");
        }
        if self.wordpress_api_key.is_none() {
            missing.push("WORDPRESS_API_KEY");
        }
        if self.anthropic_api_key.is_none() {
            missing.push("ANTHROPIC_API_KEY");
        }
        if !self.database_url.starts_with("sqlite:") {
            missing.push("ROSTER_DATABASE_URL (sqlite:// url)");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Configuration(format!(
                "missing or invalid settings: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn rate_limit_policy(&self, inter_call_delay: Duration) -> RateLimitPolicy {
        RateLimitPolicy {
            backoff: BackoffPolicy {
                max_retries: self.max_retries,
                base_delay: self.base_backoff,
                ..BackoffPolicy::default()
            },
            inter_call_delay,
        }
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> SyncConfig {
        SyncConfig {
            database_url: "sqlite://./data/roster.db".into(),
            data_dir: PathBuf::from("./data"),
            workspace_root: PathBuf::from("."),
            scheduler_enabled: false,
            sync_cron: "0 0 2 * * Fri".into(),
            lock_max_age: DEFAULT_LOCK_MAX_AGE,
            inter_artist_delay: Duration::ZERO,
            search_delay: Duration::ZERO,
            max_retries: 5,
            base_backoff: Duration::from_secs(1),
            http_timeout: Duration::from_secs(30),
            user_agent: "test".into(),
            spotify_credentials: vec![SpotifyCredential {
                client_id: "id".into(),
                client_secret: "secret".into(),
            }],
            spotify_playlist_id: Some("pl".into()),
            brave_api_key: None,
            anthropic_api_key: Some("sk".into()),
            wordpress_url: Some("https://label.example".into()),
            wordpress_api_key: Some("wp".into()),
            upstream_fixture: None,
            published_fixture: None,
        }
    }

    #[test]
    fn complete_config_validates() {
        assert!(complete().validate().is_ok());
    }

    #[test]
    fn missing_credentials_are_all_reported() {
        let mut config = complete();
        config.spotify_credentials.clear();
        config.anthropic_api_key = None;
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), roster_core::ErrorKind::Configuration);
        let message = err.to_string();
        assert!(message.contains("SPOTIFY_CLIENT_ID"));
        assert!(message.contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn upstream_fixture_replaces_spotify_credentials() {
        let mut config = complete();
        config.spotify_credentials.clear();
        config.spotify_playlist_id = None;
        config.upstream_fixture = Some(PathBuf::from("fixtures/upstream.json"));
        assert!(config.validate().is_ok());
    }
}
