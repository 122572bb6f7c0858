//! Core domain model for the artist roster sync.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod identity;

pub use identity::{normalize, same_identity};

pub const CRATE_NAME: &str = "roster-core";

/// Error kinds shared by every layer so callers can decide retry, skip or
/// abort without looking at message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Conflict,
    Configuration,
    RateLimit,
    TransientNetwork,
    Parse,
    DuplicateRace,
    InvalidTransition,
    Publish,
    Storage,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conflict => "conflict",
            Self::Configuration => "configuration",
            Self::RateLimit => "rate_limit",
            Self::TransientNetwork => "transient_network",
            Self::Parse => "parse",
            Self::DuplicateRace => "duplicate_race",
            Self::InvalidTransition => "invalid_transition",
            Self::Publish => "publish",
            Self::Storage => "storage",
        }
    }

    /// Kinds that stop the whole run instead of a single artist.
    pub fn is_run_fatal(self) -> bool {
        matches!(
            self,
            Self::Conflict | Self::Configuration | Self::InvalidTransition | Self::Storage
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    En,
    Fr,
}

impl Locale {
    pub const ALL: [Locale; 2] = [Locale::En, Locale::Fr];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Fr => "fr",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "en_us" | "en_gb" => Ok(Self::En),
            "fr" | "fr_fr" => Ok(Self::Fr),
            other => Err(format!("unsupported locale {other}")),
        }
    }
}

/// An artist present in the upstream catalog. The canonical identity is
/// always derived from the display name, including after deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CandidateRecord")]
pub struct ArtistCandidate {
    pub source_id: String,
    pub display_name: String,
    pub genres: Vec<String>,
    pub popularity: u8,
    pub image_ref: Option<String>,
    pub external_url: Option<String>,
    pub canonical_identity: String,
}

#[derive(Deserialize)]
struct CandidateRecord {
    source_id: String,
    display_name: String,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    popularity: u32,
    #[serde(default)]
    image_ref: Option<String>,
    #[serde(default)]
    external_url: Option<String>,
}

impl From<CandidateRecord> for ArtistCandidate {
    fn from(record: CandidateRecord) -> Self {
        ArtistCandidate::new(record.source_id, record.display_name)
            .with_genres(record.genres)
            .with_popularity(record.popularity)
            .with_image_ref(record.image_ref)
            .with_external_url(record.external_url)
    }
}

impl ArtistCandidate {
    pub fn new(source_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let canonical_identity = normalize(&display_name);
        Self {
            source_id: source_id.into(),
            display_name,
            genres: Vec::new(),
            popularity: 0,
            image_ref: None,
            external_url: None,
            canonical_identity,
        }
    }

    pub fn with_genres(mut self, genres: Vec<String>) -> Self {
        self.genres = genres;
        self
    }

    /// Popularity is clamped to 0..=100.
    pub fn with_popularity(mut self, popularity: u32) -> Self {
        self.popularity = popularity.min(100) as u8;
        self
    }

    pub fn with_image_ref(mut self, image_ref: Option<String>) -> Self {
        self.image_ref = image_ref.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_external_url(mut self, external_url: Option<String>) -> Self {
        self.external_url = external_url.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn is_resolvable(&self) -> bool {
        !self.canonical_identity.is_empty()
    }
}

/// One record of the published catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedArtist {
    pub id: Option<u64>,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    pub locale: Locale,
    #[serde(default)]
    pub canonical_identity: Option<String>,
}

impl PublishedArtist {
    /// Identities this record answers to: the provider-supplied one, the
    /// normalized slug and the normalized name. Empty identities are dropped.
    pub fn identities(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        if let Some(identity) = &self.canonical_identity {
            out.insert(normalize(identity));
        }
        if let Some(slug) = &self.slug {
            out.insert(normalize(slug));
        }
        out.insert(normalize(&self.name));
        out.remove("");
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown queue status {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub canonical_identity: String,
    pub display_name: String,
    pub source_id: String,
    pub genres: Vec<String>,
    pub popularity: u8,
    pub image_ref: Option<String>,
    pub external_url: Option<String>,
    pub status: QueueStatus,
    pub added_at: DateTime<Utc>,
    pub processing_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialPlatform {
    Soundcloud,
    Instagram,
    Facebook,
    Twitter,
}

impl SocialPlatform {
    pub const ALL: [SocialPlatform; 4] = [
        SocialPlatform::Soundcloud,
        SocialPlatform::Instagram,
        SocialPlatform::Facebook,
        SocialPlatform::Twitter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Soundcloud => "soundcloud",
            Self::Instagram => "instagram",
            Self::Facebook => "facebook",
            Self::Twitter => "twitter",
        }
    }
}

/// Platform to profile URL. Missing platforms read back as an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SocialLinks(BTreeMap<SocialPlatform, String>);

impl SocialLinks {
    pub fn get(&self, platform: SocialPlatform) -> &str {
        self.0.get(&platform).map(String::as_str).unwrap_or("")
    }

    /// Empty URLs are not stored.
    pub fn set(&mut self, platform: SocialPlatform, url: impl Into<String>) {
        let url = url.into();
        if url.trim().is_empty() {
            self.0.remove(&platform);
        } else {
            self.0.insert(platform, url);
        }
    }

    /// Fills platforms that are still empty from `other`.
    pub fn merge_missing(&mut self, other: &SocialLinks) {
        for (platform, url) in &other.0 {
            self.0.entry(*platform).or_insert_with(|| url.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SocialPlatform, &str)> {
        self.0.iter().map(|(p, u)| (*p, u.as_str()))
    }
}

/// Structured research cached per identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchResult {
    pub canonical_identity: String,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub collaborations: BTreeSet<String>,
    #[serde(default)]
    pub achievements: Vec<String>,
    #[serde(default)]
    pub festivals: Vec<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub social_links: SocialLinks,
    pub updated_at: DateTime<Utc>,
}

impl ResearchResult {
    pub fn new(canonical_identity: impl Into<String>) -> Self {
        Self {
            canonical_identity: canonical_identity.into(),
            nationality: None,
            origin: None,
            labels: BTreeSet::new(),
            style: None,
            collaborations: BTreeSet::new(),
            achievements: Vec::new(),
            festivals: Vec::new(),
            bio: None,
            social_links: SocialLinks::default(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nationality.is_none()
            && self.origin.is_none()
            && self.labels.is_empty()
            && self.style.is_none()
            && self.collaborations.is_empty()
            && self.achievements.is_empty()
            && self.festivals.is_empty()
            && self.bio.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedContent {
    pub description: String,
    pub meta_description: String,
    pub role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BilingualContent {
    pub en: LocalizedContent,
    pub fr: LocalizedContent,
}

impl BilingualContent {
    pub fn for_locale(&self, locale: Locale) -> &LocalizedContent {
        match locale {
            Locale::En => &self.en,
            Locale::Fr => &self.fr,
        }
    }
}

pub type MediaId = u64;

/// Identifier and public URL of one published page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
    pub id: u64,
    pub url: String,
}

/// Holder of the process-wide sync lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLockInfo {
    pub request_id: String,
    pub owner_pid: u32,
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    pub max_age_seconds: u64,
    pub age_seconds: u64,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistFailure {
    pub name: String,
    pub stage: String,
    pub kind: ErrorKind,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: Vec<String>,
    pub failed: Vec<ArtistFailure>,
    pub skipped: Vec<String>,
    pub duration_seconds: f64,
}

impl SyncRunReport {
    pub fn attempted(&self) -> usize {
        self.success.len() + self.failed.len() + self.skipped.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NeverRun,
    Running,
    Completed,
    Error,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NeverRun => "never_run",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "never_run" => Ok(Self::NeverRun),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown run status {other}")),
        }
    }
}

/// Externally observable result of the most recent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub report: Option<SyncRunReport>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            last_run: None,
            status: RunStatus::NeverRun,
            report: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_identity_is_derived_from_name() {
        let candidate = ArtistCandidate::new("spotify:1", "Café Tacvba").with_popularity(250);
        assert_eq!(candidate.canonical_identity, "cafe-tacvba");
        assert_eq!(candidate.popularity, 100);
        assert!(candidate.is_resolvable());
        assert!(!ArtistCandidate::new("spotify:2", "!!!").is_resolvable());
    }

    #[test]
    fn deserialized_candidate_recomputes_identity() {
        let json = r#"{"source_id":"s1","display_name":"Röyksopp","canonical_identity":"stale","popularity":42}"#;
        let candidate: ArtistCandidate = serde_json::from_str(json).unwrap();
        assert_eq!(candidate.canonical_identity, "royksopp");
        assert_eq!(candidate.popularity, 42);
        assert!(candidate.genres.is_empty());
    }

    #[test]
    fn published_artist_answers_to_name_and_slug() {
        let published = PublishedArtist {
            id: Some(7),
            name: "Sigur Rós".into(),
            slug: Some("sigur-ros-2".into()),
            locale: Locale::Fr,
            canonical_identity: None,
        };
        let ids = published.identities();
        assert!(ids.contains("sigur-ros"));
        assert!(ids.contains("sigur-ros-2"));
    }

    #[test]
    fn social_links_read_empty_for_missing_platforms() {
        let mut links = SocialLinks::default();
        links.set(SocialPlatform::Instagram, "https://www.instagram.com/bjork/");
        links.set(SocialPlatform::Twitter, "  ");
        assert_eq!(links.get(SocialPlatform::Soundcloud), "");
        assert_eq!(links.get(SocialPlatform::Twitter), "");
        assert_eq!(
            serde_json::to_value(&links).unwrap(),
            serde_json::json!({"instagram": "https://www.instagram.com/bjork/"})
        );
    }

    #[test]
    fn run_fatal_kinds_are_distinct_from_per_artist_kinds() {
        assert!(ErrorKind::Conflict.is_run_fatal());
        assert!(ErrorKind::InvalidTransition.is_run_fatal());
        assert!(!ErrorKind::RateLimit.is_run_fatal());
        assert!(!ErrorKind::DuplicateRace.is_run_fatal());
    }
}
