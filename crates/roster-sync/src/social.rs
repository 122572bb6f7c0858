//! Social profile discovery. Only URLs that actually appear in search
//! results are kept, and only when they point at a profile.

use std::sync::Arc;
use std::time::Duration;

use roster_adapters::{SearchHit, WebResearchProvider};
use roster_core::{SocialLinks, SocialPlatform};
use roster_storage::Pacer;
use tracing::{debug, warn};
use url::Url;

const RESULTS_PER_LOOKUP: usize = 5;

fn parse_web_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

fn bare_host(url: &Url) -> Option<&str> {
    let host = url.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host))
}

fn segments(url: &Url) -> Vec<&str> {
    url.path_segments()
        .map(|parts| parts.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

/// A SoundCloud profile URL, never a single track or playlist.
pub fn soundcloud_profile(raw: &str) -> Option<String> {
    let url = parse_web_url(raw)?;
    if !matches!(bare_host(&url)?, "soundcloud.com" | "m.soundcloud.com") {
        return None;
    }
    match segments(&url).as_slice() {
        [handle] | [handle, "popular-tracks"] => Some(format!("https://soundcloud.com/{handle}")),
        _ => None,
    }
}

/// `https://www.instagram.com/<handle>/`, never a post or reel.
pub fn instagram_profile(raw: &str) -> Option<String> {
    let url = parse_web_url(raw)?;
    if bare_host(&url)? != "instagram.com" {
        return None;
    }
    match segments(&url).as_slice() {
        [handle] if !matches!(*handle, "p" | "reel" | "reels" | "stories" | "explore") => {
            Some(format!("https://www.instagram.com/{handle}/"))
        }
        _ => None,
    }
}

fn facebook_page(raw: &str) -> Option<String> {
    let url = parse_web_url(raw)?;
    if !matches!(bare_host(&url)?, "facebook.com" | "m.facebook.com") {
        return None;
    }
    match segments(&url).as_slice() {
        [page] if !matches!(*page, "watch" | "events" | "photo.php" | "sharer.php") => {
            Some(format!("https://www.facebook.com/{page}"))
        }
        _ => None,
    }
}

fn twitter_profile(raw: &str) -> Option<String> {
    let url = parse_web_url(raw)?;
    if !matches!(bare_host(&url)?, "twitter.com" | "x.com") {
        return None;
    }
    match segments(&url).as_slice() {
        [handle] if !matches!(*handle, "search" | "hashtag" | "intent" | "share") => {
            Some(format!("https://x.com/{handle}"))
        }
        _ => None,
    }
}

/// Canonical profile URL for `platform`, or `None` when `url` is not one.
pub fn profile_url(platform: SocialPlatform, url: &str) -> Option<String> {
    match platform {
        SocialPlatform::Soundcloud => soundcloud_profile(url),
        SocialPlatform::Instagram => instagram_profile(url),
        SocialPlatform::Facebook => facebook_page(url),
        SocialPlatform::Twitter => twitter_profile(url),
    }
}

/// Keeps only links that pass the profile rules.
pub fn sanitize(links: &SocialLinks) -> SocialLinks {
    let mut clean = SocialLinks::default();
    for (platform, url) in links.iter() {
        if let Some(profile) = profile_url(platform, url) {
            clean.set(platform, profile);
        }
    }
    clean
}

fn first_profile(platform: SocialPlatform, hits: &[SearchHit]) -> Option<String> {
    hits.iter().find_map(|hit| profile_url(platform, &hit.url))
}

pub struct SocialLinkFinder {
    search: Arc<dyn WebResearchProvider>,
    pacer: Pacer,
    platforms: Vec<SocialPlatform>,
}

impl SocialLinkFinder {
    /// Searches SoundCloud and Instagram, one paced query each.
    pub fn new(search: Arc<dyn WebResearchProvider>, delay: Duration) -> Self {
        Self {
            search,
            pacer: Pacer::new(delay),
            platforms: vec![SocialPlatform::Soundcloud, SocialPlatform::Instagram],
        }
    }

    /// Starts from the links research already found and searches only for
    /// the platforms still empty. A failed lookup leaves the platform empty.
    pub async fn discover(&self, artist_name: &str, known: &SocialLinks) -> SocialLinks {
        let mut links = sanitize(known);
        for platform in &self.platforms {
            if !links.get(*platform).is_empty() {
                continue;
            }
            self.pacer.wait().await;
            let query = format!("{artist_name} DJ producer {}", platform.as_str());
            match self.search.search(&query, RESULTS_PER_LOOKUP).await {
                Ok(hits) => {
                    if let Some(url) = first_profile(*platform, &hits) {
                        debug!(artist = artist_name, platform = platform.as_str(), %url, "social profile found");
                        links.set(*platform, url);
                    }
                }
                Err(err) => {
                    warn!(artist = artist_name, platform = platform.as_str(), error = %err, "social lookup failed");
                }
            }
        }
        links
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soundcloud_tracks_and_sets_are_rejected() {
        assert_eq!(
            soundcloud_profile("https://soundcloud.com/bicep").as_deref(),
            Some("https://soundcloud.com/bicep")
        );
        assert_eq!(
            soundcloud_profile("https://m.soundcloud.com/bicep?utm=x").as_deref(),
            Some("https://soundcloud.com/bicep")
        );
        assert_eq!(soundcloud_profile("https://soundcloud.com/bicep/tracks"), None);
        assert_eq!(soundcloud_profile("https://soundcloud.com/bicep/sets/isles"), None);
        assert_eq!(soundcloud_profile("https://soundcloud.com/bicep/glue"), None);
        assert_eq!(soundcloud_profile("https://notsoundcloud.com/bicep"), None);
    }

    #[test]
    fn instagram_is_normalized_to_the_profile() {
        assert_eq!(
            instagram_profile("http://instagram.com/feelmybicep?hl=en").as_deref(),
            Some("https://www.instagram.com/feelmybicep/")
        );
        assert_eq!(instagram_profile("https://www.instagram.com/p/Cx12/"), None);
        assert_eq!(instagram_profile("https://www.instagram.com/reel/Cx12/"), None);
        assert_eq!(instagram_profile("https://www.instagram.com/"), None);
    }

    #[test]
    fn ports_case_and_userinfo_do_not_hide_a_profile() {
        assert_eq!(
            soundcloud_profile("https://soundcloud.com:443/bicep").as_deref(),
            Some("https://soundcloud.com/bicep")
        );
        assert_eq!(
            instagram_profile("HTTPS://WWW.Instagram.com/feelmybicep/").as_deref(),
            Some("https://www.instagram.com/feelmybicep/")
        );
        assert_eq!(
            instagram_profile("https://user@instagram.com/feelmybicep#top").as_deref(),
            Some("https://www.instagram.com/feelmybicep/")
        );
        assert_eq!(soundcloud_profile("ftp://soundcloud.com/bicep"), None);
        assert_eq!(soundcloud_profile("soundcloud.com/bicep"), None);
    }

    #[test]
    fn research_links_are_sanitized() {
        let mut links = SocialLinks::default();
        links.set(SocialPlatform::Soundcloud, "https://soundcloud.com/bicep/sets/isles");
        links.set(SocialPlatform::Twitter, "https://twitter.com/feelmybicep");
        let clean = sanitize(&links);
        assert_eq!(clean.get(SocialPlatform::Soundcloud), "");
        assert_eq!(clean.get(SocialPlatform::Twitter), "https://x.com/feelmybicep");
    }
}
