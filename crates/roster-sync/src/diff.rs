//! Upstream vs. published catalog comparison.

use std::collections::HashSet;

use roster_core::{normalize, ArtistCandidate, PublishedArtist};
use serde::Serialize;
use strsim::jaro_winkler;

pub const DEFAULT_NEAR_MATCH_THRESHOLD: f64 = 0.92;

/// Every identity present in the published catalog, all locales merged.
#[derive(Debug, Clone, Default)]
pub struct PublishedIndex {
    identities: HashSet<String>,
}

impl PublishedIndex {
    pub fn build(published: &[PublishedArtist]) -> Self {
        Self {
            identities: published.iter().flat_map(PublishedArtist::identities).collect(),
        }
    }

    pub fn contains(&self, candidate: &ArtistCandidate) -> bool {
        candidate.is_resolvable() && self.identities.contains(&candidate.canonical_identity)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        let identity = normalize(name);
        !identity.is_empty() && self.identities.contains(&identity)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// A missing candidate that looks a lot like something already published.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearMatch {
    pub candidate: String,
    pub candidate_identity: String,
    pub published: String,
    pub published_identity: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogDiff {
    pub upstream_count: usize,
    pub published_count: usize,
    pub missing: Vec<ArtistCandidate>,
    pub near_matches: Vec<NearMatch>,
}

/// Candidates absent from the published catalog, in upstream order,
/// truncated to `max_artists`. Near matches are collected for review only.
pub fn compute_diff(
    candidates: &[ArtistCandidate],
    published: &[PublishedArtist],
    max_artists: Option<usize>,
    near_match_threshold: f64,
) -> CatalogDiff {
    let index = PublishedIndex::build(published);
    let mut missing: Vec<ArtistCandidate> = candidates
        .iter()
        .filter(|c| c.is_resolvable() && !index.contains(c))
        .cloned()
        .collect();
    if let Some(limit) = max_artists {
        missing.truncate(limit);
    }

    let published_names: Vec<(String, &str)> = published
        .iter()
        .map(|p| (normalize(&p.name), p.name.as_str()))
        .filter(|(identity, _)| !identity.is_empty())
        .collect();
    let near_matches = missing
        .iter()
        .filter_map(|candidate| {
            published_names
                .iter()
                .map(|(identity, name)| (jaro_winkler(&candidate.canonical_identity, identity), identity, name))
                .filter(|(score, _, _)| *score >= near_match_threshold)
                .max_by(|a, b| a.0.total_cmp(&b.0))
                .map(|(score, identity, name)| NearMatch {
                    candidate: candidate.display_name.clone(),
                    candidate_identity: candidate.canonical_identity.clone(),
                    published: (*name).to_string(),
                    published_identity: identity.clone(),
                    score,
                })
        })
        .collect();

    CatalogDiff {
        upstream_count: candidates.len(),
        published_count: published.len(),
        missing,
        near_matches,
    }
}
