//! Research text handed to the content generator: either formatted from a
//! cached or synthesized result, or a degraded description built from the
//! catalog data alone.

use std::collections::HashSet;
use std::fmt::Write as _;

use roster_core::{ArtistCandidate, ResearchResult};

const LIST_LIMIT: usize = 5;
pub const NO_RESEARCH: &str = "Limited information available.";

/// The three searches run per artist: background, releases, live.
pub fn research_queries(candidate: &ArtistCandidate) -> [String; 3] {
    let genres = if candidate.genres.is_empty() {
        "electronic music".to_string()
    } else {
        candidate.genres.iter().take(2).cloned().collect::<Vec<_>>().join(" ")
    };
    let name = &candidate.display_name;
    [
        format!("{name} DJ producer {genres} biography nationality origin"),
        format!("{name} {genres} record labels releases discography"),
        format!("{name} festivals performances achievements collaborations"),
    ]
}

pub fn format_research(research: &ResearchResult) -> String {
    let mut out = String::new();
    if research.nationality.is_some() || research.origin.is_some() {
        let _ = write!(
            out,
            "Nationality/Origin: {}",
            research.nationality.as_deref().unwrap_or("Unknown")
        );
        if let Some(origin) = &research.origin {
            let _ = write!(out, " ({origin})");
        }
        out.push('\n');
    }
    if !research.labels.is_empty() {
        let labels: Vec<&str> = research.labels.iter().map(String::as_str).collect();
        let _ = writeln!(out, "Record Labels: {}", labels.join(", "));
    }
    if let Some(style) = &research.style {
        let _ = writeln!(out, "Musical Style: {style}");
    }
    if !research.collaborations.is_empty() {
        let collaborations: Vec<&str> = research
            .collaborations
            .iter()
            .take(LIST_LIMIT)
            .map(String::as_str)
            .collect();
        let _ = writeln!(out, "Notable Collaborations: {}", collaborations.join(", "));
    }
    if !research.festivals.is_empty() {
        let festivals: Vec<&str> = research
            .festivals
            .iter()
            .take(LIST_LIMIT)
            .map(String::as_str)
            .collect();
        let _ = writeln!(out, "Festivals/Performances: {}", festivals.join(", "));
    }
    if !research.achievements.is_empty() {
        out.push_str("Key Achievements:\n");
        for achievement in research.achievements.iter().take(LIST_LIMIT) {
            let _ = writeln!(out, "  • {achievement}");
        }
    }
    if let Some(bio) = &research.bio {
        let _ = writeln!(out, "\nBiography: {bio}");
    }
    if out.is_empty() {
        NO_RESEARCH.to_string()
    } else {
        out
    }
}

/// Genres with case-insensitive repeats removed, first spelling kept.
fn distinct_genres(genres: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    genres
        .iter()
        .map(|g| g.trim())
        .filter(|g| !g.is_empty())
        .filter(|g| seen.insert(g.to_lowercase()))
        .collect()
}

/// "a", "a and b", "a, b and c". Items are joined as given, so callers
/// pass distinct values.
pub fn join_phrase(items: &[&str], connector: &str) -> String {
    match items {
        [] => String::new(),
        [only] => (*only).to_string(),
        [init @ .., last] => format!("{} {connector} {last}", init.join(", ")),
    }
}

/// Research text used when web research is unavailable, built only from the
/// catalog's genres and popularity.
pub fn degraded_description(candidate: &ArtistCandidate) -> String {
    let genres = distinct_genres(&candidate.genres);
    let style = if genres.is_empty() {
        "electronic music".to_string()
    } else {
        join_phrase(&genres[..genres.len().min(3)], "and")
    };
    let recognition = if candidate.popularity > 60 {
        "a growing audience"
    } else if candidate.popularity > 30 {
        "a steady following"
    } else {
        "an underground following"
    };
    format!(
        "Musical Style: {name} plays {style}.\n\
         Artist Profile: {name} has {recognition} on streaming platforms \
         (popularity {popularity}/100).\n\
         No verified biography, labels or collaborations were found; do not invent any.",
        name = candidate.display_name,
        popularity = candidate.popularity,
    )
}
