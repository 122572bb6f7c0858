//! Catalog rules from `rules/catalog.yaml`.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use roster_core::{normalize, ArtistCandidate};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Deserialize)]
struct CatalogRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    excluded_artists: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogRules {
    excluded: HashSet<String>,
}

/// What `CatalogRules::apply` removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOutcome {
    pub excluded: usize,
    pub duplicates: usize,
    pub unresolvable: Vec<String>,
}

impl CatalogRules {
    pub fn new<I, S>(excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            excluded: excluded
                .into_iter()
                .map(|name| normalize(name.as_ref()))
                .filter(|identity| !identity.is_empty())
                .collect(),
        }
    }

    pub fn from_workspace_root(root: &Path) -> Result<Self> {
        let path = root.join("rules").join("catalog.yaml");
        let text = std::fs::read_to_string(&path).context("reading rules/catalog.yaml")?;
        let file: CatalogRulesFile =
            serde_yaml::from_str(&text).context("parsing rules/catalog.yaml")?;
        Ok(Self::new(file.excluded_artists))
    }

    /// Missing rules file means no exclusions.
    pub fn from_workspace_root_or_default(root: &Path) -> Result<Self> {
        if root.join("rules").join("catalog.yaml").exists() {
            Self::from_workspace_root(root)
        } else {
            debug!(root = %root.display(), "no rules/catalog.yaml; nothing excluded");
            Ok(Self::default())
        }
    }

    pub fn is_excluded(&self, candidate: &ArtistCandidate) -> bool {
        self.excluded.contains(&candidate.canonical_identity)
    }

    /// Drops excluded and unresolvable candidates and keeps only the first
    /// candidate per identity, preserving upstream order.
    pub fn apply(&self, candidates: Vec<ArtistCandidate>) -> (Vec<ArtistCandidate>, RuleOutcome) {
        let mut outcome = RuleOutcome::default();
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !candidate.is_resolvable() {
                warn!(name = %candidate.display_name, "candidate name has no canonical identity; skipped");
                outcome.unresolvable.push(candidate.display_name);
                continue;
            }
            if self.is_excluded(&candidate) {
                outcome.excluded += 1;
                continue;
            }
            if !seen.insert(candidate.canonical_identity.clone()) {
                outcome.duplicates += 1;
                continue;
            }
            kept.push(candidate);
        }
        (kept, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusions_match_spelling_variants() {
        let rules = CatalogRules::new(["Gaz & Co", "TANKYU"]);
        let candidates = vec![
            ArtistCandidate::new("1", "gaz & co"),
            ArtistCandidate::new("2", "Tankyu"),
            ArtistCandidate::new("3", "Bicep"),
        ];
        let (kept, outcome) = rules.apply(candidates);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].display_name, "Bicep");
        assert_eq!(outcome.excluded, 2);
    }

    #[test]
    fn first_spelling_wins_and_symbols_are_dropped() {
        let candidates = vec![
            ArtistCandidate::new("1", "Rhi'N'B"),
            ArtistCandidate::new("2", "!!!"),
            ArtistCandidate::new("3", "Rhi N B"),
            ArtistCandidate::new("4", "Café Tacvba"),
        ];
        let (kept, outcome) = CatalogRules::default().apply(candidates);
        let names: Vec<_> = kept.iter().map(|c| c.display_name.as_str()).collect();
        assert_eq!(names, vec!["Rhi'N'B", "Café Tacvba"]);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.unresolvable, vec!["!!!".to_string()]);
    }

    #[test]
    fn rules_file_loads_from_workspace_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("rules")).unwrap();
        std::fs::write(
            dir.path().join("rules/catalog.yaml"),
            "version: 1\nexcluded_artists:\n  - Agent Zed\n",
        )
        .unwrap();
        let rules = CatalogRules::from_workspace_root(dir.path()).unwrap();
        assert!(rules.is_excluded(&ArtistCandidate::new("1", "AGENT ZED")));

        let empty = tempfile::tempdir().expect("tempdir");
        let none = CatalogRules::from_workspace_root_or_default(empty.path()).unwrap();
        assert!(!none.is_excluded(&ArtistCandidate::new("1", "Agent Zed")));
    }
}
