//! Duplicate audit over the published catalog. Reports only; nothing is
//! deleted from here.

use std::collections::BTreeMap;

use roster_core::{normalize, Locale, PublishedArtist};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub identity: String,
    pub locale: Locale,
    pub names: Vec<String>,
    /// Oldest record, the one an operator should keep.
    pub keep_id: Option<u64>,
    pub duplicate_ids: Vec<u64>,
}

/// Groups records by (identity of the display name, locale) and returns
/// every group holding more than one record, oldest id first.
pub fn audit_duplicates(published: &[PublishedArtist]) -> Vec<DuplicateGroup> {
    let mut groups: BTreeMap<(String, Locale), Vec<&PublishedArtist>> = BTreeMap::new();
    for record in published {
        let identity = normalize(&record.name);
        if identity.is_empty() {
            continue;
        }
        groups.entry((identity, record.locale)).or_default().push(record);
    }

    groups
        .into_iter()
        .filter(|(_, records)| records.len() > 1)
        .map(|((identity, locale), mut records)| {
            // Records without an id sort last.
            records.sort_by_key(|r| r.id.unwrap_or(u64::MAX));
            let keep_id = records.first().and_then(|r| r.id);
            DuplicateGroup {
                identity,
                locale,
                names: records.iter().map(|r| r.name.clone()).collect(),
                keep_id,
                duplicate_ids: records.iter().skip(1).filter_map(|r| r.id).collect(),
            }
        })
        .collect()
}
