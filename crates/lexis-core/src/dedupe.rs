//! Duplicate detection over cached entries.

use std::collections::BTreeMap;

use lexis_remote::{Entry, normalize_key};
use serde::Serialize;

/// How confident the detector is that a group is one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    /// Same headword, meaning, and classification. Safe to merge.
    Exact,
    /// Same headword only. Needs a human decision.
    Fuzzy,
}

/// A cluster of entries sharing a normalized headword.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub kind: GroupKind,
    /// Normalized headword shared by every member.
    pub key: String,
    /// Members ordered by id. Never empty.
    pub members: Vec<Entry>,
    /// Why a fuzzy group was not exact. Empty for exact groups.
    pub reason: String,
}

impl DuplicateGroup {
    pub fn member_ids(&self) -> Vec<&str> {
        self.members.iter().map(|e| e.id.as_str()).collect()
    }

    pub fn is_exact(&self) -> bool {
        self.kind == GroupKind::Exact
    }
}

/// Group entries by normalized headword and classify each group of two or
/// more as exact or fuzzy.
///
/// Entries with a blank headword are never grouped. Groups come back sorted
/// by key.
pub fn detect_duplicates(entries: &[Entry]) -> Vec<DuplicateGroup> {
    let mut by_key: BTreeMap<String, Vec<&Entry>> = BTreeMap::new();
    for entry in entries {
        let key = entry.primary_key();
        if key.is_empty() {
            continue;
        }
        by_key.entry(key).or_default().push(entry);
    }

    by_key
        .into_iter()
        .filter(|(_, members)| members.len() >= 2)
        .map(|(key, members)| {
            let mut members: Vec<Entry> = members.into_iter().cloned().collect();
            members.sort_by(|a, b| a.id.cmp(&b.id));
            classify(key, members)
        })
        .collect()
}

fn classify(key: String, members: Vec<Entry>) -> DuplicateGroup {
    let first = &members[0];
    let meaning = first.bangla.trim();
    let class = normalize_key(&first.part_of_speech);

    let same_meaning = members.iter().all(|e| e.bangla.trim() == meaning);
    let same_class = members
        .iter()
        .all(|e| normalize_key(&e.part_of_speech) == class);

    let (kind, reason) = match (same_meaning, same_class) {
        (true, true) => (GroupKind::Exact, ""),
        (false, true) => (GroupKind::Fuzzy, "same word, different meaning"),
        (true, false) => (GroupKind::Fuzzy, "same word, different part of speech"),
        (false, false) => (
            GroupKind::Fuzzy,
            "same word, different meaning and part of speech",
        ),
    };

    DuplicateGroup {
        kind,
        key,
        members,
        reason: reason.to_string(),
    }
}
