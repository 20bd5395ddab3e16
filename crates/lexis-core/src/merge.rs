//! Merging duplicate entries into a single survivor.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::Utc;
use lexis_remote::{Entry, Example, Inflection, WriteOp, is_verb_class};
use serde::Serialize;

/// Heuristic ranking of how much content an entry carries.
pub fn completeness_score(entry: &Entry) -> usize {
    entry.examples.len()
        + entry.synonyms.len()
        + entry.antonyms.len()
        + entry.explanation.chars().count()
}

/// Compare two candidates for survival. `Greater` means `a` should be kept.
fn rank(a: &Entry, b: &Entry) -> Ordering {
    completeness_score(a)
        .cmp(&completeness_score(b))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| b.id.cmp(&a.id))
}

/// Pick the member that survives a merge.
///
/// An explicit keep id wins when it names a member. Otherwise the highest
/// completeness score wins, then the latest `created_at`, then the smallest
/// id.
pub fn select_kept<'a>(members: &'a [Entry], explicit_keep: Option<&str>) -> Option<&'a Entry> {
    if let Some(id) = explicit_keep {
        if let Some(entry) = members.iter().find(|e| e.id == id) {
            return Some(entry);
        }
    }
    members.iter().max_by(|a, b| rank(a, b))
}

fn union_strings<'a>(lists: impl IntoIterator<Item = &'a Vec<String>>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for item in lists.into_iter().flatten() {
        if seen.insert(item.as_str()) {
            merged.push(item.clone());
        }
    }
    merged
}

fn union_examples<'a>(lists: impl IntoIterator<Item = &'a Vec<Example>>) -> Vec<Example> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for list in lists {
        let mut sorted: Vec<&Example> = list.iter().collect();
        sorted.sort_by(|a, b| a.source.cmp(&b.source));
        for example in sorted {
            if seen.insert(example.source.trim().to_string()) {
                merged.push(example.clone());
            }
        }
    }
    merged
}

fn first_non_empty<'a>(kept: &'a str, others: impl IntoIterator<Item = &'a str>) -> &'a str {
    if !kept.trim().is_empty() {
        return kept;
    }
    others
        .into_iter()
        .find(|value| !value.trim().is_empty())
        .unwrap_or(kept)
}

/// Combine every member's content into the kept entry.
///
/// List fields are unioned with the kept entry's items first, then the other
/// members' in group order. Scalars keep the kept entry's value unless it is
/// blank. Verb forms survive only when the kept entry is a verb.
pub fn merge_members(kept: &Entry, members: &[Entry]) -> Entry {
    let others: Vec<&Entry> = members.iter().filter(|e| e.id != kept.id).collect();
    let ordered = || std::iter::once(kept).chain(others.iter().copied());

    let inflection = if is_verb_class(&kept.part_of_speech) {
        ordered()
            .find_map(|e| e.inflection.verb_forms().cloned())
            .map_or(Inflection::None, Inflection::Verb)
    } else {
        Inflection::None
    };

    Entry {
        synonyms: union_strings(ordered().map(|e| &e.synonyms)),
        antonyms: union_strings(ordered().map(|e| &e.antonyms)),
        related_words: union_strings(ordered().map(|e| &e.related_words)),
        examples: union_examples(ordered().map(|e| &e.examples)),
        explanation: first_non_empty(
            &kept.explanation,
            others.iter().map(|e| e.explanation.as_str()),
        )
        .to_string(),
        pronunciation: first_non_empty(
            &kept.pronunciation,
            others.iter().map(|e| e.pronunciation.as_str()),
        )
        .to_string(),
        inflection,
        ..kept.clone()
    }
}

fn sorted<T: Ord + Clone>(items: &[T]) -> Vec<T> {
    let mut items = items.to_vec();
    items.sort();
    items
}

/// Field-by-field content equality, ignoring list order and timestamps.
pub fn content_equal(a: &Entry, b: &Entry) -> bool {
    a.id == b.id
        && a.english == b.english
        && a.bangla == b.bangla
        && a.part_of_speech == b.part_of_speech
        && a.pronunciation == b.pronunciation
        && a.explanation == b.explanation
        && a.owner_id == b.owner_id
        && a.inflection == b.inflection
        && sorted(&a.synonyms) == sorted(&b.synonyms)
        && sorted(&a.antonyms) == sorted(&b.antonyms)
        && sorted(&a.related_words) == sorted(&b.related_words)
        && sorted(&a.examples) == sorted(&b.examples)
}

/// What a merge will do, before anything is written.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    /// The surviving entry with merged content.
    pub kept: Entry,
    /// Members to delete, in group order.
    pub deleted_ids: Vec<String>,
    /// Whether the survivor's content changed and must be written.
    pub needs_update: bool,
}

impl MergePlan {
    /// Writes that apply this plan: the survivor's put (if any) followed by
    /// the deletes.
    pub fn to_ops(&self, collection: &str) -> Vec<WriteOp> {
        let put = self
            .needs_update
            .then(|| WriteOp::put(collection, self.kept.clone()));
        put.into_iter()
            .chain(
                self.deleted_ids
                    .iter()
                    .map(|id| WriteOp::delete(collection, id.clone())),
            )
            .collect()
    }

    pub fn op_count(&self) -> usize {
        self.deleted_ids.len() + usize::from(self.needs_update)
    }

    pub fn into_result(self) -> MergeResult {
        MergeResult {
            kept: self.kept,
            deleted_ids: self.deleted_ids,
            updated: self.needs_update,
        }
    }
}

/// What a merge did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeResult {
    pub kept: Entry,
    pub deleted_ids: Vec<String>,
    pub updated: bool,
}

/// Plan the merge of a group of live members.
///
/// Returns `None` when fewer than two members remain.
pub fn plan_merge(members: &[Entry], explicit_keep: Option<&str>) -> Option<MergePlan> {
    if members.len() < 2 {
        return None;
    }
    let kept = select_kept(members, explicit_keep)?;
    let mut merged = merge_members(kept, members);
    let needs_update = !content_equal(&merged, kept);
    if needs_update {
        merged.updated_at = Utc::now();
    }

    Some(MergePlan {
        deleted_ids: members
            .iter()
            .filter(|e| e.id != kept.id)
            .map(|e| e.id.clone())
            .collect(),
        kept: merged,
        needs_update,
    })
}
