//! In-memory inverted index over cached entries.
//!
//! The index is derived data: it is rebuilt from the record store at open and
//! kept current by the cache on every mutation. It is never persisted.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use lexis_remote::Entry;
use regex::Regex;

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Combining marks keep Bengali vowel signs inside their word.
    RE.get_or_init(|| Regex::new(r"[\w\p{M}]+").unwrap())
}

/// Split text into lowercase search tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    token_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Every token an entry contributes to the index.
pub fn entry_tokens(entry: &Entry) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    let scalars = [&entry.english, &entry.bangla, &entry.explanation];
    let bags = entry
        .synonyms
        .iter()
        .chain(&entry.antonyms)
        .chain(&entry.related_words);
    for text in scalars.into_iter().chain(bags) {
        tokens.extend(tokenize(text));
    }
    tokens
}

#[derive(Debug, Default)]
struct CollectionIndex {
    postings: BTreeMap<String, BTreeSet<String>>,
    docs: HashMap<String, BTreeSet<String>>,
}

impl CollectionIndex {
    fn insert(&mut self, id: &str, tokens: BTreeSet<String>) {
        self.remove(id);
        for token in &tokens {
            self.postings
                .entry(token.clone())
                .or_default()
                .insert(id.to_string());
        }
        self.docs.insert(id.to_string(), tokens);
    }

    fn remove(&mut self, id: &str) -> bool {
        let Some(tokens) = self.docs.remove(id) else {
            return false;
        };
        for token in tokens {
            if let Some(ids) = self.postings.get_mut(&token) {
                ids.remove(id);
                if ids.is_empty() {
                    self.postings.remove(&token);
                }
            }
        }
        true
    }

    fn matching_exact(&self, token: &str) -> BTreeSet<&str> {
        self.postings
            .get(token)
            .map(|ids| ids.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    fn matching_prefix(&self, prefix: &str) -> BTreeSet<&str> {
        self.postings
            .range(prefix.to_string()..)
            .take_while(|(token, _)| token.starts_with(prefix))
            .flat_map(|(_, ids)| ids.iter().map(String::as_str))
            .collect()
    }
}

/// Token index for every cached collection.
#[derive(Debug, Default)]
pub struct SearchIndex {
    collections: HashMap<String, CollectionIndex>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index an entry, replacing any previous tokens for its id.
    pub fn add(&mut self, collection: &str, entry: &Entry) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(&entry.id, entry_tokens(entry));
    }

    /// Re-index an entry. Same as [`add`](Self::add).
    pub fn update(&mut self, collection: &str, entry: &Entry) {
        self.add(collection, entry);
    }

    /// Remove one id. Returns whether it was present.
    pub fn remove(&mut self, collection: &str, id: &str) -> bool {
        self.collections
            .get_mut(collection)
            .is_some_and(|index| index.remove(id))
    }

    /// Remove several ids.
    pub fn remove_all<'a>(&mut self, collection: &str, ids: impl IntoIterator<Item = &'a str>) {
        if let Some(index) = self.collections.get_mut(collection) {
            for id in ids {
                index.remove(id);
            }
        }
    }

    /// Drop a collection's index.
    pub fn clear(&mut self, collection: &str) {
        self.collections.remove(collection);
    }

    /// Rebuild a collection's index from scratch.
    pub fn rebuild<'a>(&mut self, collection: &str, entries: impl IntoIterator<Item = &'a Entry>) {
        let mut index = CollectionIndex::default();
        for entry in entries {
            index.insert(&entry.id, entry_tokens(entry));
        }
        self.collections.insert(collection.to_string(), index);
    }

    pub fn contains(&self, collection: &str, id: &str) -> bool {
        self.collections
            .get(collection)
            .is_some_and(|index| index.docs.contains_key(id))
    }

    /// Every indexed id in a collection.
    pub fn ids(&self, collection: &str) -> BTreeSet<String> {
        self.collections
            .get(collection)
            .map(|index| index.docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of indexed documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map_or(0, |index| index.docs.len())
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Ids matching a free-text query, best first.
    ///
    /// Ids are ranked by how many distinct query tokens they match; the last
    /// query token also matches as a prefix, so partially typed words find
    /// results. Ties are broken by id.
    pub fn search(&self, collection: &str, query: &str, limit: usize) -> Vec<String> {
        let Some(index) = self.collections.get(collection) else {
            return Vec::new();
        };

        let mut tokens = tokenize(query);
        let Some(last) = tokens.pop() else {
            return Vec::new();
        };
        let earlier: BTreeSet<String> = tokens.into_iter().filter(|t| *t != last).collect();

        let mut scores: HashMap<&str, usize> = HashMap::new();
        for token in &earlier {
            for id in index.matching_exact(token) {
                *scores.entry(id).or_default() += 1;
            }
        }
        for id in index.matching_prefix(&last) {
            *scores.entry(id).or_default() += 1;
        }

        let mut ranked: Vec<(&str, usize)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
            .into_iter()
            .take(limit)
            .map(|(id, _)| id.to_string())
            .collect()
    }
}
