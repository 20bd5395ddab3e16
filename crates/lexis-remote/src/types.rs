//! Core types for documents held by the remote store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification tag for which verb forms are meaningful.
pub const VERB_CLASSIFICATION: &str = "Verb";

/// Check whether a classification tag names the verb class.
pub fn is_verb_class(tag: &str) -> bool {
    tag.trim().eq_ignore_ascii_case(VERB_CLASSIFICATION)
}

/// A usage example and its translation.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Example {
    /// Example sentence in the source language.
    #[serde(default)]
    pub source: String,
    /// Translation of the example sentence.
    #[serde(default)]
    pub translation: String,
}

impl Example {
    pub fn new(source: impl Into<String>, translation: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            translation: translation.into(),
        }
    }
}

/// Conjugated forms of a verb.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerbForms {
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub past: String,
    #[serde(default)]
    pub past_participle: String,
    #[serde(default)]
    pub present_participle: String,
    #[serde(default)]
    pub third_person_singular: String,
}

/// Inflection data attached to an entry.
///
/// Only verbs carry forms; every other classification is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Inflection {
    #[default]
    None,
    Verb(VerbForms),
}

impl Inflection {
    pub fn is_none(&self) -> bool {
        matches!(self, Inflection::None)
    }

    /// The verb forms, if any.
    pub fn verb_forms(&self) -> Option<&VerbForms> {
        match self {
            Inflection::Verb(forms) => Some(forms),
            Inflection::None => None,
        }
    }
}

/// Stored as an optional `verbForms` object on the wire.
mod inflection_serde {
    use super::{Inflection, VerbForms};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Inflection, serializer: S) -> Result<S::Ok, S::Error> {
        value.verb_forms().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Inflection, D::Error> {
        Ok(match Option::<VerbForms>::deserialize(deserializer)? {
            Some(forms) => Inflection::Verb(forms),
            None => Inflection::None,
        })
    }
}

/// A vocabulary or resource entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Opaque document id. Blank for entries not yet stored.
    #[serde(default)]
    pub id: String,
    /// Primary key (headword).
    #[serde(default)]
    pub english: String,
    /// Secondary key (meaning).
    #[serde(default)]
    pub bangla: String,
    /// Classification tag (part of speech).
    #[serde(default)]
    pub part_of_speech: String,
    #[serde(default)]
    pub pronunciation: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub antonyms: Vec<String>,
    #[serde(default)]
    pub related_words: Vec<String>,
    #[serde(default)]
    pub examples: Vec<Example>,
    #[serde(
        default,
        rename = "verbForms",
        with = "inflection_serde",
        skip_serializing_if = "Inflection::is_none"
    )]
    pub inflection: Inflection,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub owner_id: String,
}

impl Entry {
    /// Create an entry stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        english: impl Into<String>,
        bangla: impl Into<String>,
        part_of_speech: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            english: english.into(),
            bangla: bangla.into(),
            part_of_speech: part_of_speech.into(),
            created_at: now,
            updated_at: now,
            ..Default::default()
        }
    }

    /// Normalized primary key: trimmed and case-folded.
    pub fn primary_key(&self) -> String {
        normalize_key(&self.english)
    }

    /// Drop inflection data that does not apply to this entry's classification.
    pub fn normalized(mut self) -> Self {
        if !is_verb_class(&self.part_of_speech) {
            self.inflection = Inflection::None;
        }
        self
    }
}

/// Trim and case-fold a key for comparison.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

/// A single write in an atomic batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum WriteOp {
    /// Full-document put. Idempotent.
    Put {
        collection: String,
        #[serde(rename = "document")]
        entry: Entry,
    },
    /// Delete by id. Idempotent.
    Delete { collection: String, id: String },
}

impl WriteOp {
    pub fn put(collection: impl Into<String>, entry: Entry) -> Self {
        WriteOp::Put {
            collection: collection.into(),
            entry,
        }
    }

    pub fn delete(collection: impl Into<String>, id: impl Into<String>) -> Self {
        WriteOp::Delete {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Collection this operation targets.
    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Put { collection, .. } | WriteOp::Delete { collection, .. } => collection,
        }
    }

    /// Id of the document this operation targets.
    pub fn id(&self) -> &str {
        match self {
            WriteOp::Put { entry, .. } => &entry.id,
            WriteOp::Delete { id, .. } => id,
        }
    }
}

/// One page of a collection listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDocumentsResponse {
    #[serde(default)]
    pub documents: Vec<Entry>,
    pub next_page_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_arrays_deserialize_empty() {
        let entry: Entry =
            serde_json::from_str(r#"{"id":"a","english":"run","bangla":"দৌড়ানো"}"#).unwrap();
        assert!(entry.synonyms.is_empty());
        assert!(entry.antonyms.is_empty());
        assert!(entry.related_words.is_empty());
        assert!(entry.examples.is_empty());
        assert_eq!(entry.inflection, Inflection::None);
    }

    #[test]
    fn test_verb_forms_wire_format() {
        let json = r#"{"id":"a","english":"run","partOfSpeech":"Verb",
            "verbForms":{"base":"run","past":"ran","pastParticiple":"run"}}"#;
        let entry: Entry = serde_json::from_str(json).unwrap();
        let forms = entry.inflection.verb_forms().unwrap();
        assert_eq!(forms.past, "ran");
        assert_eq!(forms.present_participle, "");

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["verbForms"]["past"], "ran");
    }

    #[test]
    fn test_none_inflection_omitted() {
        let entry = Entry::new("a", "bank", "ব্যাংক", "Noun");
        let value = serde_json::to_value(&entry).unwrap();
        assert!(value.get("verbForms").is_none());
    }

    #[test]
    fn test_normalized_clears_non_verb_forms() {
        let mut entry = Entry::new("a", "run", "দৌড়", "Noun");
        entry.inflection = Inflection::Verb(VerbForms::default());
        assert_eq!(entry.normalized().inflection, Inflection::None);

        let mut verb = Entry::new("b", "run", "দৌড়ানো", "verb");
        verb.inflection = Inflection::Verb(VerbForms::default());
        assert!(verb.normalized().inflection.verb_forms().is_some());
    }

    #[test]
    fn test_primary_key_normalization() {
        let entry = Entry::new("a", "  Run ", "", "");
        assert_eq!(entry.primary_key(), "run");
    }

    #[test]
    fn test_write_op_wire_format() {
        let op = WriteOp::delete("vocabularies", "x1");
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["op"], "delete");
        assert_eq!(value["id"], "x1");

        let op = WriteOp::put("vocabularies", Entry::new("x2", "go", "যাওয়া", "Verb"));
        assert_eq!(op.id(), "x2");
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["op"], "put");
        assert_eq!(value["document"]["english"], "go");
    }

    proptest::proptest! {
        #[test]
        fn normalize_key_is_idempotent(key in "\\PC{0,24}") {
            let once = normalize_key(&key);
            proptest::prop_assert_eq!(normalize_key(&once), once.clone());
            proptest::prop_assert_eq!(once.trim(), once.as_str());
        }
    }
}
