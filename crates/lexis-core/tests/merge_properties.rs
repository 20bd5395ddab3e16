//! Property tests for merge planning.

use std::collections::BTreeSet;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use lexis_core::{completeness_score, content_equal, plan_merge};
use lexis_remote::{Entry, Example};

const SYNONYMS: &[&str] = &["sprint", "dash", "race", "jog", "hurry", "bolt"];
const SOURCES: &[&str] = &["I run.", " I run. ", "We ran home.", "Run!", "She runs daily."];

fn member_strategy() -> impl Strategy<Value = Shape> {
    (
        prop::collection::vec(0..SYNONYMS.len(), 0..4),
        prop::collection::vec(0..SOURCES.len(), 0..3),
        0i64..3,
        any::<bool>(),
    )
}

type Shape = (Vec<usize>, Vec<usize>, i64, bool);

fn build(index: usize, (synonyms, sources, day, explained): Shape) -> Entry {
    let mut entry = Entry::new(format!("m{index}"), "run", "দৌড়ানো", "Verb");
    entry.created_at =
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(day);
    entry.updated_at = entry.created_at;
    entry.synonyms = synonyms.into_iter().map(|i| SYNONYMS[i].to_string()).collect();
    entry.examples = sources
        .into_iter()
        .map(|i| Example::new(SOURCES[i], "অনুবাদ"))
        .collect();
    if explained {
        entry.explanation = "to move fast on foot".to_string();
    }
    entry
}

fn group_strategy() -> impl Strategy<Value = Vec<Entry>> {
    prop::collection::vec(member_strategy(), 2..6).prop_map(|shapes| {
        shapes
            .into_iter()
            .enumerate()
            .map(|(i, shape)| build(i, shape))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn merged_lists_are_the_union_of_members(members in group_strategy()) {
        let plan = plan_merge(&members, None).unwrap();

        let expected: BTreeSet<&str> = members
            .iter()
            .flat_map(|e| e.synonyms.iter().map(String::as_str))
            .collect();
        let merged: BTreeSet<&str> = plan.kept.synonyms.iter().map(String::as_str).collect();
        prop_assert_eq!(&merged, &expected);
        prop_assert_eq!(plan.kept.synonyms.len(), merged.len());

        let sources: BTreeSet<&str> = members
            .iter()
            .flat_map(|e| e.examples.iter().map(|x| x.source.trim()))
            .collect();
        let merged_sources: BTreeSet<&str> =
            plan.kept.examples.iter().map(|x| x.source.trim()).collect();
        prop_assert_eq!(&merged_sources, &sources);
        prop_assert_eq!(plan.kept.examples.len(), sources.len());
    }

    #[test]
    fn survivor_does_not_depend_on_member_order(members in group_strategy(), rotate in 0usize..6) {
        let forward = plan_merge(&members, None).unwrap();

        let mut reordered = members.clone();
        reordered.reverse();
        let shift = rotate % reordered.len();
        reordered.rotate_left(shift);
        let shuffled = plan_merge(&reordered, None).unwrap();

        prop_assert_eq!(&forward.kept.id, &shuffled.kept.id);
        let a: BTreeSet<&String> = forward.deleted_ids.iter().collect();
        let b: BTreeSet<&String> = shuffled.deleted_ids.iter().collect();
        prop_assert_eq!(a, b);

        let best = members.iter().map(completeness_score).max().unwrap();
        let kept = members.iter().find(|e| e.id == forward.kept.id).unwrap();
        prop_assert_eq!(completeness_score(kept), best);
    }

    #[test]
    fn explicit_keep_always_survives(members in group_strategy(), pick in 0usize..6) {
        let chosen = members[pick % members.len()].id.clone();
        let plan = plan_merge(&members, Some(&chosen)).unwrap();
        prop_assert_eq!(&plan.kept.id, &chosen);
        prop_assert!(!plan.deleted_ids.contains(&chosen));
        prop_assert_eq!(plan.deleted_ids.len(), members.len() - 1);
    }

    #[test]
    fn identical_members_need_no_update(
        synonyms in prop::collection::btree_set(0..SYNONYMS.len(), 0..4),
        sources in prop::collection::btree_set(0usize..SOURCES.len(), 0..3),
        copies in 2usize..5,
    ) {
        // Sources 0 and 1 trim to the same sentence.
        let sources: Vec<usize> = sources.into_iter().filter(|&i| i != 1).collect();
        let shape = (synonyms.into_iter().collect::<Vec<_>>(), sources, 0i64, true);
        let members: Vec<Entry> = (0..copies).map(|i| build(i, shape.clone())).collect();

        let plan = plan_merge(&members, None).unwrap();
        prop_assert!(!plan.needs_update);
        prop_assert_eq!(plan.op_count(), copies - 1);
        let kept = members.iter().find(|e| e.id == plan.kept.id).unwrap();
        prop_assert!(content_equal(&plan.kept, kept));
        prop_assert_eq!(plan.to_ops("vocabularies").len(), copies - 1);
    }
}
