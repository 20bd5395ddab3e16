//! Stateful property testing for the sync policy.
//!
//! Uses proptest-state-machine to exercise staleness, offline fallback, and
//! cache clearing through the engine. The model tracks:
//!
//! - What the remote store holds and whether it is reachable
//! - What the cache holds and how long ago it was synced
//! - What the last collection read should have returned

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use proptest::prelude::*;
use proptest_state_machine::{ReferenceStateMachine, StateMachineTest, prop_state_machine};
use tokio::runtime::Runtime;

use lexis_core::{Engine, EngineConfig, LexisError, SyncMetadata};
use lexis_remote::{Entry, MemoryStore};

const COLLECTION: &str = "vocabularies";
const MAX_AGE_MINUTES: i64 = 15;

/// Operations that can be performed on the sync system.
#[derive(Debug, Clone)]
pub enum SyncOperation {
    /// Another client writes a document to the remote store.
    RemotePut { id: usize },
    /// The remote store goes offline or comes back.
    SetReachable(bool),
    /// Pretend the last sync happened this many minutes ago.
    Age { minutes: i64 },
    /// Read the whole collection through the engine.
    ReadAll,
    /// Drop the collection's cache and sync metadata.
    Clear,
}

/// What the last `ReadAll` should have produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadExpectation {
    Served { ids: BTreeSet<String>, degraded: bool },
    Unavailable,
}

/// Reference model for the sync system state.
#[derive(Clone, Debug)]
pub struct SyncModel {
    pub remote: BTreeSet<String>,
    pub cached: BTreeSet<String>,
    /// Minutes since the last successful sync, if any.
    pub synced_minutes_ago: Option<i64>,
    pub reachable: bool,
    pub last_read: Option<ReadExpectation>,
}

impl Default for SyncModel {
    fn default() -> Self {
        Self {
            remote: BTreeSet::new(),
            cached: BTreeSet::new(),
            synced_minutes_ago: None,
            reachable: true,
            last_read: None,
        }
    }
}

impl ReferenceStateMachine for SyncModel {
    type State = Self;
    type Transition = SyncOperation;

    fn init_state() -> BoxedStrategy<Self::State> {
        Just(Self::default()).boxed()
    }

    fn transitions(state: &Self::State) -> BoxedStrategy<Self::Transition> {
        let age = prop_oneof![Just(0i64), Just(5), Just(14), Just(16), Just(30), Just(240)];
        if state.synced_minutes_ago.is_some() {
            prop_oneof![
                3 => (0usize..10).prop_map(|id| SyncOperation::RemotePut { id }),
                2 => any::<bool>().prop_map(SyncOperation::SetReachable),
                2 => age.prop_map(|minutes| SyncOperation::Age { minutes }),
                4 => Just(SyncOperation::ReadAll),
                1 => Just(SyncOperation::Clear),
            ]
            .boxed()
        } else {
            // Aging only makes sense once something was synced
            prop_oneof![
                3 => (0usize..10).prop_map(|id| SyncOperation::RemotePut { id }),
                2 => any::<bool>().prop_map(SyncOperation::SetReachable),
                4 => Just(SyncOperation::ReadAll),
                1 => Just(SyncOperation::Clear),
            ]
            .boxed()
        }
    }

    fn preconditions(state: &Self::State, transition: &Self::Transition) -> bool {
        match transition {
            SyncOperation::Age { .. } => state.synced_minutes_ago.is_some(),
            _ => true,
        }
    }

    fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
        state.last_read = None;
        match transition {
            SyncOperation::RemotePut { id } => {
                state.remote.insert(format!("r{}", id));
            }
            SyncOperation::SetReachable(reachable) => state.reachable = *reachable,
            SyncOperation::Age { minutes } => state.synced_minutes_ago = Some(*minutes),
            SyncOperation::ReadAll => {
                let due = state
                    .synced_minutes_ago
                    .is_none_or(|minutes| minutes >= MAX_AGE_MINUTES);
                let expectation = if !due {
                    ReadExpectation::Served {
                        ids: state.cached.clone(),
                        degraded: false,
                    }
                } else if state.reachable {
                    state.cached = state.remote.clone();
                    state.synced_minutes_ago = Some(0);
                    ReadExpectation::Served {
                        ids: state.cached.clone(),
                        degraded: false,
                    }
                } else if state.synced_minutes_ago.is_none() && state.cached.is_empty() {
                    ReadExpectation::Unavailable
                } else {
                    ReadExpectation::Served {
                        ids: state.cached.clone(),
                        degraded: true,
                    }
                };
                state.last_read = Some(expectation);
            }
            SyncOperation::Clear => {
                state.cached.clear();
                state.synced_minutes_ago = None;
            }
        }
        state
    }
}

/// Test harness that wraps a real engine with a tokio runtime.
pub struct SyncTestHarness {
    runtime: Runtime,
    engine: Arc<Engine>,
    remote: Arc<MemoryStore>,
}

impl SyncTestHarness {
    fn new() -> Self {
        let runtime = Runtime::new().expect("Failed to create tokio runtime");
        let remote = Arc::new(MemoryStore::new());
        let config = EngineConfig::builder()
            .default_max_age_minutes(MAX_AGE_MINUTES as u64)
            .build();
        let engine = Engine::open(config, remote.clone()).expect("Failed to open engine");
        Self {
            runtime,
            engine,
            remote,
        }
    }

    fn apply_operation(&self, op: &SyncOperation, model: &SyncModel) {
        match op {
            SyncOperation::RemotePut { id } => {
                let id = format!("r{}", id);
                self.remote
                    .seed(COLLECTION, vec![Entry::new(id, "word", "শব্দ", "Noun")]);
            }
            SyncOperation::SetReachable(reachable) => self.remote.set_reachable(*reachable),
            SyncOperation::Age { minutes } => {
                let meta = SyncMetadata::new(COLLECTION, Utc::now() - Duration::minutes(*minutes));
                self.engine.cache().set_sync_metadata(&meta).unwrap();
            }
            SyncOperation::ReadAll => {
                let result = self.runtime.block_on(self.engine.read_all(COLLECTION));
                let actual = match result {
                    Ok(outcome) => ReadExpectation::Served {
                        ids: outcome.entries.into_iter().map(|e| e.id).collect(),
                        degraded: outcome.degraded,
                    },
                    Err(LexisError::DataUnavailable(_)) => ReadExpectation::Unavailable,
                    Err(e) => panic!("unexpected read error: {e}"),
                };
                assert_eq!(Some(actual), model.last_read, "read result diverged");
            }
            SyncOperation::Clear => {
                self.runtime
                    .block_on(self.engine.clear_collection(COLLECTION))
                    .unwrap();
            }
        }
    }

    fn verify_invariants(&self, model: &SyncModel) {
        // Invariant 1: cache contents match the model
        let cached = self.engine.cache().cached_ids(COLLECTION).unwrap();
        assert_eq!(cached, model.cached, "cache diverged from model");

        // Invariant 2: sync metadata exists exactly when the model synced
        let meta = self.engine.cache().sync_metadata(COLLECTION).unwrap();
        assert_eq!(
            meta.is_some(),
            model.synced_minutes_ago.is_some(),
            "sync metadata presence diverged"
        );

        // Invariant 3: the search index follows the cache
        assert!(self.engine.cache().index_agrees(COLLECTION).unwrap());
    }
}

impl StateMachineTest for SyncTestHarness {
    type SystemUnderTest = Self;
    type Reference = SyncModel;

    fn init_test(
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        Self::new()
    }

    fn apply(
        state: Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        state.apply_operation(&transition, ref_state);
        state.verify_invariants(ref_state);
        state
    }

    fn check_invariants(
        state: &Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        state.verify_invariants(ref_state);
    }
}

prop_state_machine! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 5000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn sync_state_machine_test(sequential 1..40 => SyncTestHarness);
}
