//! Known expectations, which of them are fulfilled, and who they trigger.
//!
//! # Design
//! - Expectations are keyed by id; upserting the same id replaces the definition
//!   and forgets a fulfilment recorded for a different definition.
//! - `dependsOnFullfilledIds` gates readiness; `triggerByFullfilledIds` is the
//!   reverse edge used to wake dependents when something becomes fulfilled.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ferry_core::{Expectation, ExpectationId, Reason};
use ferry_events::{Event, EventBus};
use indexmap::IndexMap;
use tracing::debug;

/// Shared registry of expectations handed to a worker.
#[derive(Clone)]
pub struct ExpectationRegistry {
    state: Arc<Mutex<RegistryState>>,
    events: EventBus,
}

#[derive(Default)]
struct RegistryState {
    expectations: IndexMap<ExpectationId, Expectation>,
    fulfilled: HashSet<ExpectationId>,
}

impl std::fmt::Debug for ExpectationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ExpectationRegistry")
            .field("expectations", &state.expectations.len())
            .field("fulfilled", &state.fulfilled.len())
            .finish()
    }
}

impl ExpectationRegistry {
    /// Empty registry publishing trigger notifications on `events`.
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace an expectation, returning the previous definition.
    pub fn upsert(&self, expectation: Expectation) -> Option<Expectation> {
        let mut state = self.lock();
        let id = expectation.id.clone();
        let previous = state.expectations.insert(id.clone(), expectation);
        let changed = previous
            .as_ref()
            .is_some_and(|previous| Some(previous) != state.expectations.get(&id));
        if changed {
            state.fulfilled.remove(&id);
        }
        previous
    }

    /// Stored definition for `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Expectation> {
        self.lock().expectations.get(id).cloned()
    }

    /// Forget an expectation and its fulfilment.
    pub fn remove(&self, id: &str) -> Option<Expectation> {
        let mut state = self.lock();
        state.fulfilled.remove(id);
        state.expectations.shift_remove(id)
    }

    /// Number of registered expectations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().expectations.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().expectations.is_empty()
    }

    /// Whether `id` was last reported fulfilled.
    #[must_use]
    pub fn is_fulfilled(&self, id: &str) -> bool {
        self.lock().fulfilled.contains(id)
    }

    /// Check that every expectation `expectation` depends on is fulfilled.
    ///
    /// # Errors
    ///
    /// Names the dependencies that are still outstanding.
    pub fn dependencies_fulfilled(&self, expectation: &Expectation) -> Result<(), Reason> {
        let state = self.lock();
        let waiting: Vec<&str> = expectation
            .depends_on_fullfilled_ids
            .iter()
            .filter(|id| !state.fulfilled.contains(*id))
            .map(String::as_str)
            .collect();
        if waiting.is_empty() {
            return Ok(());
        }
        Err(Reason::new(
            "Waiting for dependencies",
            format!("Waiting for dependencies: {}", waiting.join(", ")),
        ))
    }

    /// Record `id` as fulfilled and return the expectations it triggers.
    ///
    /// Triggers are only reported, and published, on the transition to fulfilled.
    pub fn mark_fulfilled(&self, id: &str) -> Vec<ExpectationId> {
        let triggered = {
            let mut state = self.lock();
            if !state.fulfilled.insert(id.to_string()) {
                return Vec::new();
            }
            state
                .expectations
                .values()
                .filter(|candidate| candidate.trigger_by_fullfilled_ids.iter().any(|other| other == id))
                .map(|candidate| candidate.id.clone())
                .collect::<Vec<_>>()
        };
        if !triggered.is_empty() {
            debug!(expectation_id = %id, triggered = ?triggered, "fulfilment triggers dependents");
            self.events.publish(Event::ExpectationTriggered {
                fulfilled_id: id.to_string(),
                triggered_ids: triggered.clone(),
            });
        }
        triggered
    }

    /// Record `id` as not fulfilled. Returns whether it was fulfilled before.
    pub fn mark_unfulfilled(&self, id: &str) -> bool {
        self.lock().fulfilled.remove(id)
    }
}
