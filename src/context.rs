// SPDX-License-Identifier: PMPL-1.0-or-later

//! Recovery context
//!
//! Owns everything a device's recovery flow shares between calls: the tracker,
//! rule and decoder catalogs, the persistent store, the datalog sink, and the
//! down-bin budget row. Tests and the CLI build one per session; nothing here
//! is process-wide.

use crate::datalog::{LogSink, MemorySink};
use crate::decoders::PinMapDecoder;
use crate::error::{RecoveryError, Result};
use crate::pinmap::{DecoderRegistry, PinMap};
use crate::rules::DefeatureRule;
use crate::storage::{KeyValueStore, MemoryStore, ResetPolicy, Scope};
use crate::tracker::DieRecoveryTracker;
use crate::types::{DownBinPolicy, TrackerDefinition};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Store key prefix for per-definition tracker state.
pub const TRACKER_DATA_PREFIX: &str = "__DieRecoveryTrackerData__!";
/// Store key of the down-bin budget counter.
pub const DOWN_BIN_BUDGET_KEY: &str = "__DieRecoveryGlobals__!DownBinBudget";

fn tracker_data_key(name: &str) -> String {
    format!("{}{}", TRACKER_DATA_PREFIX, name)
}

pub struct RecoveryContext<S = MemoryStore, L = MemorySink> {
    definitions: BTreeMap<String, TrackerDefinition>,
    rules: BTreeMap<String, DefeatureRule>,
    decoders: DecoderRegistry,
    store: S,
    sink: L,
}

impl RecoveryContext {
    /// Empty catalogs over a fresh [`MemoryStore`] and [`MemorySink`].
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new(), MemorySink::new())
    }
}

impl<S: KeyValueStore, L: LogSink> RecoveryContext<S, L> {
    pub fn new(store: S, sink: L) -> Self {
        Self {
            definitions: BTreeMap::new(),
            rules: BTreeMap::new(),
            decoders: DecoderRegistry::new(),
            store,
            sink,
        }
    }

    // ---- tracker catalog ----

    /// Add or replace a single definition without link validation.
    pub fn register_tracker(&mut self, definition: TrackerDefinition) {
        debug!(tracker = %definition.name, size = definition.size, "registering tracker");
        self.definitions.insert(definition.name.clone(), definition);
    }

    /// Register a batch of definitions, then require every link target to exist.
    pub fn load_trackers(&mut self, definitions: Vec<TrackerDefinition>) -> Result<()> {
        for definition in definitions {
            self.register_tracker(definition);
        }
        self.validate_links()
    }

    pub fn validate_links(&self) -> Result<()> {
        let mut missing = Vec::new();
        for definition in self.definitions.values() {
            for link in &definition.link_disable {
                if !self.definitions.contains_key(link) {
                    missing.push(format!("{} -> {}", definition.name, link));
                }
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RecoveryError::Configuration(format!(
                "unresolved link-disable targets: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn definition(&self, name: &str) -> Result<&TrackerDefinition> {
        self.definitions
            .get(name)
            .ok_or_else(|| RecoveryError::not_found("tracker", name))
    }

    pub fn definitions(&self) -> impl Iterator<Item = &TrackerDefinition> {
        self.definitions.values()
    }

    /// Handle over one or more comma-joined tracker names.
    pub fn tracker(&self, names: &str) -> Result<DieRecoveryTracker> {
        let definitions = names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| self.definition(name).cloned())
            .collect::<Result<Vec<_>>>()?;
        if definitions.is_empty() {
            return Err(RecoveryError::Argument(format!(
                "no tracker names in [{}]",
                names
            )));
        }
        Ok(DieRecoveryTracker::new(definitions))
    }

    // ---- rule and decoder catalogs ----

    pub fn register_rule(&mut self, rule: DefeatureRule) {
        debug!(rule = %rule.name, containers = rule.containers.len(), "registering rule");
        self.rules.insert(rule.name.clone(), rule);
    }

    pub fn rule(&self, name: &str) -> Result<&DefeatureRule> {
        self.rules
            .get(name)
            .ok_or_else(|| RecoveryError::not_found("rule", name))
    }

    pub fn rules(&self) -> impl Iterator<Item = &DefeatureRule> {
        self.rules.values()
    }

    pub fn register_decoder(&mut self, decoder: PinMapDecoder) {
        self.decoders.register(decoder);
    }

    pub fn decoders(&self) -> &DecoderRegistry {
        &self.decoders
    }

    /// Aggregator over comma-joined decoder names.
    pub fn pin_map(&self, names: &str) -> Result<PinMap> {
        PinMap::from_registry(names, &self.decoders)
    }

    // ---- collaborators ----

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn sink(&self) -> &L {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut L {
        &mut self.sink
    }

    pub fn into_parts(self) -> (S, L) {
        (self.store, self.sink)
    }

    // ---- down-bin budget ----

    pub fn configure_down_bins(&mut self, policy: DownBinPolicy) {
        info!(budget = policy.budget(), "configuring down-bin budget");
        self.store
            .put_int(DOWN_BIN_BUDGET_KEY, policy.budget(), Scope::Dut);
        self.store
            .set_reset_policy(DOWN_BIN_BUDGET_KEY, Scope::Dut, ResetPolicy::NeverReset);
    }

    /// Raw counter; `None` when no policy was configured.
    pub fn down_bin_budget(&self) -> Option<i64> {
        self.store.get_int(DOWN_BIN_BUDGET_KEY, Scope::Dut)
    }

    pub fn down_bins_allowed(&self) -> bool {
        !matches!(self.down_bin_budget(), Some(0))
    }

    /// Take one unit of budget for a broadening update.
    pub(crate) fn try_consume_down_bin(&mut self) -> bool {
        match self.down_bin_budget() {
            None => true,
            Some(remaining) if remaining < 0 => true,
            Some(0) => false,
            Some(remaining) => {
                self.store
                    .put_int(DOWN_BIN_BUDGET_KEY, remaining - 1, Scope::Dut);
                true
            }
        }
    }

    // ---- persisted tracker state ----

    pub fn has_tracker_data(&self, name: &str) -> bool {
        self.store.contains(&tracker_data_key(name), Scope::Dut)
    }

    pub fn tracker_data(&self, name: &str) -> Option<String> {
        self.store.get_string(&tracker_data_key(name), Scope::Dut)
    }

    pub(crate) fn store_tracker_data(&mut self, name: &str, value: String) {
        let key = tracker_data_key(name);
        self.store.put_string(&key, value, Scope::Dut);
        self.store
            .set_reset_policy(&key, Scope::Dut, ResetPolicy::NeverReset);
    }

    fn clear_tracker_data(&mut self, name: &str) {
        self.store.remove(&tracker_data_key(name), Scope::Dut);
    }

    /// Every tracker that has persisted state, with that state.
    pub fn trackers_with_data(&self) -> Vec<(String, String)> {
        self.store
            .keys_with_prefix(TRACKER_DATA_PREFIX, Scope::Dut)
            .into_iter()
            .filter_map(|key| {
                let value = self.store.get_string(&key, Scope::Dut)?;
                Some((key[TRACKER_DATA_PREFIX.len()..].to_string(), value))
            })
            .collect()
    }

    /// Copy `source`'s persisted state onto `destination`.
    ///
    /// An undefined destination is registered with the source's size and
    /// links. An untouched source leaves the destination untouched too.
    /// Copying a tracker onto itself does nothing.
    pub fn clone_tracker(&mut self, source: &str, destination: &str) -> Result<()> {
        if source == destination {
            debug!(tracker = %source, "clone onto itself skipped");
            return Ok(());
        }

        let definition = self.definition(source)?.clone();
        if !self.definitions.contains_key(destination) {
            self.register_tracker(TrackerDefinition {
                name: destination.to_string(),
                ..definition
            });
        }

        match self.tracker_data(source).filter(|value| !value.is_empty()) {
            Some(value) => {
                debug!(source = %source, destination = %destination, value = %value, "cloning tracker");
                self.store_tracker_data(destination, value);
            }
            None => {
                debug!(source = %source, destination = %destination, "source untouched, clearing destination");
                self.clear_tracker_data(destination);
            }
        }
        Ok(())
    }
}
