// SPDX-License-Identifier: PMPL-1.0-or-later

//! Die recovery tracker
//!
//! A handle over one or more tracker definitions whose persisted states are
//! read and written as one concatenated vector.

mod resolver;
mod update;

pub use resolver::resolve_input;
pub use update::UpdateRequest;

use crate::context::RecoveryContext;
use crate::datalog::{LogSink, TrackerLogRecord};
use crate::error::{RecoveryError, Result};
use crate::rules::RuleMatch;
use crate::storage::KeyValueStore;
use crate::types::{BitVector, InputType, TrackerDefinition};
use serde::Serialize;

/// Lifecycle of a tracker's persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackerState {
    /// No update has been persisted yet.
    Untouched,
    Clean,
    Partial,
    FullyFailed,
}

impl TrackerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerState::Untouched => "Untouched",
            TrackerState::Clean => "Clean",
            TrackerState::Partial => "Partial",
            TrackerState::FullyFailed => "FullyFailed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DieRecoveryTracker {
    definitions: Vec<TrackerDefinition>,
    size: usize,
}

impl DieRecoveryTracker {
    pub fn new(definitions: Vec<TrackerDefinition>) -> Self {
        let size = definitions.iter().map(|d| d.size).sum();
        Self { definitions, size }
    }

    pub fn definitions(&self) -> &[TrackerDefinition] {
        &self.definitions
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Definition names joined with `|`, as written to the datalog.
    pub fn names(&self) -> String {
        self.definitions
            .iter()
            .map(|d| d.name.as_str())
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Concatenated initial values of every definition.
    pub fn reset_value(&self) -> String {
        self.definitions
            .iter()
            .map(TrackerDefinition::initial_value)
            .collect()
    }

    /// Persisted state, or `None` if any definition was never written.
    pub fn stored_bits<S: KeyValueStore, L: LogSink>(
        &self,
        ctx: &RecoveryContext<S, L>,
    ) -> Result<Option<BitVector>> {
        let parts: Option<Vec<BitVector>> = self.stored_parts(ctx)?.into_iter().collect();
        Ok(parts.map(|parts| BitVector::concat(parts.iter())))
    }

    /// Persisted state of each definition, in handle order.
    fn stored_parts<S: KeyValueStore, L: LogSink>(
        &self,
        ctx: &RecoveryContext<S, L>,
    ) -> Result<Vec<Option<BitVector>>> {
        let mut parts = Vec::with_capacity(self.definitions.len());
        for definition in &self.definitions {
            let part = match ctx.tracker_data(&definition.name) {
                Some(value) => {
                    let bits = BitVector::parse(&value)?;
                    if bits.len() != definition.size {
                        return Err(RecoveryError::wrong_size(
                            format!("tracker [{}] persisted state", definition.name),
                            definition.size,
                            bits.len(),
                        ));
                    }
                    Some(bits)
                }
                None => None,
            };
            parts.push(part);
        }
        Ok(parts)
    }

    /// Current persisted state.
    pub fn mask_bits<S: KeyValueStore, L: LogSink>(
        &self,
        ctx: &RecoveryContext<S, L>,
    ) -> Result<BitVector> {
        self.stored_bits(ctx)?.ok_or_else(|| {
            RecoveryError::not_found("initialized tracker data", self.names())
        })
    }

    /// Resolve an ad-hoc source without touching persisted state.
    ///
    /// Every character other than `1` reads as a passing bit.
    pub fn mask_bits_from<S: KeyValueStore, L: LogSink>(
        &self,
        ctx: &RecoveryContext<S, L>,
        input_type: InputType,
        token: &str,
    ) -> Result<BitVector> {
        let raw = resolve_input(input_type, token, ctx.store())?;
        Ok(BitVector::from_mask_str(&raw))
    }

    pub fn state<S: KeyValueStore, L: LogSink>(
        &self,
        ctx: &RecoveryContext<S, L>,
    ) -> Result<TrackerState> {
        Ok(match self.stored_bits(ctx)? {
            None => TrackerState::Untouched,
            Some(bits) if bits.all_set() && !bits.is_empty() => TrackerState::FullyFailed,
            Some(bits) if bits.any_set() => TrackerState::Partial,
            Some(_) => TrackerState::Clean,
        })
    }

    /// Run `rule` against the tracker's current state.
    pub fn run_rule<S: KeyValueStore, L: LogSink>(
        &self,
        ctx: &RecoveryContext<S, L>,
        rule: &str,
    ) -> Result<Vec<RuleMatch>> {
        let bits = self.mask_bits(ctx)?;
        Self::run_rule_on(ctx, &bits, rule)
    }

    /// Run `rule` against explicit bits.
    pub fn run_rule_on<S: KeyValueStore, L: LogSink>(
        ctx: &RecoveryContext<S, L>,
        bits: &BitVector,
        rule: &str,
    ) -> Result<Vec<RuleMatch>> {
        ctx.rule(rule)?.passing_configurations(bits)
    }

    /// Datalog the current state without updating it.
    pub fn log_tracking_structure<S: KeyValueStore, L: LogSink>(
        &self,
        ctx: &mut RecoveryContext<S, L>,
        mask: &BitVector,
        result: &BitVector,
    ) -> Result<()> {
        let current = self.mask_bits(ctx)?;
        self.write_record(ctx, mask.clone(), result.clone(), current.clone(), current);
        Ok(())
    }

    fn write_record<S: KeyValueStore, L: LogSink>(
        &self,
        ctx: &mut RecoveryContext<S, L>,
        mask: BitVector,
        result: BitVector,
        incoming: BitVector,
        outgoing: BitVector,
    ) {
        let record = TrackerLogRecord::new(self.names(), mask, result, incoming, outgoing);
        ctx.sink_mut().write(record);
    }

    fn check_width(&self, bits: &BitVector, what: &str) -> Result<()> {
        if bits.len() != self.size {
            return Err(RecoveryError::wrong_size(
                format!("tracker [{}] {}", self.names(), what),
                self.size,
                bits.len(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{DefeatureRule, RuleMode, RuleType};
    use crate::storage::Scope;

    fn context() -> RecoveryContext {
        let mut ctx = RecoveryContext::in_memory();
        ctx.register_tracker(TrackerDefinition::new("A", 2));
        let mut b = TrackerDefinition::new("B", 3);
        b.initial_value = Some("001".to_string());
        ctx.register_tracker(b);
        ctx
    }

    #[test]
    fn test_handle_shape() {
        let ctx = context();
        let tracker = ctx.tracker("A,B").expect("tracker");
        assert_eq!(tracker.size(), 5);
        assert_eq!(tracker.names(), "A|B");
        assert_eq!(tracker.reset_value(), "00001");
    }

    #[test]
    fn test_state_and_mask_bits() {
        let mut ctx = context();
        let tracker = ctx.tracker("A,B").expect("tracker");
        assert_eq!(tracker.state(&ctx).expect("state"), TrackerState::Untouched);
        assert!(matches!(tracker.mask_bits(&ctx), Err(RecoveryError::NotFound { .. })));

        ctx.store_tracker_data("A", "00".to_string());
        assert_eq!(tracker.state(&ctx).expect("state"), TrackerState::Untouched);

        ctx.store_tracker_data("B", "000".to_string());
        assert_eq!(tracker.state(&ctx).expect("state"), TrackerState::Clean);

        ctx.store_tracker_data("B", "010".to_string());
        assert_eq!(tracker.mask_bits(&ctx).expect("bits").to_string(), "00010");
        assert_eq!(tracker.state(&ctx).expect("state"), TrackerState::Partial);

        ctx.store_tracker_data("A", "11".to_string());
        ctx.store_tracker_data("B", "111".to_string());
        assert_eq!(tracker.state(&ctx).expect("state"), TrackerState::FullyFailed);
    }

    #[test]
    fn test_mask_bits_from_source() {
        let mut ctx = context();
        ctx.store_mut()
            .put_string("Cores", "1x01".to_string(), Scope::Dut);
        let tracker = ctx.tracker("A").expect("tracker");
        let bits = tracker
            .mask_bits_from(&ctx, InputType::SharedStorage, "DUT.Cores")
            .expect("resolved");
        assert_eq!(bits.to_string(), "1001");
        assert!(!ctx.has_tracker_data("A"));
    }

    #[test]
    fn test_run_rule_uses_current_state() {
        let mut ctx = context();
        let mut rule = DefeatureRule::new("Pair", Vec::new());
        rule.add(
            RuleMode::ValidCombinations,
            "1C",
            1,
            RuleType::Recovery,
            vec![BitVector::parse("01").expect("bits"), BitVector::parse("10").expect("bits")],
            false,
        );
        ctx.register_rule(rule);
        ctx.store_tracker_data("A", "01".to_string());

        let tracker = ctx.tracker("A").expect("tracker");
        let matches = tracker.run_rule(&ctx, "Pair").expect("rule");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].bit_vector.to_string(), "01");

        let explicit = DieRecoveryTracker::run_rule_on(&ctx, &BitVector::new(2), "Pair").expect("rule");
        assert_eq!(explicit.len(), 2);
        assert!(matches!(
            tracker.run_rule(&ctx, "Missing"),
            Err(RecoveryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_log_without_update() {
        let mut ctx = context();
        ctx.store_tracker_data("A", "10".to_string());
        let tracker = ctx.tracker("A").expect("tracker");
        tracker
            .log_tracking_structure(&mut ctx, &BitVector::new(2), &BitVector::filled(2, true))
            .expect("logged");
        let records = ctx.sink().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tname_postfix(), "::A");
        assert_eq!(records[0].strgval(), "Mask:b00|TestResult:b11|Incoming:b10|Outgoing:b10");
    }
}
