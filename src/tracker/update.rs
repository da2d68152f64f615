// SPDX-License-Identifier: PMPL-1.0-or-later

//! Tracker updates and the link-disable cascade

use super::DieRecoveryTracker;
use crate::context::RecoveryContext;
use crate::datalog::LogSink;
use crate::error::Result;
use crate::storage::KeyValueStore;
use crate::types::{BitVector, InputType, TrackerDefinition, UpdateMode};
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use tracing::{debug, warn};

/// One write to a tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub bits: BitVector,
    /// Set bits keep their current value whatever `bits` says.
    pub mask: Option<BitVector>,
    /// Test outcome for the datalog record; defaults to `bits`.
    pub result: Option<BitVector>,
    pub mode: UpdateMode,
    pub log: bool,
}

impl UpdateRequest {
    pub fn new(bits: BitVector) -> Self {
        Self {
            bits,
            mask: None,
            result: None,
            mode: UpdateMode::Merge,
            log: true,
        }
    }

    pub fn merge(bits: BitVector) -> Self {
        Self::new(bits)
    }

    pub fn overwrite(bits: BitVector) -> Self {
        Self::new(bits).with_mode(UpdateMode::Overwrite)
    }

    pub fn with_mode(mut self, mode: UpdateMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_mask(mut self, mask: BitVector) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_result(mut self, result: BitVector) -> Self {
        self.result = Some(result);
        self
    }

    pub fn without_log(mut self) -> Self {
        self.log = false;
        self
    }

    fn with_optional(mut self, mask: Option<BitVector>, result: Option<BitVector>) -> Self {
        self.mask = mask;
        self.result = result;
        self
    }
}

/// Whether a write goes through the down-bin budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Budgeted,
    Forced,
}

impl DieRecoveryTracker {
    /// Combine `request` into the persisted state.
    ///
    /// Returns `false` when a broadening write is refused by the down-bin
    /// budget, or when a cascaded write is refused; persisted state of the
    /// rejecting tracker is left as it was.
    pub fn update_tracking_structure<S: KeyValueStore, L: LogSink>(
        &self,
        ctx: &mut RecoveryContext<S, L>,
        request: UpdateRequest,
    ) -> Result<bool> {
        let mut visited = BTreeSet::new();
        self.apply_update(ctx, request, Admission::Budgeted, &mut visited)
    }

    /// Resolve `token` through `input_type`, then update.
    pub fn update_from_input<S: KeyValueStore, L: LogSink>(
        &self,
        ctx: &mut RecoveryContext<S, L>,
        input_type: InputType,
        token: &str,
        mode: UpdateMode,
        mask: Option<BitVector>,
        result: Option<BitVector>,
    ) -> Result<bool> {
        let bits = self.mask_bits_from(ctx, input_type, token)?;
        let request = UpdateRequest::new(bits).with_mode(mode).with_optional(mask, result);
        self.update_tracking_structure(ctx, request)
    }

    /// One measurement per slice; a slice fails unless it lies within `limits`.
    pub fn update_from_vmin<S: KeyValueStore, L: LogSink>(
        &self,
        ctx: &mut RecoveryContext<S, L>,
        voltages: &[f64],
        limits: RangeInclusive<f64>,
        mode: UpdateMode,
        mask: Option<BitVector>,
        result: Option<BitVector>,
    ) -> Result<bool> {
        let bits: BitVector = voltages.iter().map(|v| !limits.contains(v)).collect();
        let request = UpdateRequest::new(bits).with_mode(mode).with_optional(mask, result);
        self.update_tracking_structure(ctx, request)
    }

    fn apply_update<S: KeyValueStore, L: LogSink>(
        &self,
        ctx: &mut RecoveryContext<S, L>,
        request: UpdateRequest,
        admission: Admission,
        visited: &mut BTreeSet<String>,
    ) -> Result<bool> {
        self.check_width(&request.bits, "update bits")?;
        let mask = match request.mask {
            Some(mask) => {
                self.check_width(&mask, "update mask")?;
                mask
            }
            None => BitVector::new(self.size),
        };
        let result = match request.result {
            Some(result) => {
                self.check_width(&result, "update result")?;
                result
            }
            None => request.bits.clone(),
        };

        // Untouched definitions start from all-pass; written ones keep their data.
        let parts = self.stored_parts(ctx)?;
        let fully_initialized = parts.iter().all(Option::is_some);
        let mut current = Vec::with_capacity(self.size);
        let mut written = Vec::with_capacity(self.size);
        for (definition, part) in self.definitions.iter().zip(&parts) {
            match part {
                Some(bits) => current.extend_from_slice(bits.as_slice()),
                None => current.resize(current.len() + definition.size, false),
            }
            written.resize(written.len() + definition.size, part.is_some());
        }
        let current: BitVector = current.into_iter().collect();
        let merge = request.mode == UpdateMode::Merge;

        let candidate: BitVector = (0..self.size)
            .map(|i| {
                if mask[i] {
                    current[i]
                } else {
                    request.bits[i] || (current[i] && merge)
                }
            })
            .collect();

        if fully_initialized && candidate == current {
            debug!(tracker = %self.names(), value = %current, "tracker unchanged");
            if request.log {
                self.write_record(ctx, mask, result, current.clone(), current);
            }
            return Ok(true);
        }

        // Filling an untouched definition is initialisation, not a down-bin.
        let broadening = (0..self.size).any(|i| written[i] && candidate[i] && !current[i]);
        if broadening && admission == Admission::Budgeted && !ctx.try_consume_down_bin() {
            warn!(
                tracker = %self.names(),
                current = %current,
                candidate = %candidate,
                "down-bin budget exhausted, update rejected"
            );
            return Ok(false);
        }

        let newly_disabled = self.persist(ctx, &candidate, &current);
        if request.log {
            self.write_record(ctx, mask, result, current, candidate);
        }

        self.cascade(ctx, newly_disabled, visited)
    }

    /// Write each definition's slice; returns those that just became fully failed.
    fn persist<S: KeyValueStore, L: LogSink>(
        &self,
        ctx: &mut RecoveryContext<S, L>,
        data: &BitVector,
        previous: &BitVector,
    ) -> Vec<TrackerDefinition> {
        let mut offset = 0;
        let mut disabled = Vec::new();
        for definition in &self.definitions {
            let new_slice = &data.as_slice()[offset..offset + definition.size];
            let old_slice = &previous.as_slice()[offset..offset + definition.size];
            let newly_disabled = old_slice.contains(&false) && !new_slice.contains(&false);
            let value: BitVector = new_slice.iter().copied().collect();
            ctx.store_tracker_data(&definition.name, value.to_bit_string());
            offset += definition.size;
            if newly_disabled {
                disabled.push(definition.clone());
            }
        }
        disabled
    }

    fn cascade<S: KeyValueStore, L: LogSink>(
        &self,
        ctx: &mut RecoveryContext<S, L>,
        disabled: Vec<TrackerDefinition>,
        visited: &mut BTreeSet<String>,
    ) -> Result<bool> {
        visited.extend(disabled.iter().map(|d| d.name.clone()));

        for definition in &disabled {
            for link in &definition.link_disable {
                if !visited.insert(link.clone()) {
                    continue;
                }
                let linked = ctx.tracker(link)?;
                let already_disabled = linked
                    .stored_bits(ctx)?
                    .is_some_and(|bits| bits.all_set());
                if already_disabled {
                    debug!(tracker = %link, "linked tracker already disabled");
                    continue;
                }
                debug!(source = %definition.name, tracker = %link, "cascading link-disable");
                let request = UpdateRequest::overwrite(BitVector::filled(linked.size(), true));
                if !linked.apply_update(ctx, request, Admission::Forced, visited)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}
