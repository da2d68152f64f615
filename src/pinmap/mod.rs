// SPDX-License-Identifier: PMPL-1.0-or-later

//! Pin-map aggregator
//!
//! Composes an ordered list of decoders into one composite vector and routes
//! masking, pattern-list, and pattern-configuration operations to each
//! member's sub-range.

pub mod registry;

use crate::decoders::PinMapDecoder;
use crate::error::{RecoveryError, Result};
use crate::tester::{ExecutionResult, PatConfigService, PlistService, TesterServices};
use crate::types::BitVector;
use std::collections::BTreeSet;
use tracing::debug;

pub use registry::DecoderRegistry;

#[derive(Debug, Clone)]
pub struct PinMap {
    decoders: Vec<PinMapDecoder>,
    size: usize,
    doa_pins: Vec<String>,
}

impl PinMap {
    pub fn new(decoders: Vec<PinMapDecoder>) -> Self {
        let size = decoders.iter().map(PinMapDecoder::size).sum();
        Self {
            decoders,
            size,
            doa_pins: Vec::new(),
        }
    }

    /// Build from a comma-joined list of registered decoder names.
    pub fn from_registry(names: &str, registry: &DecoderRegistry) -> Result<Self> {
        let decoders = names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| registry.get(name).cloned())
            .collect::<Result<Vec<_>>>()?;
        if decoders.is_empty() {
            return Err(RecoveryError::Argument(format!(
                "no decoder names in [{}]",
                names
            )));
        }
        Ok(Self::new(decoders))
    }

    /// Extra dead-on-arrival pins masked whenever a mask is applied.
    pub fn with_doa_pins(mut self, pins: Vec<String>) -> Self {
        self.doa_pins = pins;
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn decoders(&self) -> &[PinMapDecoder] {
        &self.decoders
    }

    pub fn names(&self) -> String {
        self.decoders
            .iter()
            .map(PinMapDecoder::name)
            .collect::<Vec<_>>()
            .join(",")
    }

    fn check_size(&self, bits: &BitVector, operation: &str) -> Result<()> {
        if bits.len() != self.size {
            return Err(RecoveryError::wrong_size(
                format!("{} [{}]", operation, self.names()),
                self.size,
                bits.len(),
            ));
        }
        Ok(())
    }

    /// Per-decoder sub-ranges of `bits`.
    fn split(&self, bits: &BitVector, operation: &str) -> Result<Vec<BitVector>> {
        self.check_size(bits, operation)?;
        let mut offset = 0;
        let mut parts = Vec::with_capacity(self.decoders.len());
        for decoder in &self.decoders {
            parts.push(bits.slice(offset, decoder.size())?);
            offset += decoder.size();
        }
        Ok(parts)
    }

    /// True when the first failure of any capture domain sits in an amble pattern.
    fn failed_in_amble(exec: &dyn ExecutionResult, plists: &dyn PlistService) -> bool {
        let Some(capture) = exec.failure_capture() else {
            return false;
        };
        let records = match capture.per_cycle_failures() {
            Ok(records) => records,
            Err(fault) => {
                debug!(%fault, "amble check skipped");
                return false;
            }
        };

        let mut seen_domains = BTreeSet::new();
        for record in &records {
            if !seen_domains.insert(record.domain_name.as_str()) {
                continue;
            }
            match plists.is_amble(&record.parent_plist, &record.pattern_name) {
                Ok(true) => {
                    debug!(
                        domain = %record.domain_name,
                        plist = %record.parent_plist,
                        pattern = %record.pattern_name,
                        "first failure is in an amble pattern"
                    );
                    return true;
                }
                Ok(false) => {}
                Err(fault) => debug!(%fault, "amble check skipped"),
            }
        }
        false
    }

    /// Composite fail vector for one execution.
    pub fn decode_failures(
        &mut self,
        exec: &dyn ExecutionResult,
        current_slice: Option<usize>,
        services: &mut TesterServices<'_>,
    ) -> Result<BitVector> {
        if Self::failed_in_amble(exec, &*services.plists) {
            return Ok(BitVector::filled(self.size, true));
        }

        let mut parts = Vec::with_capacity(self.decoders.len());
        for decoder in &mut self.decoders {
            let part = decoder.decode(exec, current_slice)?;
            decoder.save_results(&part, &mut *services.store);
            parts.push(part);
        }
        let result = BitVector::concat(&parts);

        if !result.any_set() {
            let failing_pins = exec
                .failure_capture()
                .and_then(|capture| capture.failing_pins().ok())
                .unwrap_or_default();
            if !failing_pins.is_empty() {
                debug!(pins = %failing_pins.join(","), "unattributed failing pins, failing every slice");
                return Ok(BitVector::filled(self.size, true));
            }
        }
        Ok(result)
    }

    /// Pins to mask for `bits`, deduplicated.
    ///
    /// A decoder's DOA pins join the output when that decoder masks a slice;
    /// the map's own DOA pins join when any slice is masked.
    pub fn pins_to_mask(
        &mut self,
        bits: &BitVector,
        exec: &mut dyn ExecutionResult,
        services: &mut TesterServices<'_>,
    ) -> Result<Vec<String>> {
        let parts = self.split(bits, "mask")?;
        let mut pins: Vec<String> = Vec::new();
        let mut push = |pin: &String| {
            if !pins.contains(pin) {
                pins.push(pin.clone());
            }
        };

        let mut masked_any = false;
        for (decoder, part) in self.decoders.iter_mut().zip(&parts) {
            for pin in decoder.mask_from_tracker(part, exec, services)? {
                push(&pin);
            }
            if part.any_set() {
                decoder.doa_pins().iter().for_each(&mut push);
                masked_any = true;
            }
        }
        if masked_any {
            self.doa_pins.iter().for_each(&mut push);
        }
        Ok(pins)
    }

    /// Compute the mask pins and hand them to the execution.
    pub fn mask_pins(
        &mut self,
        bits: &BitVector,
        exec: &mut dyn ExecutionResult,
        services: &mut TesterServices<'_>,
    ) -> Result<Vec<String>> {
        let pins = self.pins_to_mask(bits, exec, services)?;
        exec.set_pin_mask(&pins);
        Ok(pins)
    }

    pub fn modify_plist(
        &mut self,
        bits: &BitVector,
        exec: &mut dyn ExecutionResult,
        services: &mut TesterServices<'_>,
    ) -> Result<()> {
        let parts = self.split(bits, "plist settings")?;
        for (decoder, part) in self.decoders.iter_mut().zip(&parts) {
            decoder.apply_plist_settings(part, exec, services)?;
        }
        Ok(())
    }

    pub fn restore(&mut self, exec: &mut dyn ExecutionResult, services: &mut TesterServices<'_>) -> Result<()> {
        for decoder in &mut self.decoders {
            decoder.restore(exec, services)?;
        }
        Ok(())
    }

    pub fn verify(&mut self, services: &mut TesterServices<'_>) -> Result<()> {
        for decoder in &mut self.decoders {
            decoder.verify(services)?;
        }
        Ok(())
    }

    /// Write each decoder's sub-range to its pattern configuration and apply them together.
    pub fn apply_pat_config(
        &mut self,
        bits: &BitVector,
        target_plist: Option<&str>,
        service: &mut dyn PatConfigService,
    ) -> Result<()> {
        let parts = self.split(bits, "pattern configuration")?;
        let mut handles = Vec::with_capacity(parts.len());
        for (decoder, part) in self.decoders.iter_mut().zip(&parts) {
            handles.push(decoder.pat_config_for_slice_control(part, target_plist, service)?);
        }
        if !handles.is_empty() {
            service.apply(&handles);
        }
        Ok(())
    }

    /// One bit per decoder: set when any slice in its range is set.
    pub fn fail_tracker_to_fail_voltage_domains(&self, bits: &BitVector) -> Result<BitVector> {
        Ok(self
            .split(bits, "voltage domains")?
            .iter()
            .map(BitVector::any_set)
            .collect())
    }

    /// Broadcast each domain bit over its decoder's range.
    pub fn voltage_domains_to_fail_tracker(&self, domains: &BitVector) -> Result<BitVector> {
        if domains.len() != self.decoders.len() {
            return Err(RecoveryError::wrong_size(
                format!("voltage domains [{}]", self.names()),
                self.decoders.len(),
                domains.len(),
            ));
        }
        let parts: Vec<BitVector> = self
            .decoders
            .iter()
            .zip(domains.iter())
            .map(|(decoder, failed)| BitVector::filled(decoder.size(), failed))
            .collect();
        Ok(BitVector::concat(&parts))
    }
}
