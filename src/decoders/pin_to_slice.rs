// SPDX-License-Identifier: PMPL-1.0-or-later

//! Explicit pin-to-slice mapping

use super::DecoderCommon;
use crate::error::{RecoveryError, Result};
use crate::tester::ExecutionResult;
use crate::types::BitVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Marks a slice failed when any pin mapped to it fails.
///
/// One pin may drive several slices and several pins may alias one slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PinToSliceIndexDecoder {
    #[serde(flatten)]
    pub common: DecoderCommon,
    pub pin_to_slice_index_map: BTreeMap<String, Vec<usize>>,
    /// Dead-on-arrival pins, left out of the per-slice mask.
    #[serde(default)]
    pub doa_pins: Vec<String>,
}

impl PinToSliceIndexDecoder {
    pub fn new(common: DecoderCommon, map: BTreeMap<String, Vec<usize>>) -> Self {
        Self {
            common,
            pin_to_slice_index_map: map,
            doa_pins: Vec::new(),
        }
    }

    pub fn decode(&self, exec: &dyn ExecutionResult) -> Result<BitVector> {
        let capture = exec
            .failure_capture()
            .ok_or_else(|| self.common.unsupported("failing-pin"))?;
        let failing_pins = capture.failing_pins().unwrap_or_else(|fault| {
            debug!(decoder = %self.common.name, %fault, "treating capture fault as pass");
            Vec::new()
        });
        self.decode_pins(&failing_pins)
    }

    pub fn decode_pins(&self, failing_pins: &[String]) -> Result<BitVector> {
        let mut result = BitVector::new(self.common.size);
        for pin in failing_pins {
            let Some(indices) = self.pin_to_slice_index_map.get(pin) else {
                continue;
            };
            for &index in indices {
                if index >= self.common.size {
                    return Err(RecoveryError::Configuration(format!(
                        "decoder [{}] maps pin [{}] to slice {} beyond size {}",
                        self.common.name, pin, index, self.common.size
                    )));
                }
                result.set(index, true);
            }
        }
        Ok(result)
    }

    /// Pins behind every disabled slice, deduplicated, DOA pins excluded.
    pub fn mask(&self, bits: &BitVector) -> Vec<String> {
        let mut slice_to_pins: BTreeMap<usize, Vec<&String>> = BTreeMap::new();
        for (pin, indices) in &self.pin_to_slice_index_map {
            for index in indices {
                let pins = slice_to_pins.entry(*index).or_default();
                if !pins.contains(&pin) {
                    pins.push(pin);
                }
            }
        }

        let mut masked = Vec::new();
        for index in bits.set_indices() {
            for pin in slice_to_pins.get(&index).into_iter().flatten() {
                if self.doa_pins.contains(*pin) || masked.contains(*pin) {
                    continue;
                }
                masked.push((*pin).clone());
            }
        }
        masked
    }
}
