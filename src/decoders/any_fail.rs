// SPDX-License-Identifier: PMPL-1.0-or-later

//! Single-slice decoder: any listed pin failing marks the slice under test

use super::DecoderCommon;
use crate::error::{RecoveryError, Result};
use crate::tester::ExecutionResult;
use crate::types::BitVector;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AnyFailSingleSliceDecoder {
    #[serde(flatten)]
    pub common: DecoderCommon,
    /// Pins watched for failures; empty means any failing pin counts.
    #[serde(default)]
    pub pin_list: Vec<String>,
}

impl AnyFailSingleSliceDecoder {
    pub fn new(common: DecoderCommon, pin_list: Vec<String>) -> Self {
        Self { common, pin_list }
    }

    pub fn decode(&self, exec: &dyn ExecutionResult, current_slice: Option<usize>) -> Result<BitVector> {
        let capture = exec
            .failure_capture()
            .ok_or_else(|| self.common.unsupported("failing-pin"))?;
        let failing_pins = capture.failing_pins().unwrap_or_else(|fault| {
            debug!(decoder = %self.common.name, %fault, "treating capture fault as pass");
            Vec::new()
        });
        self.decode_pins(&failing_pins, current_slice)
    }

    pub fn decode_pins(&self, failing_pins: &[String], current_slice: Option<usize>) -> Result<BitVector> {
        let slice = match current_slice {
            Some(slice) => slice,
            None if self.common.size == 1 => 0,
            None => {
                return Err(RecoveryError::Argument(format!(
                    "decoder [{}] has {} slices and requires the current slice",
                    self.common.name, self.common.size
                )))
            }
        };
        if slice >= self.common.size {
            return Err(RecoveryError::Argument(format!(
                "current slice {} is out of range for decoder [{}] with {} slices",
                slice, self.common.name, self.common.size
            )));
        }

        let failed = if self.pin_list.is_empty() {
            !failing_pins.is_empty()
        } else {
            failing_pins.iter().any(|pin| self.pin_list.contains(pin))
        };

        let mut result = BitVector::new(self.common.size);
        result.set(slice, failed);
        Ok(result)
    }
}
