// SPDX-License-Identifier: PMPL-1.0-or-later

//! Core attribution from the label executed before a failing vector

use super::DecoderCommon;
use crate::error::Result;
use crate::tester::{ExecutionResult, FailureRecord, PatConfigService};
use crate::types::BitVector;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::OnceLock;
use tracing::debug;

pub const DEFAULT_CORES: usize = 4;

/// Which label family the module's patterns use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomContent {
    /// Labels like `CORE2_FAIL`.
    Array,
    /// Labels like `CPU_FAB_ALL_C1_FAIL`.
    Func,
}

impl AtomContent {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_uppercase().as_str() {
            "ARRAY" => Some(AtomContent::Array),
            "FUNC" => Some(AtomContent::Func),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AtomContent::Array => "ARRAY",
            AtomContent::Func => "FUNC",
        }
    }

    fn core_pattern(&self) -> &'static Regex {
        static ARRAY: OnceLock<Regex> = OnceLock::new();
        static FUNC: OnceLock<Regex> = OnceLock::new();
        match self {
            AtomContent::Array => ARRAY.get_or_init(|| Regex::new(r"CORE(\d+)").expect("valid regex")),
            AtomContent::Func => FUNC.get_or_init(|| Regex::new(r"C(\d+)").expect("valid regex")),
        }
    }
}

impl Serialize for AtomContent {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AtomContent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        AtomContent::parse(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "{} is not a valid content type, expected ARRAY or FUNC",
                raw
            ))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AtomDecoder {
    #[serde(flatten)]
    pub common: DecoderCommon,
    /// Pin whose failures this decoder attributes.
    pub pin: String,
    pub module: u32,
    pub content: AtomContent,
    /// Extra token in mask/restore pattern-configuration names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_modify_uniq: Option<String>,
    /// Core N maps to bit `size - (N + 1)`.
    #[serde(default)]
    pub reverse: bool,
}

impl AtomDecoder {
    pub fn new(name: &str, pin: &str, module: u32, content: AtomContent) -> Self {
        Self {
            common: DecoderCommon::new(name, DEFAULT_CORES),
            pin: pin.to_string(),
            module,
            content,
            pattern_modify_uniq: None,
            reverse: false,
        }
    }

    fn bit_for_core(&self, core: usize) -> Option<usize> {
        if core >= self.common.size {
            return None;
        }
        Some(if self.reverse {
            self.common.size - (core + 1)
        } else {
            core
        })
    }

    /// Fail vector for a single failing cycle.
    pub fn decode_record(&self, record: &FailureRecord) -> BitVector {
        let size = self.common.size;
        if !record.failing_pins.iter().any(|pin| pin == &self.pin) {
            return BitVector::new(size);
        }

        let label = &record.previous_label;
        let core = self
            .content
            .core_pattern()
            .captures(label)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<usize>().ok());

        match core.and_then(|core| self.bit_for_core(core)) {
            Some(bit) => {
                debug!(decoder = %self.common.name, label = %label, bit, "core failure");
                let mut result = BitVector::new(size);
                result.set(bit, true);
                result
            }
            None => {
                debug!(decoder = %self.common.name, label = %label, "non-core failure, failing all cores");
                BitVector::filled(size, true)
            }
        }
    }

    pub fn decode(&self, exec: &dyn ExecutionResult) -> Result<BitVector> {
        let capture = exec
            .failure_capture()
            .ok_or_else(|| self.common.unsupported("per-cycle failure"))?;
        let records = match capture.per_cycle_failures() {
            Ok(records) => records,
            Err(fault) => {
                debug!(decoder = %self.common.name, %fault, "treating capture fault as pass");
                return Ok(BitVector::new(self.common.size));
            }
        };

        let mut result = BitVector::new(self.common.size);
        for record in &records {
            result.or_assign(&self.decode_record(record))?;
            if result.all_set() {
                break;
            }
        }
        Ok(result)
    }

    fn patmod_name(&self, core: usize, masked: bool) -> String {
        let content = match self.content {
            AtomContent::Array => "array",
            AtomContent::Func => "func",
        };
        let uniquify = self
            .pattern_modify_uniq
            .as_deref()
            .map(|uniq| format!("_{}", uniq))
            .unwrap_or_default();
        let action = if masked { "mask" } else { "restore" };
        format!(
            "atom_{}{}_m{}_c{}_{}",
            content, uniquify, self.module, core, action
        )
    }

    /// Mask or restore every core through pattern configuration.
    ///
    /// When every core is disabled the pin itself is returned for masking and
    /// no configuration is applied.
    pub fn mask(
        &mut self,
        bits: &BitVector,
        service: &mut dyn PatConfigService,
    ) -> Result<Vec<String>> {
        self.common.check_size(bits, "mask")?;
        if bits.all_set() {
            return Ok(vec![self.pin.clone()]);
        }

        let mut handles = Vec::with_capacity(bits.len());
        for core in 0..bits.len() {
            let bit = self.bit_for_core(core).unwrap_or(core);
            let patmod = self.patmod_name(core, bits[bit]);
            handles.push(self.common.handles.get_or_create(service, &patmod, None)?);
        }
        service.apply(&handles);
        Ok(Vec::new())
    }
}
