// SPDX-License-Identifier: PMPL-1.0-or-later

//! Attribution for sub-programs running concurrently inside one pattern list

use super::DecoderCommon;
use crate::error::{RecoveryError, Result};
use crate::tester::{ExecutionResult, PatternOccurrence, PlistService};
use crate::types::BitVector;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// One concurrently running sub-program list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConcurrentPlist {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub plist_name: String,
    pub target_positions: Vec<usize>,
    /// Comma-separated pin groups, one per target position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_pins: Option<Vec<String>>,
}

impl ConcurrentPlist {
    fn pins_for(&self, position_index: usize) -> Vec<String> {
        self.failing_pins
            .as_ref()
            .and_then(|groups| groups.get(position_index))
            .map(|group| split_pins(group))
            .unwrap_or_default()
    }
}

pub(crate) fn split_pins(group: &str) -> Vec<String> {
    group
        .split(',')
        .map(str::trim)
        .filter(|pin| !pin.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConcurrentPlistDecoder {
    #[serde(flatten)]
    pub common: DecoderCommon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub ctv_domain: String,
    #[serde(default)]
    pub concurrent_plists: Vec<ConcurrentPlist>,
    /// Last pattern of each sub-program list, recorded by `verify`.
    #[serde(skip)]
    pub last_patterns_in_plist: BTreeMap<String, PatternOccurrence>,
    /// Last pattern each sub-program executed in the most recent decode.
    #[serde(skip)]
    pub last_executed_patterns: BTreeMap<String, PatternOccurrence>,
}

impl ConcurrentPlistDecoder {
    pub fn new(common: DecoderCommon, ctv_domain: &str, concurrent_plists: Vec<ConcurrentPlist>) -> Self {
        Self {
            common,
            description: None,
            ctv_domain: ctv_domain.to_string(),
            concurrent_plists,
            last_patterns_in_plist: BTreeMap::new(),
            last_executed_patterns: BTreeMap::new(),
        }
    }

    fn children(&self) -> BTreeSet<&str> {
        self.concurrent_plists
            .iter()
            .map(|child| child.plist_name.as_str())
            .collect()
    }

    fn mark(&self, result: &mut BitVector, position: usize) -> Result<()> {
        if position >= self.common.size {
            return Err(RecoveryError::Configuration(format!(
                "decoder [{}] target position {} is beyond size {}",
                self.common.name, position, self.common.size
            )));
        }
        result.set(position, true);
        Ok(())
    }

    pub fn decode(&mut self, exec: &dyn ExecutionResult) -> Result<BitVector> {
        let size = self.common.size;
        let capture = exec
            .failure_capture()
            .ok_or_else(|| self.common.unsupported("per-cycle failure"))?;
        let ctv = exec
            .ctv_capture()
            .ok_or_else(|| self.common.unsupported("per-pattern trace"))?;

        let records = match capture.per_cycle_failures() {
            Ok(records) => records,
            Err(fault) => {
                debug!(decoder = %self.common.name, %fault, "treating capture fault as pass");
                return Ok(BitVector::new(size));
            }
        };
        if records.is_empty() {
            debug!(decoder = %self.common.name, plist = %exec.plist_name(), "plist passed");
            return Ok(BitVector::new(size));
        }

        let traces = match ctv.ctv_per_pattern() {
            Ok(traces) => traces,
            Err(fault) => {
                debug!(decoder = %self.common.name, %fault, "treating trace fault as pass");
                return Ok(BitVector::new(size));
            }
        };
        if traces.is_empty() {
            return Err(RecoveryError::Attribution(format!(
                "decoder [{}] captured failures without a per-pattern trace, cannot resolve the executing sub-program",
                self.common.name
            )));
        }

        self.last_executed_patterns.clear();
        let mut result = BitVector::new(size);
        for record in &records {
            let owner = traces
                .iter()
                .find(|trace| {
                    trace.pattern_name == record.pattern_name && trace.instance_id == record.instance_id
                })
                .map(|trace| trace.parent_plist.clone())
                .unwrap_or_else(|| record.parent_plist.clone());
            self.last_executed_patterns.insert(
                owner.clone(),
                PatternOccurrence {
                    pattern_name: record.pattern_name.clone(),
                    occurrence: record.instance_id,
                },
            );

            let mut matched = false;
            for child in self.concurrent_plists.iter().filter(|child| child.plist_name == owner) {
                matched = true;
                if child.failing_pins.is_some() {
                    for (i, &position) in child.target_positions.iter().enumerate() {
                        let pins = child.pins_for(i);
                        if record.failing_pins.iter().any(|pin| pins.contains(pin)) {
                            debug!(decoder = %self.common.name, plist = %owner, position, "failing pin matched");
                            self.mark(&mut result, position)?;
                        }
                    }
                } else {
                    for &position in &child.target_positions {
                        self.mark(&mut result, position)?;
                    }
                }
            }

            if !matched {
                debug!(decoder = %self.common.name, plist = %owner, "no sub-program matched, failing all positions");
                return Ok(BitVector::filled(size, true));
            }
        }

        let children: BTreeSet<String> = self.children().into_iter().map(str::to_string).collect();
        for trace in traces.iter().rev() {
            if children.iter().all(|child| self.last_executed_patterns.contains_key(child)) {
                break;
            }
            self.last_executed_patterns
                .entry(trace.parent_plist.clone())
                .or_insert_with(|| PatternOccurrence {
                    pattern_name: trace.pattern_name.clone(),
                    occurrence: trace.instance_id,
                });
        }

        Ok(result)
    }

    /// Pins for the disabled positions, and the next start pattern per sub-program.
    pub fn mask(&mut self, bits: &BitVector, exec: &mut dyn ExecutionResult) -> Result<Vec<String>> {
        let mut pins: Vec<String> = Vec::new();
        let mut starts = BTreeMap::new();

        for child in &self.concurrent_plists {
            let disabled = |position: &usize| bits.get(*position).unwrap_or(false);
            let all_disabled = child.target_positions.iter().all(disabled);
            let any_disabled = child.target_positions.iter().any(disabled);

            let start = if all_disabled {
                let last = self.last_patterns_in_plist.get(&child.plist_name).ok_or_else(|| {
                    RecoveryError::Configuration(format!(
                        "no last pattern recorded for [{}], verify the decoder first",
                        child.plist_name
                    ))
                })?;
                debug!(plist = %child.plist_name, pattern = %last.pattern_name, "all positions disabled, skipping to last pattern");
                Some(last.clone())
            } else {
                if child.failing_pins.is_some() {
                    for (i, position) in child.target_positions.iter().enumerate() {
                        if !disabled(position) {
                            continue;
                        }
                        for pin in child.pins_for(i) {
                            if !pins.contains(&pin) {
                                pins.push(pin);
                            }
                        }
                    }
                } else if any_disabled {
                    return Err(RecoveryError::Configuration(format!(
                        "[{}] declares no FailingPins but only some of its positions are disabled, bits [{}]",
                        child.plist_name, bits
                    )));
                }
                self.last_executed_patterns.get(&child.plist_name).cloned()
            };

            if let Some(start) = start {
                starts.insert(child.plist_name.clone(), start);
            }
        }

        if !starts.is_empty() {
            let control = exec
                .start_pattern_control()
                .ok_or_else(|| self.common.unsupported("start-pattern control"))?;
            control.set_concurrent_start_patterns(&starts);
        }
        Ok(pins)
    }

    pub fn restore(&mut self) {
        self.last_executed_patterns.clear();
    }

    /// Record each sub-program's last pattern and enable trace capture on its patterns.
    pub fn verify(&mut self, plists: &mut dyn PlistService) -> Result<()> {
        self.restore();
        self.last_patterns_in_plist.clear();

        let children: Vec<String> = self.children().into_iter().map(str::to_string).collect();
        for child in children {
            let contents = plists.contents(&child)?;
            let patterns: Vec<&str> = contents
                .iter()
                .filter(|item| item.is_pattern)
                .map(|item| item.name.as_str())
                .collect();

            if let Some(last) = patterns.last() {
                let occurrence = patterns.iter().filter(|name| *name == last).count() as u64;
                self.last_patterns_in_plist.insert(
                    child.clone(),
                    PatternOccurrence {
                        pattern_name: last.to_string(),
                        occurrence,
                    },
                );
            }
            for pattern in &patterns {
                plists.enable_ctv_capture(&child, pattern, &self.ctv_domain)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tester::{CapturedExecution, CtvPatternTrace, FailureRecord, OfflinePlists};

    fn decoder() -> ConcurrentPlistDecoder {
        ConcurrentPlistDecoder::new(
            DecoderCommon::new("cplist", 4),
            "CTV",
            vec![
                ConcurrentPlist {
                    comment: None,
                    plist_name: "ipA".to_string(),
                    target_positions: vec![0, 1],
                    failing_pins: Some(vec!["A0".to_string(), "A1, A1B".to_string()]),
                },
                ConcurrentPlist {
                    comment: None,
                    plist_name: "ipB".to_string(),
                    target_positions: vec![2, 3],
                    failing_pins: None,
                },
            ],
        )
    }

    fn failure(pattern: &str, instance: u64, plist: &str, pins: &[&str]) -> FailureRecord {
        FailureRecord {
            pattern_name: pattern.to_string(),
            instance_id: instance,
            burst_index: 0,
            domain_name: "D".to_string(),
            parent_plist: plist.to_string(),
            failing_pins: pins.iter().map(|p| p.to_string()).collect(),
            previous_label: String::new(),
        }
    }

    fn trace(pattern: &str, instance: u64, plist: &str) -> CtvPatternTrace {
        CtvPatternTrace {
            pattern_name: pattern.to_string(),
            instance_id: instance,
            burst_index: 0,
            parent_plist: plist.to_string(),
        }
    }

    #[test]
    fn test_attributes_by_trace_and_pins() {
        let exec = CapturedExecution::new("top")
            .with_failures(vec![failure("a_pat", 2, "top", &["A1B"])])
            .with_ctv(vec![trace("b_pat", 1, "ipB"), trace("a_pat", 2, "ipA")]);
        let mut decoder = decoder();
        let result = decoder.decode(&exec).expect("decode");
        assert_eq!(result.to_string(), "0100");
        assert_eq!(decoder.last_executed_patterns["ipA"].pattern_name, "a_pat");
        assert_eq!(decoder.last_executed_patterns["ipB"].pattern_name, "b_pat");
    }

    #[test]
    fn test_sub_program_without_pins_fails_all_its_positions() {
        let exec = CapturedExecution::new("top")
            .with_failures(vec![failure("b_pat", 1, "ipB", &["X"])])
            .with_ctv(vec![trace("b_pat", 1, "ipB")]);
        assert_eq!(decoder().decode(&exec).expect("decode").to_string(), "0011");
    }

    #[test]
    fn test_unknown_sub_program_fails_everything() {
        let exec = CapturedExecution::new("top")
            .with_failures(vec![failure("z", 1, "ipZ", &["X"])])
            .with_ctv(vec![trace("z", 1, "ipZ")]);
        assert_eq!(decoder().decode(&exec).expect("decode").to_string(), "1111");
    }

    #[test]
    fn test_missing_trace_is_fatal() {
        let exec = CapturedExecution::new("top")
            .with_failures(vec![failure("a_pat", 1, "ipA", &["A0"])])
            .with_ctv(Vec::new());
        assert!(matches!(
            decoder().decode(&exec),
            Err(RecoveryError::Attribution(_))
        ));
    }

    #[test]
    fn test_requires_trace_capability() {
        let exec = CapturedExecution::new("top").with_failures(Vec::new());
        assert!(matches!(
            decoder().decode(&exec),
            Err(RecoveryError::UnsupportedInputType { .. })
        ));
    }

    #[test]
    fn test_mask_sets_start_patterns() {
        let mut plists = OfflinePlists::new()
            .with_plist("ipA", &["a_pat", "a_end", "a_end"])
            .with_plist("ipB", &["b_pat", "b_last"]);
        let mut decoder = decoder();
        decoder.verify(&mut plists).expect("verify");
        assert_eq!(decoder.last_patterns_in_plist["ipA"].occurrence, 2);
        assert_eq!(plists.ctv_enabled.len(), 5);

        decoder.last_executed_patterns.insert(
            "ipA".to_string(),
            PatternOccurrence {
                pattern_name: "a_pat".to_string(),
                occurrence: 1,
            },
        );
        let mut exec = CapturedExecution::new("top").with_start_pattern(None);
        let pins = decoder
            .mask(&BitVector::parse("0111").expect("bits"), &mut exec)
            .expect("mask");
        assert_eq!(pins, vec!["A1".to_string(), "A1B".to_string()]);
        assert_eq!(exec.concurrent_starts["ipA"].pattern_name, "a_pat");
        assert_eq!(exec.concurrent_starts["ipB"].pattern_name, "b_last");
    }

    #[test]
    fn test_partial_disable_without_pins_is_configuration_error() {
        let mut decoder = decoder();
        let mut exec = CapturedExecution::new("top").with_start_pattern(None);
        let err = decoder
            .mask(&BitVector::parse("0010").expect("bits"), &mut exec)
            .unwrap_err();
        assert!(matches!(err, RecoveryError::Configuration(_)));
    }
}
