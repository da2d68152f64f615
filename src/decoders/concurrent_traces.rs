// SPDX-License-Identifier: PMPL-1.0-or-later

//! Catalog-driven attribution for concurrent traces, plus the pattern-list
//! edits that steer the next execution around disabled slices

use super::concurrent_plist::split_pins;
use super::plist_tree::PlistTree;
use super::DecoderCommon;
use crate::error::{RecoveryError, Result};
use crate::tester::{ExecutionResult, FailureRecord, PlistService, StartPattern};
use crate::types::BitVector;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FailFilter {
    #[serde(default)]
    pub burst: u64,
    pub pattern_name: String,
    pub pattern_occurrence: u64,
    /// Comma-separated pin groups, one per target position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_pins: Option<Vec<String>>,
    pub target_positions: Vec<usize>,
}

impl FailFilter {
    fn matches(&self, pattern_name: &str, burst: u64, occurrence: u64) -> bool {
        self.pattern_name == pattern_name && self.burst == burst && self.pattern_occurrence == occurrence
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartPatternInfo {
    pub pattern_name: String,
    pub pattern_occurrence: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PreBurstPlistInfo {
    /// List to edit; the top-level list when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patlist: Option<String>,
    #[serde(rename = "PreBurstPList")]
    pub pre_burst_plist: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlistElementOption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patlist: Option<String>,
    pub index: Vec<u32>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfigurationEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub fail_filters: FailFilter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_pattern: Option<StartPatternInfo>,
    #[serde(default, rename = "PreBurstPList", skip_serializing_if = "Option::is_none")]
    pub pre_burst_plist: Option<PreBurstPlistInfo>,
    #[serde(default)]
    pub plist_element_options: Vec<PlistElementOption>,
}

/// Options applied when any of `target_positions` is disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MaskTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub target_positions: Vec<usize>,
    /// Regexes selecting patterns; when empty the `Mask` option is list-wide pins.
    #[serde(default)]
    pub pattern_names: Vec<String>,
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConcurrentTracesDecoder {
    #[serde(flatten)]
    pub common: DecoderCommon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub mask_configurations: Vec<MaskTarget>,
    pub entries: Vec<ConfigurationEntry>,
    #[serde(skip)]
    pub plist_tree: Option<PlistTree>,
}

fn ensure_tree<'t>(
    slot: &'t mut Option<PlistTree>,
    plist: &str,
    plists: &dyn PlistService,
) -> Result<&'t mut PlistTree> {
    if slot.is_none() {
        *slot = Some(PlistTree::build(plists, plist)?);
    }
    slot.as_mut()
        .ok_or_else(|| RecoveryError::not_found("plist", plist))
}

impl ConcurrentTracesDecoder {
    pub fn new(common: DecoderCommon, entries: Vec<ConfigurationEntry>) -> Self {
        Self {
            common,
            description: None,
            mask_configurations: Vec::new(),
            entries,
            plist_tree: None,
        }
    }

    fn entry_for(&self, pattern_name: &str, burst: u64, occurrence: u64) -> Option<&ConfigurationEntry> {
        self.entries
            .iter()
            .find(|entry| entry.fail_filters.matches(pattern_name, burst, occurrence))
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

    /// Positions marked by the first entry matching `record`, if any matched.
    fn attribute(&self, record: &FailureRecord, result: &mut BitVector) -> Result<bool> {
        let Some(entry) = self.entry_for(&record.pattern_name, record.burst_index, record.instance_id) else {
            return Ok(false);
        };
        let filter = &entry.fail_filters;

        let mut matched = false;
        match filter.failing_pins.as_ref().filter(|groups| !groups.is_empty()) {
            Some(groups) => {
                for (i, group) in groups.iter().enumerate() {
                    let pins = split_pins(group);
                    if !record.failing_pins.iter().any(|pin| pins.contains(pin)) {
                        continue;
                    }
                    let position = *filter.target_positions.get(i).ok_or_else(|| {
                        RecoveryError::Configuration(format!(
                            "decoder [{}] entry [{}] has more FailingPins than TargetPositions",
                            self.common.name, filter.pattern_name
                        ))
                    })?;
                    debug!(
                        decoder = %self.common.name,
                        burst = record.burst_index,
                        pattern = %record.pattern_name,
                        occurrence = record.instance_id,
                        position,
                        "matched entry on failing pins"
                    );
                    self.mark(result, position)?;
                    matched = true;
                }
            }
            None => {
                for &position in &filter.target_positions {
                    self.mark(result, position)?;
                    matched = true;
                }
                debug!(
                    decoder = %self.common.name,
                    burst = record.burst_index,
                    pattern = %record.pattern_name,
                    occurrence = record.instance_id,
                    "matched entry"
                );
            }
        }
        Ok(matched)
    }

    pub fn decode(&self, exec: &dyn ExecutionResult) -> Result<BitVector> {
        let size = self.common.size;
        let capture = exec
            .failure_capture()
            .ok_or_else(|| self.common.unsupported("per-cycle failure"))?;
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

        let mut result = BitVector::new(size);
        let mut matched = false;
        for record in &records {
            matched |= self.attribute(record, &mut result)?;
        }

        if matched {
            Ok(result)
        } else {
            Err(RecoveryError::Attribution(format!(
                "decoder [{}] did not find a matching entry",
                self.common.name
            )))
        }
    }

    /// List-wide pins for disabled mask targets; pattern-scoped targets edit the list instead.
    pub fn mask(
        &mut self,
        bits: &BitVector,
        exec: &mut dyn ExecutionResult,
        plists: &mut dyn PlistService,
    ) -> Result<Vec<String>> {
        let plist = exec.plist_name().to_string();
        let tree = ensure_tree(&mut self.plist_tree, &plist, &*plists)?;

        let mut pins: Vec<String> = Vec::new();
        for target in &self.mask_configurations {
            if !target
                .target_positions
                .iter()
                .any(|position| bits.get(*position).unwrap_or(false))
            {
                continue;
            }

            if target.pattern_names.is_empty() {
                for pin in target.options.get("Mask").map(|m| split_pins(m)).unwrap_or_default() {
                    if !pins.contains(&pin) {
                        pins.push(pin);
                    }
                }
                continue;
            }

            let patterns = target
                .pattern_names
                .iter()
                .map(|name| {
                    Regex::new(name).map_err(|e| {
                        RecoveryError::Configuration(format!("invalid pattern regex [{}]: {}", name, e))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            tree.set_matching_pattern_options(plists, &patterns, &target.options)?;
        }
        Ok(pins)
    }

    fn apply_entry(&mut self, current: &StartPattern, plists: &mut dyn PlistService) -> Result<StartPattern> {
        let Some(entry) = self
            .entries
            .iter()
            .find(|entry| entry.fail_filters.matches(&current.pattern_name, current.burst, current.occurrence))
        else {
            return Ok(current.clone());
        };
        let tree = self
            .plist_tree
            .as_mut()
            .ok_or_else(|| RecoveryError::not_found("plist tree", &self.common.name))?;

        for element in &entry.plist_element_options {
            if element.options.is_empty() {
                continue;
            }
            let target = tree
                .find_mut(element.patlist.as_deref())
                .ok_or_else(|| RecoveryError::not_found("plist", element.patlist.clone().unwrap_or_default()))?;
            for (key, value) in &element.options {
                for index in &element.index {
                    target.update_element_option(plists, *index, key, value)?;
                }
            }
        }

        if let Some(pre_burst) = &entry.pre_burst_plist {
            let target = tree
                .find_mut(pre_burst.patlist.as_deref())
                .ok_or_else(|| RecoveryError::not_found("plist", pre_burst.patlist.clone().unwrap_or_default()))?;
            target.update_pre_burst_plist(plists, &pre_burst.pre_burst_plist)?;
        }

        Ok(match &entry.start_pattern {
            Some(start) => StartPattern {
                pattern_name: start.pattern_name.clone(),
                burst: entry.fail_filters.burst,
                occurrence: start.pattern_occurrence,
            },
            None => current.clone(),
        })
    }

    /// Apply the entry matching the current start pattern, then resolve the list.
    ///
    /// Any failure restores every edit made so far before propagating.
    pub fn apply_plist_settings(
        &mut self,
        exec: &mut dyn ExecutionResult,
        plists: &mut dyn PlistService,
    ) -> Result<()> {
        let plist = exec.plist_name().to_string();
        ensure_tree(&mut self.plist_tree, &plist, &*plists)?;
        let current = exec
            .start_pattern_control()
            .ok_or_else(|| self.common.unsupported("start-pattern control"))?
            .start_pattern();

        if let Some(current) = current {
            debug!(
                decoder = %self.common.name,
                burst = current.burst,
                pattern = %current.pattern_name,
                occurrence = current.occurrence,
                "previous fail"
            );
            match self.apply_entry(&current, plists) {
                Ok(start) => {
                    debug!(decoder = %self.common.name, pattern = %start.pattern_name, "setting start pattern");
                    if let Some(control) = exec.start_pattern_control() {
                        control.set_start_pattern(&start);
                    }
                }
                Err(err) => {
                    warn!(decoder = %self.common.name, error = %err, "plist settings failed, restoring");
                    self.restore(exec, plists)?;
                    return Err(err);
                }
            }
        }

        plists.resolve(&plist)
    }

    pub fn restore(&mut self, exec: &mut dyn ExecutionResult, plists: &mut dyn PlistService) -> Result<()> {
        let Some(tree) = self.plist_tree.as_mut() else {
            return Ok(());
        };
        if let Some(control) = exec.start_pattern_control() {
            control.reset_start_pattern();
        }
        tree.restore(plists)?;
        plists.resolve(tree.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tester::{CapturedExecution, OfflinePlists};

    fn failure(pattern: &str, burst: u64, occurrence: u64, pins: &[&str]) -> FailureRecord {
        FailureRecord {
            pattern_name: pattern.to_string(),
            instance_id: occurrence,
            burst_index: burst,
            domain_name: "D".to_string(),
            parent_plist: "top".to_string(),
            failing_pins: pins.iter().map(|p| p.to_string()).collect(),
            previous_label: String::new(),
        }
    }

    fn entry(pattern: &str, burst: u64, occurrence: u64, pins: Option<Vec<&str>>, positions: Vec<usize>) -> ConfigurationEntry {
        ConfigurationEntry {
            comment: None,
            fail_filters: FailFilter {
                burst,
                pattern_name: pattern.to_string(),
                pattern_occurrence: occurrence,
                failing_pins: pins.map(|p| p.into_iter().map(str::to_string).collect()),
                target_positions: positions,
            },
            start_pattern: None,
            pre_burst_plist: None,
            plist_element_options: Vec::new(),
        }
    }

    fn decoder() -> ConcurrentTracesDecoder {
        ConcurrentTracesDecoder::new(
            DecoderCommon::new("ccr", 4),
            vec![
                entry("p1", 0, 1, None, vec![0]),
                entry("p2", 1, 1, Some(vec!["A", "B,C"]), vec![1, 2]),
                entry("p1", 0, 1, None, vec![3]),
            ],
        )
    }

    #[test]
    fn test_first_matching_entry_wins() {
        let exec = CapturedExecution::new("top").with_failures(vec![failure("p1", 0, 1, &["X"])]);
        assert_eq!(decoder().decode(&exec).expect("decode").to_string(), "1000");
    }

    #[test]
    fn test_failing_pin_groups() {
        let exec = CapturedExecution::new("top").with_failures(vec![failure("p2", 1, 1, &["C"])]);
        assert_eq!(decoder().decode(&exec).expect("decode").to_string(), "0010");
    }

    #[test]
    fn test_no_matching_entry_is_fatal() {
        let exec = CapturedExecution::new("top").with_failures(vec![failure("p2", 0, 1, &["C"])]);
        assert!(matches!(
            decoder().decode(&exec),
            Err(RecoveryError::Attribution(_))
        ));
    }

    #[test]
    fn test_pass_and_fault_are_clear() {
        let passed = CapturedExecution::new("top").with_failures(Vec::new());
        assert_eq!(decoder().decode(&passed).expect("decode").to_string(), "0000");
        let faulted = CapturedExecution::new("top")
            .with_failures(vec![failure("p1", 0, 1, &["X"])])
            .faulting("lost");
        assert_eq!(decoder().decode(&faulted).expect("decode").to_string(), "0000");
    }

    #[test]
    fn test_mask_targets() {
        let mut plists = OfflinePlists::new().with_plist("top", &["p1", "p2", "p3"]);
        let mut decoder = decoder();
        decoder.mask_configurations = vec![
            MaskTarget {
                comment: None,
                target_positions: vec![0],
                pattern_names: Vec::new(),
                options: BTreeMap::from([("Mask".to_string(), "A, B".to_string())]),
            },
            MaskTarget {
                comment: None,
                target_positions: vec![1, 2],
                pattern_names: vec!["^p[23]$".to_string()],
                options: BTreeMap::from([("Mask".to_string(), "C".to_string())]),
            },
        ];
        let mut exec = CapturedExecution::new("top");
        let pins = decoder
            .mask(&BitVector::parse("1010").expect("bits"), &mut exec, &mut plists)
            .expect("mask");
        assert_eq!(pins, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(plists.element_option("top", 1, "Mask").expect("get"), Some("C".to_string()));
        assert_eq!(plists.element_option("top", 0, "Mask").expect("get"), None);

        decoder.restore(&mut exec, &mut plists).expect("restore");
        assert_eq!(plists.element_option("top", 1, "Mask").expect("get"), None);
    }

    #[test]
    fn test_apply_plist_settings_for_start_pattern() {
        let mut plists = OfflinePlists::new().with_plist("top", &["p1", "p2", "p3"]);
        let mut decoder = decoder();
        decoder.entries[1].start_pattern = Some(StartPatternInfo {
            pattern_name: "p3".to_string(),
            pattern_occurrence: 1,
        });
        decoder.entries[1].pre_burst_plist = Some(PreBurstPlistInfo {
            patlist: None,
            pre_burst_plist: "warm".to_string(),
        });
        decoder.entries[1].plist_element_options = vec![PlistElementOption {
            patlist: None,
            index: vec![0, 1],
            options: BTreeMap::from([("Capture".to_string(), "off".to_string())]),
        }];

        let mut exec = CapturedExecution::new("top").with_start_pattern(Some(StartPattern {
            pattern_name: "p2".to_string(),
            burst: 1,
            occurrence: 1,
        }));
        decoder.apply_plist_settings(&mut exec, &mut plists).expect("apply");

        assert_eq!(exec.start_pattern.as_ref().map(|s| s.pattern_name.as_str()), Some("p3"));
        assert_eq!(plists.option("top", "PreBurstPList").expect("get"), Some("warm".to_string()));
        assert_eq!(plists.element_option("top", 1, "Capture").expect("get"), Some("off".to_string()));
        assert_eq!(plists.resolved, vec!["top".to_string()]);

        decoder.restore(&mut exec, &mut plists).expect("restore");
        assert_eq!(exec.start_pattern, None);
        assert_eq!(plists.option("top", "PreBurstPList").expect("get"), None);
        assert_eq!(plists.element_option("top", 0, "Capture").expect("get"), None);
    }

    #[test]
    fn test_apply_requires_start_pattern_control() {
        let mut plists = OfflinePlists::new().with_plist("top", &["p1"]);
        let mut exec = CapturedExecution::new("top");
        assert!(matches!(
            decoder().apply_plist_settings(&mut exec, &mut plists),
            Err(RecoveryError::UnsupportedInputType { .. })
        ));
    }
}
