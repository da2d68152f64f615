// SPDX-License-Identifier: PMPL-1.0-or-later

//! Offline collaborators: replay captured executions without a tester

use super::*;
use crate::error::RecoveryError;
use std::collections::{BTreeSet, HashMap};

/// A recorded execution result, loadable from JSON or YAML.
///
/// `Failures: null` models an execution without per-cycle capture support;
/// `Ctv: null` one without per-pattern trace capture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapturedExecution {
    pub plist: String,
    #[serde(default)]
    pub failures: Option<Vec<FailureRecord>>,
    /// Overrides the failing pins derived from `failures`.
    #[serde(default)]
    pub failing_pins: Vec<String>,
    #[serde(default)]
    pub ctv: Option<Vec<CtvPatternTrace>>,
    /// When set, every capture retrieval faults with this message.
    #[serde(default)]
    pub capture_fault: Option<String>,
    #[serde(default)]
    pub supports_start_pattern: bool,
    #[serde(default)]
    pub start_pattern: Option<StartPattern>,
    #[serde(skip)]
    pub masked_pins: Vec<String>,
    #[serde(skip)]
    pub concurrent_starts: BTreeMap<String, PatternOccurrence>,
}

impl CapturedExecution {
    pub fn new(plist: impl Into<String>) -> Self {
        Self {
            plist: plist.into(),
            ..Self::default()
        }
    }

    pub fn with_failures(mut self, failures: Vec<FailureRecord>) -> Self {
        self.failures = Some(failures);
        self
    }

    pub fn with_ctv(mut self, ctv: Vec<CtvPatternTrace>) -> Self {
        self.ctv = Some(ctv);
        self
    }

    pub fn with_start_pattern(mut self, start: Option<StartPattern>) -> Self {
        self.supports_start_pattern = true;
        self.start_pattern = start;
        self
    }

    pub fn faulting(mut self, message: &str) -> Self {
        self.capture_fault = Some(message.to_string());
        self
    }

    fn check_fault(&self) -> std::result::Result<(), CaptureFault> {
        match &self.capture_fault {
            Some(message) => Err(CaptureFault(message.clone())),
            None => Ok(()),
        }
    }
}

impl FailureCapture for CapturedExecution {
    fn per_cycle_failures(&self) -> std::result::Result<Vec<FailureRecord>, CaptureFault> {
        self.check_fault()?;
        Ok(self.failures.clone().unwrap_or_default())
    }

    fn failing_pins(&self) -> std::result::Result<Vec<String>, CaptureFault> {
        self.check_fault()?;
        if !self.failing_pins.is_empty() {
            return Ok(self.failing_pins.clone());
        }
        let mut pins: Vec<String> = Vec::new();
        for record in self.failures.iter().flatten() {
            for pin in &record.failing_pins {
                if !pins.contains(pin) {
                    pins.push(pin.clone());
                }
            }
        }
        Ok(pins)
    }
}

impl CtvCapture for CapturedExecution {
    fn ctv_per_pattern(&self) -> std::result::Result<Vec<CtvPatternTrace>, CaptureFault> {
        self.check_fault()?;
        Ok(self.ctv.clone().unwrap_or_default())
    }
}

impl StartPatternControl for CapturedExecution {
    fn start_pattern(&self) -> Option<StartPattern> {
        self.start_pattern.clone()
    }

    fn set_start_pattern(&mut self, start: &StartPattern) {
        self.start_pattern = Some(start.clone());
    }

    fn reset_start_pattern(&mut self) {
        self.start_pattern = None;
    }

    fn set_concurrent_start_patterns(&mut self, starts: &BTreeMap<String, PatternOccurrence>) {
        self.concurrent_starts = starts.clone();
    }
}

impl ExecutionResult for CapturedExecution {
    fn plist_name(&self) -> &str {
        &self.plist
    }

    fn failure_capture(&self) -> Option<&dyn FailureCapture> {
        self.failures.as_ref().map(|_| self as &dyn FailureCapture)
    }

    fn ctv_capture(&self) -> Option<&dyn CtvCapture> {
        self.ctv.as_ref().map(|_| self as &dyn CtvCapture)
    }

    fn start_pattern_control(&mut self) -> Option<&mut dyn StartPatternControl> {
        if self.supports_start_pattern {
            Some(self as &mut dyn StartPatternControl)
        } else {
            None
        }
    }

    fn set_pin_mask(&mut self, pins: &[String]) {
        self.masked_pins = pins.to_vec();
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OfflinePlist {
    pub items: Vec<PlistItem>,
    #[serde(default)]
    pub ambles: BTreeSet<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub element_options: BTreeMap<u32, BTreeMap<String, String>>,
}

/// In-memory pattern lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OfflinePlists {
    pub plists: BTreeMap<String, OfflinePlist>,
    #[serde(skip)]
    pub resolved: Vec<String>,
    #[serde(skip)]
    pub ctv_enabled: Vec<(String, String, String)>,
}

impl OfflinePlists {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a list whose items are patterns, or sub-lists when prefixed with `@`.
    pub fn with_plist(mut self, name: &str, items: &[&str]) -> Self {
        let items = items
            .iter()
            .enumerate()
            .map(|(index, item)| PlistItem {
                index: index as u32,
                name: item.trim_start_matches('@').to_string(),
                is_pattern: !item.starts_with('@'),
            })
            .collect();
        self.plists.insert(
            name.to_string(),
            OfflinePlist {
                items,
                ..OfflinePlist::default()
            },
        );
        self
    }

    pub fn with_amble(mut self, plist: &str, pattern: &str) -> Self {
        if let Some(entry) = self.plists.get_mut(plist) {
            entry.ambles.insert(pattern.to_string());
        }
        self
    }

    fn plist(&self, name: &str) -> Result<&OfflinePlist> {
        self.plists
            .get(name)
            .ok_or_else(|| RecoveryError::not_found("plist", name))
    }

    fn plist_mut(&mut self, name: &str) -> Result<&mut OfflinePlist> {
        self.plists
            .get_mut(name)
            .ok_or_else(|| RecoveryError::not_found("plist", name))
    }
}

impl PlistService for OfflinePlists {
    fn is_amble(&self, plist: &str, pattern: &str) -> std::result::Result<bool, CaptureFault> {
        self.plists
            .get(plist)
            .map(|entry| entry.ambles.contains(pattern))
            .ok_or_else(|| CaptureFault(format!("plist [{}] not loaded", plist)))
    }

    fn contents(&self, plist: &str) -> Result<Vec<PlistItem>> {
        Ok(self.plist(plist)?.items.clone())
    }

    fn element_option(&self, plist: &str, index: u32, key: &str) -> Result<Option<String>> {
        Ok(self
            .plist(plist)?
            .element_options
            .get(&index)
            .and_then(|options| options.get(key))
            .cloned())
    }

    fn set_element_option(&mut self, plist: &str, index: u32, key: &str, value: &str) -> Result<()> {
        self.plist_mut(plist)?
            .element_options
            .entry(index)
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_element_option(&mut self, plist: &str, index: u32, key: &str) -> Result<()> {
        if let Some(options) = self.plist_mut(plist)?.element_options.get_mut(&index) {
            options.remove(key);
        }
        Ok(())
    }

    fn option(&self, plist: &str, key: &str) -> Result<Option<String>> {
        Ok(self.plist(plist)?.options.get(key).cloned())
    }

    fn set_option(&mut self, plist: &str, key: &str, value: &str) -> Result<()> {
        self.plist_mut(plist)?
            .options
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_option(&mut self, plist: &str, key: &str) -> Result<()> {
        self.plist_mut(plist)?.options.remove(key);
        Ok(())
    }

    fn resolve(&mut self, plist: &str) -> Result<()> {
        self.plist(plist)?;
        self.resolved.push(plist.to_string());
        Ok(())
    }

    fn enable_ctv_capture(&mut self, plist: &str, pattern: &str, domain: &str) -> Result<()> {
        self.ctv_enabled
            .push((plist.to_string(), pattern.to_string(), domain.to_string()));
        Ok(())
    }
}

/// Pattern-configuration service that records writes instead of performing them.
#[derive(Debug, Default)]
pub struct RecordingPatConfig {
    next_id: u64,
    data: HashMap<u64, String>,
    /// Number of handles created so far.
    pub created: usize,
    /// Each `apply` call as `(config, plist, data)` triples.
    pub applied: Vec<Vec<(String, Option<String>, String)>>,
}

impl RecordingPatConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PatConfigService for RecordingPatConfig {
    fn create_handle(&mut self, config: &str, plist: Option<&str>) -> Result<PatConfigHandle> {
        self.next_id += 1;
        self.created += 1;
        Ok(PatConfigHandle {
            id: self.next_id,
            config: config.to_string(),
            plist: plist.map(str::to_string),
        })
    }

    fn set_data(&mut self, handle: &PatConfigHandle, data: &str) -> Result<()> {
        self.data.insert(handle.id, data.to_string());
        Ok(())
    }

    fn apply(&mut self, handles: &[PatConfigHandle]) {
        let batch = handles
            .iter()
            .map(|handle| {
                (
                    handle.config.clone(),
                    handle.plist.clone(),
                    self.data.get(&handle.id).cloned().unwrap_or_default(),
                )
            })
            .collect();
        self.applied.push(batch);
    }
}
