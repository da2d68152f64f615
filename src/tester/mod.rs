// SPDX-License-Identifier: PMPL-1.0-or-later

//! Boundary contracts for the tester collaborators
//!
//! The engine never talks to hardware directly. Execution results, pattern
//! lists, and pattern-configuration writes all come through these traits, so
//! the same decoders run against a live tester or against offline captures.

pub mod offline;

use crate::error::{CaptureFault, Result};
use crate::storage::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use offline::{CapturedExecution, OfflinePlists, RecordingPatConfig};

/// One captured failing cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FailureRecord {
    pub pattern_name: String,
    /// Occurrence of the pattern within the executed list, starting at 1.
    pub instance_id: u64,
    #[serde(default)]
    pub burst_index: u64,
    #[serde(default)]
    pub domain_name: String,
    #[serde(default)]
    pub parent_plist: String,
    #[serde(default)]
    pub failing_pins: Vec<String>,
    /// Label executed immediately before the failing vector.
    #[serde(default)]
    pub previous_label: String,
}

/// One executed pattern from a per-pattern trace capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CtvPatternTrace {
    pub pattern_name: String,
    pub instance_id: u64,
    #[serde(default)]
    pub burst_index: u64,
    pub parent_plist: String,
}

/// Pattern name plus its occurrence inside a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PatternOccurrence {
    pub pattern_name: String,
    pub occurrence: u64,
}

/// Where the next execution starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartPattern {
    pub pattern_name: String,
    #[serde(default)]
    pub burst: u64,
    #[serde(default = "first_occurrence")]
    pub occurrence: u64,
}

fn first_occurrence() -> u64 {
    1
}

pub trait FailureCapture {
    fn per_cycle_failures(&self) -> std::result::Result<Vec<FailureRecord>, CaptureFault>;
    fn failing_pins(&self) -> std::result::Result<Vec<String>, CaptureFault>;
}

pub trait CtvCapture {
    fn ctv_per_pattern(&self) -> std::result::Result<Vec<CtvPatternTrace>, CaptureFault>;
}

pub trait StartPatternControl {
    fn start_pattern(&self) -> Option<StartPattern>;
    fn set_start_pattern(&mut self, start: &StartPattern);
    fn reset_start_pattern(&mut self);
    /// Start points for concurrently running sub-program lists, keyed by list name.
    fn set_concurrent_start_patterns(&mut self, starts: &BTreeMap<String, PatternOccurrence>);
}

/// A completed (or about to run) test execution.
///
/// Capabilities are optional; decoders that need one report
/// `UnsupportedInputType` when it is missing.
pub trait ExecutionResult {
    fn plist_name(&self) -> &str;

    fn failure_capture(&self) -> Option<&dyn FailureCapture> {
        None
    }

    fn ctv_capture(&self) -> Option<&dyn CtvCapture> {
        None
    }

    fn start_pattern_control(&mut self) -> Option<&mut dyn StartPatternControl> {
        None
    }

    fn set_pin_mask(&mut self, pins: &[String]);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlistItem {
    pub index: u32,
    pub name: String,
    pub is_pattern: bool,
}

/// Pattern-list lookup and mutation.
pub trait PlistService {
    /// Whether `pattern` is a pre/post-amble of `plist`.
    fn is_amble(&self, plist: &str, pattern: &str) -> std::result::Result<bool, CaptureFault>;
    fn contents(&self, plist: &str) -> Result<Vec<PlistItem>>;
    fn element_option(&self, plist: &str, index: u32, key: &str) -> Result<Option<String>>;
    fn set_element_option(&mut self, plist: &str, index: u32, key: &str, value: &str) -> Result<()>;
    fn remove_element_option(&mut self, plist: &str, index: u32, key: &str) -> Result<()>;
    fn option(&self, plist: &str, key: &str) -> Result<Option<String>>;
    fn set_option(&mut self, plist: &str, key: &str, value: &str) -> Result<()>;
    fn remove_option(&mut self, plist: &str, key: &str) -> Result<()>;
    fn resolve(&mut self, plist: &str) -> Result<()>;
    fn enable_ctv_capture(&mut self, plist: &str, pattern: &str, domain: &str) -> Result<()>;
}

/// Opaque handle to one pattern-configuration write target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatConfigHandle {
    pub id: u64,
    pub config: String,
    pub plist: Option<String>,
}

pub trait PatConfigService {
    fn create_handle(&mut self, config: &str, plist: Option<&str>) -> Result<PatConfigHandle>;
    fn set_data(&mut self, handle: &PatConfigHandle, data: &str) -> Result<()>;
    /// Fire-and-forget: the outcome of the write belongs to the service.
    fn apply(&mut self, handles: &[PatConfigHandle]);
}

/// Collaborators passed into aggregator and decoder operations.
pub struct TesterServices<'a> {
    pub plists: &'a mut dyn PlistService,
    pub pat_config: &'a mut dyn PatConfigService,
    pub store: &'a mut dyn KeyValueStore,
}

impl<'a> TesterServices<'a> {
    pub fn new(
        plists: &'a mut dyn PlistService,
        pat_config: &'a mut dyn PatConfigService,
        store: &'a mut dyn KeyValueStore,
    ) -> Self {
        Self {
            plists,
            pat_config,
            store,
        }
    }
}
