// SPDX-License-Identifier: PMPL-1.0-or-later

//! Pin-map decoders: raw failure evidence in, fixed-width fail vectors out
//!
//! The decoder set is closed and declared by configuration, so dispatch is a
//! match over [`PinMapDecoder`] rather than a trait object.

pub mod any_fail;
pub mod atom;
pub mod concurrent_plist;
pub mod concurrent_traces;
pub mod pin_to_slice;
pub mod plist_tree;

use crate::error::{RecoveryError, Result};
use crate::storage::{KeyValueStore, Scope};
use crate::tester::{ExecutionResult, PatConfigHandle, PatConfigService, TesterServices};
use crate::types::BitVector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

pub use any_fail::AnyFailSingleSliceDecoder;
pub use atom::{AtomContent, AtomDecoder};
pub use concurrent_plist::{ConcurrentPlist, ConcurrentPlistDecoder};
pub use concurrent_traces::ConcurrentTracesDecoder;
pub use pin_to_slice::PinToSliceIndexDecoder;
pub use plist_tree::PlistTree;

/// Pattern-configuration handles keyed by `(configuration, plist)`.
///
/// A handle is created once per key and reused for the owner's lifetime,
/// whatever the outcome of later applies.
#[derive(Debug, Clone, Default)]
pub struct HandleCache {
    handles: HashMap<(String, Option<String>), PatConfigHandle>,
}

impl HandleCache {
    pub fn get_or_create(
        &mut self,
        service: &mut dyn PatConfigService,
        config: &str,
        plist: Option<&str>,
    ) -> Result<PatConfigHandle> {
        let plist = plist.filter(|p| !p.trim().is_empty());
        let key = (config.to_string(), plist.map(str::to_string));
        if let Some(handle) = self.handles.get(&key) {
            return Ok(handle.clone());
        }
        let handle = service.create_handle(config, plist)?;
        self.handles.insert(key, handle.clone());
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Fields every decoder variant carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DecoderCommon {
    pub name: String,
    pub size: usize,
    /// Pattern-configuration name written by slice-control applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_modify: Option<String>,
    /// DUT-scope storage key that receives each decode result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_storage_results: Option<String>,
    #[serde(skip)]
    pub handles: HandleCache,
}

impl DecoderCommon {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            ..Self::default()
        }
    }

    pub fn check_size(&self, bits: &BitVector, operation: &str) -> Result<()> {
        if bits.len() != self.size {
            return Err(RecoveryError::wrong_size(
                format!("{} [{}]", operation, self.name),
                self.size,
                bits.len(),
            ));
        }
        Ok(())
    }

    pub fn unsupported(&self, capability: &'static str) -> RecoveryError {
        RecoveryError::UnsupportedInputType {
            decoder: self.name.clone(),
            capability,
        }
    }

    /// Write `bits` to the configured pattern-modify handle for `plist`.
    pub fn slice_control_handle(
        &mut self,
        bits: &BitVector,
        plist: Option<&str>,
        service: &mut dyn PatConfigService,
    ) -> Result<PatConfigHandle> {
        let config = self.pattern_modify.clone().ok_or_else(|| {
            RecoveryError::Configuration(format!(
                "decoder [{}] has no PatternModify configured",
                self.name
            ))
        })?;
        let handle = self.handles.get_or_create(service, &config, plist)?;
        service.set_data(&handle, &bits.to_bit_string())?;
        Ok(handle)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum PinMapDecoder {
    #[serde(rename = "PinToSliceIndexDecoder")]
    PinToSliceIndex(PinToSliceIndexDecoder),
    #[serde(rename = "AnyFailSingleSliceDecoder")]
    AnyFailSingleSlice(AnyFailSingleSliceDecoder),
    #[serde(rename = "AtomDecoder")]
    Atom(AtomDecoder),
    #[serde(rename = "ConcurrentPlistDecoder")]
    ConcurrentPlist(ConcurrentPlistDecoder),
    #[serde(rename = "ConcurrentTracesDecoder")]
    ConcurrentTraces(ConcurrentTracesDecoder),
}

impl PinMapDecoder {
    pub fn common(&self) -> &DecoderCommon {
        match self {
            PinMapDecoder::PinToSliceIndex(d) => &d.common,
            PinMapDecoder::AnyFailSingleSlice(d) => &d.common,
            PinMapDecoder::Atom(d) => &d.common,
            PinMapDecoder::ConcurrentPlist(d) => &d.common,
            PinMapDecoder::ConcurrentTraces(d) => &d.common,
        }
    }

    fn common_mut(&mut self) -> &mut DecoderCommon {
        match self {
            PinMapDecoder::PinToSliceIndex(d) => &mut d.common,
            PinMapDecoder::AnyFailSingleSlice(d) => &mut d.common,
            PinMapDecoder::Atom(d) => &mut d.common,
            PinMapDecoder::ConcurrentPlist(d) => &mut d.common,
            PinMapDecoder::ConcurrentTraces(d) => &mut d.common,
        }
    }

    pub fn name(&self) -> &str {
        &self.common().name
    }

    pub fn size(&self) -> usize {
        self.common().size
    }

    /// Stable discriminator, matching the catalog `Type` tag.
    pub fn decoder_kind(&self) -> &'static str {
        match self {
            PinMapDecoder::PinToSliceIndex(_) => "PinToSliceIndexDecoder",
            PinMapDecoder::AnyFailSingleSlice(_) => "AnyFailSingleSliceDecoder",
            PinMapDecoder::Atom(_) => "AtomDecoder",
            PinMapDecoder::ConcurrentPlist(_) => "ConcurrentPlistDecoder",
            PinMapDecoder::ConcurrentTraces(_) => "ConcurrentTracesDecoder",
        }
    }

    /// Pins this decoder never masks itself; the aggregator adds them back.
    pub fn doa_pins(&self) -> &[String] {
        match self {
            PinMapDecoder::PinToSliceIndex(d) => &d.doa_pins,
            _ => &[],
        }
    }

    /// Fail vector of width [`size`](Self::size) for one execution.
    pub fn decode(&mut self, exec: &dyn ExecutionResult, current_slice: Option<usize>) -> Result<BitVector> {
        let result = match self {
            PinMapDecoder::PinToSliceIndex(d) => d.decode(exec)?,
            PinMapDecoder::AnyFailSingleSlice(d) => d.decode(exec, current_slice)?,
            PinMapDecoder::Atom(d) => d.decode(exec)?,
            PinMapDecoder::ConcurrentPlist(d) => d.decode(exec)?,
            PinMapDecoder::ConcurrentTraces(d) => d.decode(exec)?,
        };
        debug!(
            decoder = %self.name(),
            kind = self.decoder_kind(),
            result = %result,
            "decoded failures"
        );
        Ok(result)
    }

    /// Pins to exclude for the disabled slices in `bits`.
    pub fn mask_from_tracker(
        &mut self,
        bits: &BitVector,
        exec: &mut dyn ExecutionResult,
        services: &mut TesterServices<'_>,
    ) -> Result<Vec<String>> {
        self.common().check_size(bits, "mask")?;
        match self {
            PinMapDecoder::PinToSliceIndex(d) => Ok(d.mask(bits)),
            PinMapDecoder::AnyFailSingleSlice(_) => Ok(Vec::new()),
            PinMapDecoder::Atom(d) => d.mask(bits, &mut *services.pat_config),
            PinMapDecoder::ConcurrentPlist(d) => d.mask(bits, exec),
            PinMapDecoder::ConcurrentTraces(d) => d.mask(bits, exec, &mut *services.plists),
        }
    }

    pub fn apply_plist_settings(
        &mut self,
        bits: &BitVector,
        exec: &mut dyn ExecutionResult,
        services: &mut TesterServices<'_>,
    ) -> Result<()> {
        self.common().check_size(bits, "plist settings")?;
        match self {
            PinMapDecoder::ConcurrentTraces(d) => d.apply_plist_settings(exec, &mut *services.plists),
            _ => Ok(()),
        }
    }

    pub fn restore(&mut self, exec: &mut dyn ExecutionResult, services: &mut TesterServices<'_>) -> Result<()> {
        match self {
            PinMapDecoder::ConcurrentPlist(d) => {
                d.restore();
                Ok(())
            }
            PinMapDecoder::ConcurrentTraces(d) => d.restore(exec, &mut *services.plists),
            _ => Ok(()),
        }
    }

    pub fn verify(&mut self, services: &mut TesterServices<'_>) -> Result<()> {
        match self {
            PinMapDecoder::ConcurrentPlist(d) => d.verify(&mut *services.plists),
            _ => Ok(()),
        }
    }

    /// Handle carrying this decoder's slice-control value for `bits`.
    pub fn pat_config_for_slice_control(
        &mut self,
        bits: &BitVector,
        plist: Option<&str>,
        service: &mut dyn PatConfigService,
    ) -> Result<PatConfigHandle> {
        self.common().check_size(bits, "pattern configuration")?;
        if let PinMapDecoder::Atom(_) = self {
            return Err(RecoveryError::NotImplemented(format!(
                "slice-control pattern configuration for {}",
                self.decoder_kind()
            )));
        }
        self.common_mut().slice_control_handle(bits, plist, service)
    }

    /// Publish `results` under the configured shared-storage key, if any.
    pub fn save_results(&self, results: &BitVector, store: &mut dyn KeyValueStore) {
        if let Some(key) = self.common().shared_storage_results.as_deref().filter(|k| !k.is_empty()) {
            store.put_string(key, results.to_bit_string(), Scope::Dut);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tester::RecordingPatConfig;

    #[test]
    fn test_handle_cache_reuses_handles() {
        let mut service = RecordingPatConfig::new();
        let mut cache = HandleCache::default();
        let first = cache.get_or_create(&mut service, "cfg", Some("plA")).expect("create");
        let again = cache.get_or_create(&mut service, "cfg", Some("plA")).expect("cached");
        let other = cache.get_or_create(&mut service, "cfg", None).expect("create");
        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(service.created, 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_decoder_catalog_tags() {
        let json = r#"{"Type":"AnyFailSingleSliceDecoder","Name":"any","Size":1,"PinList":["P1"]}"#;
        let decoder: PinMapDecoder = serde_json::from_str(json).expect("parse");
        assert_eq!(decoder.decoder_kind(), "AnyFailSingleSliceDecoder");
        assert_eq!(decoder.name(), "any");
        assert_eq!(decoder.size(), 1);
    }

    #[test]
    fn test_atom_has_no_slice_control_value() {
        let json = r#"{"Type":"AtomDecoder","Name":"atom","Size":4,"Pin":"TDO","Module":0,"Content":"ARRAY","PatternModify":"cfg"}"#;
        let mut decoder: PinMapDecoder = serde_json::from_str(json).expect("parse");
        let mut service = RecordingPatConfig::new();
        let err = decoder
            .pat_config_for_slice_control(&BitVector::new(4), None, &mut service)
            .unwrap_err();
        assert!(matches!(err, RecoveryError::NotImplemented(_)));
    }

    #[test]
    fn test_missing_pattern_modify_is_configuration_error() {
        let json = r#"{"Type":"PinToSliceIndexDecoder","Name":"p2s","Size":1,"PinToSliceIndexMap":{"P1":[0]}}"#;
        let mut decoder: PinMapDecoder = serde_json::from_str(json).expect("parse");
        let mut service = RecordingPatConfig::new();
        let err = decoder
            .pat_config_for_slice_control(&BitVector::new(1), None, &mut service)
            .unwrap_err();
        assert!(matches!(err, RecoveryError::Configuration(_)));
    }
}
