// SPDX-License-Identifier: PMPL-1.0-or-later

//! Catalog documents for trackers, rules and decoders
//!
//! Files are JSON or YAML, chosen by extension.

use crate::context::RecoveryContext;
use crate::datalog::LogSink;
use crate::decoders::PinMapDecoder;
use crate::error::{RecoveryError, Result};
use crate::rules::{DefeatureRule, RuleMode, RuleType};
use crate::storage::KeyValueStore;
use crate::types::{parse_index_ranges, BitVector, TrackerDefinition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrackerFile {
    #[serde(default)]
    pub trackers: Vec<TrackerDefinition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RulesFile {
    #[serde(default)]
    pub rules: Vec<RuleDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleDocument {
    pub name: String,
    /// Tracked positions such as `0-3,5`; empty tracks the whole input.
    #[serde(default)]
    pub index: String,
    #[serde(default)]
    pub containers: Vec<ContainerDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerDocument {
    pub name: String,
    pub mode: String,
    #[serde(rename = "Type")]
    pub rule_type: String,
    pub size: u32,
    #[serde(default)]
    pub fail_when: bool,
    #[serde(default)]
    pub bit_vectors: Vec<BitVector>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DecoderFile {
    #[serde(default, rename = "PinMaps")]
    pub pin_maps: Vec<PinMapDecoder>,
}

impl RuleDocument {
    pub fn into_rule(self) -> Result<DefeatureRule> {
        let positions = if self.index.trim().is_empty() {
            Vec::new()
        } else {
            parse_index_ranges(&self.index)?
        };
        let mut rule = DefeatureRule::new(self.name, positions);

        for container in self.containers {
            let mode = RuleMode::parse(&container.mode).ok_or_else(|| {
                RecoveryError::Configuration(format!(
                    "rule [{}] container [{}] has unknown mode [{}]",
                    rule.name, container.name, container.mode
                ))
            })?;
            let rule_type = RuleType::parse(&container.rule_type).ok_or_else(|| {
                RecoveryError::Configuration(format!(
                    "rule [{}] container [{}] has unknown type [{}]",
                    rule.name, container.name, container.rule_type
                ))
            })?;
            if !rule.tracked_positions.is_empty() {
                let width = rule.tracked_positions.len();
                if let Some(bad) = container.bit_vectors.iter().find(|v| v.len() != width) {
                    return Err(RecoveryError::wrong_size(
                        format!("rule [{}] container [{}] vector [{}]", rule.name, container.name, bad),
                        width,
                        bad.len(),
                    ));
                }
            }
            rule.add(
                mode,
                &container.name,
                container.size,
                rule_type,
                container.bit_vectors,
                container.fail_when,
            );
        }
        Ok(rule)
    }
}

pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(serde_json::from_str(&content)?),
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
        _ => Err(RecoveryError::Configuration(format!(
            "catalog {} must be json/yaml/yml",
            path.display()
        ))),
    }
}

pub fn load_trackers(path: &Path) -> Result<Vec<TrackerDefinition>> {
    Ok(read_document::<TrackerFile>(path)?.trackers)
}

pub fn load_rules(path: &Path) -> Result<Vec<DefeatureRule>> {
    read_document::<RulesFile>(path)?
        .rules
        .into_iter()
        .map(RuleDocument::into_rule)
        .collect()
}

pub fn load_decoders(path: &Path) -> Result<Vec<PinMapDecoder>> {
    Ok(read_document::<DecoderFile>(path)?.pin_maps)
}

/// Catalog paths handed to [`install`]; any may be absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogPaths<'a> {
    pub trackers: Option<&'a Path>,
    pub rules: Option<&'a Path>,
    pub decoders: Option<&'a Path>,
}

/// Load every given catalog into `ctx`.
pub fn install<S: KeyValueStore, L: LogSink>(
    ctx: &mut RecoveryContext<S, L>,
    paths: CatalogPaths<'_>,
) -> Result<()> {
    if let Some(path) = paths.trackers {
        ctx.load_trackers(load_trackers(path)?)?;
    }
    if let Some(path) = paths.rules {
        for rule in load_rules(path)? {
            ctx.register_rule(rule);
        }
    }
    if let Some(path) = paths.decoders {
        for decoder in load_decoders(path)? {
            ctx.register_decoder(decoder);
        }
    }
    Ok(())
}
