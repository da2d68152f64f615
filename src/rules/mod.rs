// SPDX-License-Identifier: PMPL-1.0-or-later

//! Defeature rules: which hardware configurations remain valid for a set of failures
//!
//! A rule holds containers of reference vectors. A reference vector covers
//! the observed failures when every failed slice is also disabled in it.

pub mod engine;

use crate::error::{RecoveryError, Result};
use crate::types::BitVector;
use serde::{Deserialize, Serialize};

pub use engine::{is_pass, PassOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleType {
    FullyFeatured,
    Recovery,
    FuseDown,
    FuseOnly,
}

impl RuleType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "fullyfeatured" => Some(RuleType::FullyFeatured),
            "recovery" => Some(RuleType::Recovery),
            "fusedown" => Some(RuleType::FuseDown),
            "fuseonly" => Some(RuleType::FuseOnly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::FullyFeatured => "FullyFeatured",
            RuleType::Recovery => "Recovery",
            RuleType::FuseDown => "FuseDown",
            RuleType::FuseOnly => "FuseOnly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleMode {
    ValidCombinations,
}

impl RuleMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "validcombinations" => Some(RuleMode::ValidCombinations),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleMode::ValidCombinations => "ValidCombinations",
        }
    }
}

/// A named group of reference vectors sharing a size and type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleContainer {
    pub name: String,
    pub size: u32,
    pub mode: RuleMode,
    pub rule_type: RuleType,
    /// Report the vectors that do not cover the failures instead of those that do.
    pub fail_when: bool,
    pub values: Vec<BitVector>,
}

/// One reference vector reported by [`DefeatureRule::passing_configurations`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMatch {
    pub name: String,
    pub bit_vector: BitVector,
    pub size: u32,
    pub rule_type: RuleType,
    pub mode: RuleMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefeatureRule {
    pub name: String,
    /// Tracker positions the reference vectors describe.
    pub tracked_positions: Vec<usize>,
    pub containers: Vec<RuleContainer>,
}

impl DefeatureRule {
    pub fn new(name: impl Into<String>, tracked_positions: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            tracked_positions,
            containers: Vec::new(),
        }
    }

    pub fn add(
        &mut self,
        mode: RuleMode,
        name: &str,
        size: u32,
        rule_type: RuleType,
        values: Vec<BitVector>,
        fail_when: bool,
    ) {
        self.containers.push(RuleContainer {
            name: name.to_string(),
            size,
            mode,
            rule_type,
            fail_when,
            values,
        });
    }

    /// Restrict a full tracker vector to this rule's tracked positions.
    ///
    /// A vector already as wide as the tracked-position list is taken as is.
    pub fn project(&self, fail_bits: &BitVector) -> Result<BitVector> {
        if self.tracked_positions.is_empty() || fail_bits.len() == self.tracked_positions.len() {
            return Ok(fail_bits.clone());
        }
        self.tracked_positions
            .iter()
            .map(|&position| {
                fail_bits.get(position).ok_or_else(|| {
                    RecoveryError::wrong_size(
                        format!("rule [{}] tracked position {}", self.name, position),
                        position + 1,
                        fail_bits.len(),
                    )
                })
            })
            .collect()
    }
}
