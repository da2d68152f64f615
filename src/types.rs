// SPDX-License-Identifier: PMPL-1.0-or-later

//! Core type definitions shared by trackers, decoders, and rules

use crate::error::{RecoveryError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Index;
use std::str::FromStr;

/// Fixed-length ordered sequence of pass/fail flags, one per slice.
///
/// Serializes as a string of `0`/`1` characters in index order, so bit 0 is
/// the first character.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BitVector {
    bits: Vec<bool>,
}

impl BitVector {
    /// All-clear vector of `len` bits.
    pub fn new(len: usize) -> Self {
        Self::filled(len, false)
    }

    pub fn filled(len: usize, value: bool) -> Self {
        Self {
            bits: vec![value; len],
        }
    }

    pub fn from_bits(bits: Vec<bool>) -> Self {
        Self { bits }
    }

    /// Strict parse: every character must be `0` or `1`.
    pub fn parse(value: &str) -> Result<Self> {
        value
            .chars()
            .map(|c| match c {
                '0' => Ok(false),
                '1' => Ok(true),
                other => Err(RecoveryError::Argument(format!(
                    "invalid bit character [{}] in [{}]",
                    other, value
                ))),
            })
            .collect::<Result<Vec<_>>>()
            .map(Self::from_bits)
    }

    /// Lenient parse used for externally stored masks: `1` is set, anything else is clear.
    pub fn from_mask_str(value: &str) -> Self {
        value.chars().map(|c| c == '1').collect()
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<bool> {
        self.bits.get(index).copied()
    }

    /// Sets bit `index`. Panics if `index` is out of range, like slice indexing.
    pub fn set(&mut self, index: usize, value: bool) {
        self.bits[index] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.bits.iter().copied()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.bits
    }

    pub fn all_set(&self) -> bool {
        self.bits.iter().all(|b| *b)
    }

    pub fn any_set(&self) -> bool {
        self.bits.iter().any(|b| *b)
    }

    pub fn count_set(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// Indices of set bits, ascending.
    pub fn set_indices(&self) -> Vec<usize> {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.then_some(i))
            .collect()
    }

    fn ensure_same_len(&self, other: &BitVector, context: &str) -> Result<()> {
        if self.len() != other.len() {
            return Err(RecoveryError::wrong_size(context, self.len(), other.len()));
        }
        Ok(())
    }

    /// True when every bit set here is also set in `other`.
    pub fn is_subset_of(&self, other: &BitVector) -> Result<bool> {
        self.ensure_same_len(other, "subset comparison")?;
        Ok(self.iter().zip(other.iter()).all(|(a, b)| !a || b))
    }

    pub fn or(&self, other: &BitVector) -> Result<BitVector> {
        self.ensure_same_len(other, "merge")?;
        Ok(self.iter().zip(other.iter()).map(|(a, b)| a || b).collect())
    }

    /// In-place OR; lengths must match.
    pub fn or_assign(&mut self, other: &BitVector) -> Result<()> {
        self.ensure_same_len(other, "merge")?;
        for (mine, theirs) in self.bits.iter_mut().zip(other.iter()) {
            *mine |= theirs;
        }
        Ok(())
    }

    /// True when `candidate` sets a bit that is clear here.
    pub fn is_broadened_by(&self, candidate: &BitVector) -> bool {
        candidate
            .iter()
            .enumerate()
            .any(|(i, b)| b && !self.get(i).unwrap_or(false))
    }

    pub fn slice(&self, offset: usize, len: usize) -> Result<BitVector> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.len())
            .ok_or_else(|| RecoveryError::wrong_size("slice", offset.saturating_add(len), self.len()))?;
        Ok(Self::from_bits(self.bits[offset..end].to_vec()))
    }

    pub fn concat<'a>(parts: impl IntoIterator<Item = &'a BitVector>) -> BitVector {
        parts
            .into_iter()
            .flat_map(|part| part.bits.iter().copied())
            .collect()
    }

    pub fn to_bit_string(&self) -> String {
        self.bits.iter().map(|b| if *b { '1' } else { '0' }).collect()
    }
}

impl fmt::Display for BitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_bit_string())
    }
}

impl FromStr for BitVector {
    type Err = RecoveryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl FromIterator<bool> for BitVector {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        Self::from_bits(iter.into_iter().collect())
    }
}

impl Index<usize> for BitVector {
    type Output = bool;

    fn index(&self, index: usize) -> &bool {
        &self.bits[index]
    }
}

impl Serialize for BitVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_bit_string())
    }
}

impl<'de> Deserialize<'de> for BitVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        BitVector::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// How a tracker update combines with persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum UpdateMode {
    #[default]
    Merge,
    #[serde(alias = "OverWrite")]
    Overwrite,
}

impl UpdateMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "merge" => Some(UpdateMode::Merge),
            "overwrite" => Some(UpdateMode::Overwrite),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateMode::Merge => "merge",
            UpdateMode::Overwrite => "overwrite",
        }
    }
}

/// Kind of external source a mask token is resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputType {
    Literal,
    SharedStorage,
    Gsds,
    UserVar,
}

impl InputType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "literal" => Some(InputType::Literal),
            "sharedstorage" | "shared-storage" => Some(InputType::SharedStorage),
            "gsds" => Some(InputType::Gsds),
            "uservar" | "user-var" => Some(InputType::UserVar),
            _ => None,
        }
    }
}

/// Global permission for state-broadening tracker updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownBinPolicy {
    Allowed,
    Disallowed,
    /// A finite number of broadening updates.
    Limited(u32),
}

impl DownBinPolicy {
    /// Accepts `allowed`, `disallowed`, or a non-negative count.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "allowed" | "true" => Some(DownBinPolicy::Allowed),
            "disallowed" | "false" => Some(DownBinPolicy::Disallowed),
            other => other.parse::<u32>().ok().map(DownBinPolicy::Limited),
        }
    }

    /// Stored budget counter: `-1` unlimited, otherwise remaining count.
    pub fn budget(&self) -> i64 {
        match self {
            DownBinPolicy::Allowed => -1,
            DownBinPolicy::Disallowed => 0,
            DownBinPolicy::Limited(count) => i64::from(*count),
        }
    }
}

/// Catalog entry for one persistent tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrackerDefinition {
    pub name: String,
    pub size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_value: Option<String>,
    #[serde(default, alias = "LinkOnDisable")]
    pub link_disable: Vec<String>,
}

impl TrackerDefinition {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            initial_value: None,
            link_disable: Vec::new(),
        }
    }

    pub fn with_links(mut self, links: &[&str]) -> Self {
        self.link_disable = links.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Value a host resets this tracker to; all-pass unless configured.
    pub fn initial_value(&self) -> String {
        self.initial_value
            .clone()
            .unwrap_or_else(|| "0".repeat(self.size))
    }
}

/// Parse a position list such as `0-3,5,8-9`.
pub fn parse_index_ranges(value: &str) -> Result<Vec<usize>> {
    let mut indices = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let bad = || RecoveryError::Argument(format!("invalid index range [{}]", part));
        match part.split_once('-') {
            Some((start, end)) => {
                let start: usize = start.trim().parse().map_err(|_| bad())?;
                let end: usize = end.trim().parse().map_err(|_| bad())?;
                if end < start {
                    return Err(bad());
                }
                indices.extend(start..=end);
            }
            None => indices.push(part.parse().map_err(|_| bad())?),
        }
    }
    Ok(indices)
}
