// SPDX-License-Identifier: PMPL-1.0-or-later

//! Persistent key/value storage for tracker state and the down-bin budget

use crate::error::{RecoveryError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Storage scope a row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    Dut,
    Lot,
    Ip,
}

impl Scope {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_uppercase().as_str() {
            "DUT" => Some(Scope::Dut),
            "LOT" => Some(Scope::Lot),
            "IP" => Some(Scope::Ip),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Dut => "DUT",
            Scope::Lot => "LOT",
            Scope::Ip => "IP",
        }
    }
}

/// Whether a row is cleared at the host's reset boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResetPolicy {
    #[default]
    Default,
    NeverReset,
}

/// String/integer rows keyed by `(scope, key)`.
///
/// Implementations own any cross-device serialization; the engine performs
/// one read-modify-write at a time per call.
pub trait KeyValueStore {
    fn get_string(&self, key: &str, scope: Scope) -> Option<String>;
    fn put_string(&mut self, key: &str, value: String, scope: Scope);
    fn get_int(&self, key: &str, scope: Scope) -> Option<i64>;
    fn put_int(&mut self, key: &str, value: i64, scope: Scope);
    /// Drop the row; returns whether it existed.
    fn remove(&mut self, key: &str, scope: Scope) -> bool;
    fn contains(&self, key: &str, scope: Scope) -> bool;
    fn set_reset_policy(&mut self, key: &str, scope: Scope, policy: ResetPolicy);
    /// Keys present in `scope` that start with `prefix`.
    fn keys_with_prefix(&self, prefix: &str, scope: Scope) -> Vec<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
    Int(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Row {
    value: StoredValue,
    #[serde(default)]
    policy: ResetPolicy,
}

/// In-process store, serializable to a JSON snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    rows: BTreeMap<Scope, BTreeMap<String, Row>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn row(&self, key: &str, scope: Scope) -> Option<&Row> {
        self.rows.get(&scope).and_then(|rows| rows.get(key))
    }

    fn put(&mut self, key: &str, value: StoredValue, scope: Scope) {
        let rows = self.rows.entry(scope).or_default();
        match rows.get_mut(key) {
            Some(row) => row.value = value,
            None => {
                rows.insert(
                    key.to_string(),
                    Row {
                        value,
                        policy: ResetPolicy::Default,
                    },
                );
            }
        }
    }

    /// Drop every row in `scope` not marked `NeverReset`.
    pub fn reset(&mut self, scope: Scope) {
        if let Some(rows) = self.rows.get_mut(&scope) {
            rows.retain(|_, row| row.policy == ResetPolicy::NeverReset);
        }
    }

    pub fn len(&self) -> usize {
        self.rows.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get_string(&self, key: &str, scope: Scope) -> Option<String> {
        match &self.row(key, scope)?.value {
            StoredValue::Text(text) => Some(text.clone()),
            StoredValue::Int(value) => Some(value.to_string()),
        }
    }

    fn put_string(&mut self, key: &str, value: String, scope: Scope) {
        self.put(key, StoredValue::Text(value), scope);
    }

    fn get_int(&self, key: &str, scope: Scope) -> Option<i64> {
        match &self.row(key, scope)?.value {
            StoredValue::Int(value) => Some(*value),
            StoredValue::Text(text) => text.parse().ok(),
        }
    }

    fn put_int(&mut self, key: &str, value: i64, scope: Scope) {
        self.put(key, StoredValue::Int(value), scope);
    }

    fn remove(&mut self, key: &str, scope: Scope) -> bool {
        self.rows
            .get_mut(&scope)
            .is_some_and(|rows| rows.remove(key).is_some())
    }

    fn contains(&self, key: &str, scope: Scope) -> bool {
        self.row(key, scope).is_some()
    }

    fn set_reset_policy(&mut self, key: &str, scope: Scope, policy: ResetPolicy) {
        if let Some(row) = self.rows.get_mut(&scope).and_then(|rows| rows.get_mut(key)) {
            row.policy = policy;
        }
    }

    fn keys_with_prefix(&self, prefix: &str, scope: Scope) -> Vec<String> {
        self.rows
            .get(&scope)
            .map(|rows| {
                rows.keys()
                    .filter(|key| key.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Write a timestamped snapshot of `store` into `directory`.
pub fn persist_snapshot(store: &MemoryStore, directory: &Path) -> Result<PathBuf> {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S%3f").to_string();
    fs::create_dir_all(directory)?;
    let path = directory.join(format!("die-recovery-{}.json", timestamp));
    store.save(&path)?;
    Ok(path)
}

/// Most recent snapshot in `directory`, if any.
pub fn latest_snapshot(directory: &Path) -> Result<Option<PathBuf>> {
    if !directory.exists() {
        return Ok(None);
    }
    if !directory.is_dir() {
        return Err(RecoveryError::Argument(format!(
            "snapshot path is not a directory: {}",
            directory.display()
        )));
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(directory)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("json"))
                .unwrap_or(false)
        })
        .collect();

    entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(entries.pop())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scope_parse() {
        assert_eq!(Scope::parse("dut"), Some(Scope::Dut));
        assert_eq!(Scope::parse("Lot"), Some(Scope::Lot));
        assert_eq!(Scope::parse("wafer"), None);
    }

    #[test]
    fn test_rows_are_scoped() {
        let mut store = MemoryStore::new();
        store.put_string("a", "1".to_string(), Scope::Dut);
        assert!(store.contains("a", Scope::Dut));
        assert!(!store.contains("a", Scope::Lot));
        store.put_int("n", 4, Scope::Lot);
        assert_eq!(store.get_int("n", Scope::Lot), Some(4));
    }

    #[test]
    fn test_remove_row() {
        let mut store = MemoryStore::new();
        store.put_string("a", "1".to_string(), Scope::Dut);
        assert!(!store.remove("a", Scope::Lot));
        assert!(store.remove("a", Scope::Dut));
        assert!(!store.contains("a", Scope::Dut));
        assert!(!store.remove("a", Scope::Dut));
    }

    #[test]
    fn test_reset_keeps_never_reset_rows() {
        let mut store = MemoryStore::new();
        store.put_string("keep", "x".to_string(), Scope::Dut);
        store.set_reset_policy("keep", Scope::Dut, ResetPolicy::NeverReset);
        store.put_string("drop", "y".to_string(), Scope::Dut);
        store.reset(Scope::Dut);
        assert!(store.contains("keep", Scope::Dut));
        assert!(!store.contains("drop", Scope::Dut));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = TempDir::new().expect("tempdir");
        assert_eq!(latest_snapshot(dir.path()).expect("scan"), None);

        let mut store = MemoryStore::new();
        store.put_string("row", "0101".to_string(), Scope::Dut);
        store.put_int("budget", -1, Scope::Dut);
        let path = persist_snapshot(&store, dir.path()).expect("persist");

        let latest = latest_snapshot(dir.path()).expect("scan");
        assert_eq!(latest.as_deref(), Some(path.as_path()));
        let loaded = MemoryStore::load(&path).expect("load");
        assert_eq!(loaded.get_string("row", Scope::Dut).as_deref(), Some("0101"));
        assert_eq!(loaded.get_int("budget", Scope::Dut), Some(-1));
    }
}
