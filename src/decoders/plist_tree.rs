// SPDX-License-Identifier: PMPL-1.0-or-later

//! Pattern-list tree with undoable option edits
//!
//! Every option touched through the tree has its original state recorded the
//! first time it is written, so [`PlistTree::restore`] puts back exactly what
//! was there: a previous value, or no option at all.

use crate::error::Result;
use crate::tester::{PlistItem, PlistService};
use regex::Regex;
use std::collections::BTreeMap;
use tracing::debug;

pub const PRE_BURST_OPTION: &str = "PreBurstPList";

type OptionTable = BTreeMap<u32, BTreeMap<String, Option<String>>>;

#[derive(Debug, Clone)]
pub struct PlistTree {
    name: String,
    contents: Vec<PlistItem>,
    children: BTreeMap<u32, PlistTree>,
    restore_options: OptionTable,
    current_options: OptionTable,
    restore_pre_burst: Option<Option<String>>,
    current_pre_burst: Option<String>,
    dirty: bool,
}

impl PlistTree {
    /// Load `name` and every nested list below it.
    pub fn build(plists: &dyn PlistService, name: &str) -> Result<Self> {
        let contents = plists.contents(name)?;
        let mut children = BTreeMap::new();
        for item in contents.iter().filter(|item| !item.is_pattern) {
            children.insert(item.index, PlistTree::build(plists, &item.name)?);
        }

        Ok(Self {
            name: name.to_string(),
            contents,
            children,
            restore_options: OptionTable::new(),
            current_options: OptionTable::new(),
            restore_pre_burst: None,
            current_pre_burst: None,
            dirty: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contents(&self) -> &[PlistItem] {
        &self.contents
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// This tree when `name` is empty or names it, else the first match depth-first.
    pub fn find_mut(&mut self, name: Option<&str>) -> Option<&mut PlistTree> {
        if name.map_or(true, |n| n.is_empty() || n == self.name) {
            return Some(self);
        }
        self.children
            .values_mut()
            .find_map(|child| child.find_mut(name))
    }

    /// Set one element option; an empty value removes the option.
    pub fn update_element_option(
        &mut self,
        plists: &mut dyn PlistService,
        index: u32,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let value = (!value.is_empty()).then_some(value);
        self.write_element_option(plists, index, key, value)
    }

    fn write_element_option(
        &mut self,
        plists: &mut dyn PlistService,
        index: u32,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        if !self
            .restore_options
            .get(&index)
            .is_some_and(|options| options.contains_key(key))
        {
            let original = plists.element_option(&self.name, index, key)?;
            self.restore_options
                .entry(index)
                .or_default()
                .insert(key.to_string(), original.clone());
            self.current_options
                .entry(index)
                .or_default()
                .insert(key.to_string(), original);
        }

        let current = self
            .current_options
            .get(&index)
            .and_then(|options| options.get(key))
            .cloned()
            .flatten();
        if current.as_deref() == value {
            debug!(plist = %self.name, index, option = key, "option already set, skipping");
            return Ok(());
        }

        match value {
            Some(value) => {
                debug!(plist = %self.name, index, option = key, value, "setting element option");
                plists.set_element_option(&self.name, index, key, value)?;
            }
            None => {
                debug!(plist = %self.name, index, option = key, "removing element option");
                plists.remove_element_option(&self.name, index, key)?;
            }
        }
        self.current_options
            .entry(index)
            .or_default()
            .insert(key.to_string(), value.map(str::to_string));
        self.dirty = true;
        Ok(())
    }

    /// Set the list-level pre-burst list; an empty value removes it.
    pub fn update_pre_burst_plist(&mut self, plists: &mut dyn PlistService, value: &str) -> Result<()> {
        let value = (!value.is_empty()).then_some(value);
        self.write_pre_burst_plist(plists, value)
    }

    fn write_pre_burst_plist(&mut self, plists: &mut dyn PlistService, value: Option<&str>) -> Result<()> {
        if self.restore_pre_burst.is_none() {
            let original = plists.option(&self.name, PRE_BURST_OPTION)?;
            self.current_pre_burst = original.clone();
            self.restore_pre_burst = Some(original);
        }

        if self.current_pre_burst.as_deref() == value {
            debug!(plist = %self.name, "pre-burst list unchanged, skipping");
            return Ok(());
        }

        match value {
            Some(value) => {
                debug!(plist = %self.name, pre_burst = value, "setting pre-burst list");
                plists.set_option(&self.name, PRE_BURST_OPTION, value)?;
            }
            None => {
                debug!(plist = %self.name, "removing pre-burst list");
                plists.remove_option(&self.name, PRE_BURST_OPTION)?;
            }
        }
        self.current_pre_burst = value.map(str::to_string);
        self.dirty = true;
        Ok(())
    }

    /// Apply `options` to every pattern, at any depth, whose name matches one of `patterns`.
    pub fn set_matching_pattern_options(
        &mut self,
        plists: &mut dyn PlistService,
        patterns: &[Regex],
        options: &BTreeMap<String, String>,
    ) -> Result<()> {
        let items = self.contents.clone();
        for item in items {
            if item.is_pattern {
                if patterns.iter().any(|pattern| pattern.is_match(&item.name)) {
                    for (key, value) in options {
                        self.update_element_option(plists, item.index, key, value)?;
                    }
                }
            } else if let Some(child) = self.children.get_mut(&item.index) {
                child.set_matching_pattern_options(plists, patterns, options)?;
            }
        }
        Ok(())
    }

    /// Undo every edit made through this tree and its children.
    pub fn restore(&mut self, plists: &mut dyn PlistService) -> Result<()> {
        if self.dirty {
            if let Some(original) = self.restore_pre_burst.clone() {
                debug!(plist = %self.name, "restoring pre-burst list");
                self.write_pre_burst_plist(plists, original.as_deref())?;
            }

            let originals: Vec<(u32, String, Option<String>)> = self
                .restore_options
                .iter()
                .flat_map(|(index, options)| {
                    options
                        .iter()
                        .map(move |(key, value)| (*index, key.clone(), value.clone()))
                })
                .collect();
            for (index, key, original) in originals {
                self.write_element_option(plists, index, &key, original.as_deref())?;
            }
        }

        for child in self.children.values_mut() {
            child.restore(plists)?;
        }
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CaptureFault, RecoveryError};
    use crate::tester::OfflinePlists;

    /// Offline plists whose option reads can be made to fail.
    struct FlakyReads {
        inner: OfflinePlists,
        fail_reads: bool,
    }

    impl FlakyReads {
        fn read_fault(&self) -> Result<()> {
            if self.fail_reads {
                return Err(RecoveryError::Configuration("plist service unavailable".to_string()));
            }
            Ok(())
        }
    }

    impl PlistService for FlakyReads {
        fn is_amble(&self, plist: &str, pattern: &str) -> std::result::Result<bool, CaptureFault> {
            self.inner.is_amble(plist, pattern)
        }
        fn contents(&self, plist: &str) -> Result<Vec<PlistItem>> {
            self.inner.contents(plist)
        }
        fn element_option(&self, plist: &str, index: u32, key: &str) -> Result<Option<String>> {
            self.read_fault()?;
            self.inner.element_option(plist, index, key)
        }
        fn set_element_option(&mut self, plist: &str, index: u32, key: &str, value: &str) -> Result<()> {
            self.inner.set_element_option(plist, index, key, value)
        }
        fn remove_element_option(&mut self, plist: &str, index: u32, key: &str) -> Result<()> {
            self.inner.remove_element_option(plist, index, key)
        }
        fn option(&self, plist: &str, key: &str) -> Result<Option<String>> {
            self.read_fault()?;
            self.inner.option(plist, key)
        }
        fn set_option(&mut self, plist: &str, key: &str, value: &str) -> Result<()> {
            self.inner.set_option(plist, key, value)
        }
        fn remove_option(&mut self, plist: &str, key: &str) -> Result<()> {
            self.inner.remove_option(plist, key)
        }
        fn resolve(&mut self, plist: &str) -> Result<()> {
            self.inner.resolve(plist)
        }
        fn enable_ctv_capture(&mut self, plist: &str, pattern: &str, domain: &str) -> Result<()> {
            self.inner.enable_ctv_capture(plist, pattern, domain)
        }
    }

    fn plists() -> OfflinePlists {
        OfflinePlists::new()
            .with_plist("top", &["pat_a", "@child", "pat_b"])
            .with_plist("child", &["pat_c", "pat_a"])
    }

    #[test]
    fn test_build_nested() {
        let service = plists();
        let mut tree = PlistTree::build(&service, "top").expect("build");
        assert_eq!(tree.contents().len(), 3);
        assert_eq!(tree.find_mut(Some("child")).map(|t| t.name().to_string()), Some("child".to_string()));
        assert_eq!(tree.find_mut(None).map(|t| t.name().to_string()), Some("top".to_string()));
        assert!(tree.find_mut(Some("missing")).is_none());
    }

    #[test]
    fn test_restore_removes_options_that_did_not_exist() {
        let mut service = plists();
        service
            .set_element_option("top", 2, "Mask", "P9")
            .expect("seed");
        let mut tree = PlistTree::build(&service, "top").expect("build");

        tree.update_element_option(&mut service, 0, "Mask", "P1").expect("set");
        tree.update_element_option(&mut service, 2, "Mask", "P2").expect("set");
        assert!(tree.is_dirty());
        assert_eq!(service.element_option("top", 0, "Mask").expect("get"), Some("P1".to_string()));

        tree.restore(&mut service).expect("restore");
        assert_eq!(service.element_option("top", 0, "Mask").expect("get"), None);
        assert_eq!(service.element_option("top", 2, "Mask").expect("get"), Some("P9".to_string()));
        assert!(!tree.is_dirty());
    }

    #[test]
    fn test_pre_burst_restore() {
        let mut service = plists();
        let mut tree = PlistTree::build(&service, "top").expect("build");
        tree.update_pre_burst_plist(&mut service, "warmup").expect("set");
        assert_eq!(
            service.option("top", PRE_BURST_OPTION).expect("get"),
            Some("warmup".to_string())
        );
        tree.restore(&mut service).expect("restore");
        assert_eq!(service.option("top", PRE_BURST_OPTION).expect("get"), None);
    }

    #[test]
    fn test_matching_patterns_recurse_into_children() {
        let mut service = plists();
        let mut tree = PlistTree::build(&service, "top").expect("build");
        let patterns = vec![Regex::new("^pat_a$").expect("regex")];
        let options = BTreeMap::from([("Mask".to_string(), "P3".to_string())]);
        tree.set_matching_pattern_options(&mut service, &patterns, &options)
            .expect("set");

        assert_eq!(service.element_option("top", 0, "Mask").expect("get"), Some("P3".to_string()));
        assert_eq!(service.element_option("child", 1, "Mask").expect("get"), Some("P3".to_string()));
        assert_eq!(service.element_option("top", 2, "Mask").expect("get"), None);

        tree.restore(&mut service).expect("restore");
        assert_eq!(service.element_option("child", 1, "Mask").expect("get"), None);
    }

    #[test]
    fn test_failed_read_keeps_original_options() {
        let mut service = FlakyReads {
            inner: plists(),
            fail_reads: false,
        };
        service
            .set_element_option("top", 2, "Mask", "P9")
            .expect("seed");
        service.set_option("top", PRE_BURST_OPTION, "warmup").expect("seed");
        let mut tree = PlistTree::build(&service, "top").expect("build");

        service.fail_reads = true;
        assert!(tree.update_element_option(&mut service, 2, "Mask", "P2").is_err());
        assert!(tree.update_pre_burst_plist(&mut service, "").is_err());
        assert!(!tree.is_dirty());

        service.fail_reads = false;
        tree.restore(&mut service).expect("restore");
        assert_eq!(service.element_option("top", 2, "Mask").expect("get"), Some("P9".to_string()));
        assert_eq!(
            service.option("top", PRE_BURST_OPTION).expect("get"),
            Some("warmup".to_string())
        );
    }
}
