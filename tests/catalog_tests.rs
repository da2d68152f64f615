// SPDX-License-Identifier: PMPL-1.0-or-later

//! Catalog loading and the decode, track, rule flow end to end

use die_recovery::catalog::{self, CatalogPaths};
use die_recovery::datalog::MemorySink;
use die_recovery::storage::{self, MemoryStore};
use die_recovery::tester::{CapturedExecution, FailureRecord, OfflinePlists, RecordingPatConfig, TesterServices};
use die_recovery::{BitVector, RecoveryContext, RecoveryError, UpdateRequest};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const TRACKERS: &str = r#"{
  "Trackers": [
    { "Name": "Cores", "Size": 8 },
    { "Name": "Ring", "Size": 1, "LinkDisable": ["Cores"] }
  ]
}"#;

const RULES: &str = r#"
Rules:
  - Name: Core
    Index: "0-7"
    Containers:
      - Name: 4C
        Mode: ValidCombinations
        Type: FullyFeatured
        Size: 4
        BitVectors: ["00001111"]
      - Name: 2C
        Mode: ValidCombinations
        Type: Recovery
        Size: 2
        BitVectors: ["00111111", "11001111"]
"#;

const DECODERS: &str = r#"{
  "PinMaps": [
    {
      "Type": "PinToSliceIndexDecoder",
      "Name": "P1Map",
      "Size": 1,
      "PinToSliceIndexMap": { "P1": [0] }
    },
    {
      "Type": "PinToSliceIndexDecoder",
      "Name": "CoreMap",
      "Size": 8,
      "PatternModify": "core_disable",
      "PinToSliceIndexMap": { "C0": [0], "C1": [1], "C67": [6, 7] }
    }
  ]
}"#;

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("write catalog");
    path
}

fn loaded_context(dir: &Path) -> RecoveryContext {
    let trackers = write(dir, "trackers.json", TRACKERS);
    let rules = write(dir, "rules.yaml", RULES);
    let decoders = write(dir, "decoders.json", DECODERS);
    let mut ctx = RecoveryContext::in_memory();
    catalog::install(
        &mut ctx,
        CatalogPaths {
            trackers: Some(&trackers),
            rules: Some(&rules),
            decoders: Some(&decoders),
        },
    )
    .expect("catalogs install");
    ctx
}

fn failing(pins: &[&str]) -> CapturedExecution {
    CapturedExecution::new("main").with_failures(vec![FailureRecord {
        pattern_name: "core_pat".to_string(),
        instance_id: 7,
        burst_index: 0,
        domain_name: "ALL".to_string(),
        parent_plist: "main".to_string(),
        failing_pins: pins.iter().map(|p| p.to_string()).collect(),
        previous_label: String::new(),
    }])
}

#[test]
fn test_catalogs_install() {
    let dir = TempDir::new().expect("tempdir");
    let ctx = loaded_context(dir.path());
    assert_eq!(ctx.definitions().count(), 2);
    assert_eq!(ctx.rule("Core").expect("rule").containers.len(), 2);
    assert_eq!(ctx.decoders().len(), 2);
    assert_eq!(ctx.pin_map("P1Map,CoreMap").expect("pin map").size(), 9);
}

#[test]
fn test_single_pin_decoder() {
    let dir = TempDir::new().expect("tempdir");
    let ctx = loaded_context(dir.path());
    let mut decoder = ctx.decoders().get("P1Map").expect("decoder").clone();
    assert_eq!(decoder.decode(&failing(&["P1"]), None).expect("decode").to_string(), "1");
    assert_eq!(decoder.decode(&failing(&["P2"]), None).expect("decode").to_string(), "0");
}

#[test]
fn test_rule_flow_over_tracker_state() {
    let dir = TempDir::new().expect("tempdir");
    let mut ctx = loaded_context(dir.path());
    let tracker = ctx.tracker("Cores").expect("tracker");

    let updates = [("00001111", 3), ("01000000", 1), ("00010000", 0)];
    for (bits, expected) in updates {
        tracker
            .update_tracking_structure(&mut ctx, UpdateRequest::merge(BitVector::parse(bits).expect("bits")))
            .expect("update");
        let matches = tracker.run_rule(&ctx, "Core").expect("rule");
        assert_eq!(matches.len(), expected, "after merging {}", bits);
        if expected == 1 {
            assert_eq!(matches[0].name, "2C");
            assert_eq!(matches[0].bit_vector.to_string(), "11001111");
        }
    }
}

#[test]
fn test_decode_then_track() {
    let dir = TempDir::new().expect("tempdir");
    let mut ctx = loaded_context(dir.path());
    let mut pin_map = ctx.pin_map("CoreMap").expect("pin map");
    let mut plists = OfflinePlists::new().with_plist("main", &["core_pat"]);
    let mut pat_config = RecordingPatConfig::new();

    let bits = {
        let mut services = TesterServices::new(&mut plists, &mut pat_config, ctx.store_mut());
        pin_map
            .decode_failures(&failing(&["C1", "C67"]), None, &mut services)
            .expect("decode")
    };
    assert_eq!(bits.to_string(), "01000011");

    let tracker = ctx.tracker("Cores").expect("tracker");
    tracker
        .update_tracking_structure(&mut ctx, UpdateRequest::merge(bits))
        .expect("update");
    let state = tracker.mask_bits(&ctx).expect("bits");

    let mut exec = CapturedExecution::new("main");
    let mut services = TesterServices::new(&mut plists, &mut pat_config, ctx.store_mut());
    let pins = pin_map.mask_pins(&state, &mut exec, &mut services).expect("mask");
    assert_eq!(pins, vec!["C1".to_string(), "C67".to_string()]);
}

#[test]
fn test_state_survives_snapshot() {
    let dir = TempDir::new().expect("tempdir");
    let state_dir = dir.path().join("state");
    let mut ctx = loaded_context(dir.path());
    let ring = ctx.tracker("Ring").expect("tracker");
    ring.update_tracking_structure(&mut ctx, UpdateRequest::merge(BitVector::parse("1").expect("bits")))
        .expect("update");
    assert_eq!(ctx.tracker_data("Cores").as_deref(), Some("11111111"));

    let (store, _) = ctx.into_parts();
    storage::persist_snapshot(&store, &state_dir).expect("persist");
    let latest = storage::latest_snapshot(&state_dir)
        .expect("scan")
        .expect("snapshot present");

    let mut restored = RecoveryContext::new(MemoryStore::load(&latest).expect("load"), MemorySink::new());
    restored
        .load_trackers(catalog::load_trackers(&dir.path().join("trackers.json")).expect("trackers"))
        .expect("install");
    let cores = restored.tracker("Cores").expect("tracker");
    assert!(cores.mask_bits(&restored).expect("bits").all_set());
}

#[test]
fn test_catalog_errors() {
    let dir = TempDir::new().expect("tempdir");
    let unknown = write(dir.path(), "trackers.toml", TRACKERS);
    assert!(matches!(
        catalog::load_trackers(&unknown),
        Err(RecoveryError::Configuration(_))
    ));

    let dangling = write(
        dir.path(),
        "dangling.json",
        r#"{ "Trackers": [ { "Name": "A", "Size": 1, "LinkDisable": ["B"] } ] }"#,
    );
    let mut ctx = RecoveryContext::in_memory();
    let result = catalog::install(
        &mut ctx,
        CatalogPaths {
            trackers: Some(&dangling),
            ..CatalogPaths::default()
        },
    );
    assert!(matches!(result, Err(RecoveryError::Configuration(_))));

    let broken = write(dir.path(), "broken.json", "{ not json");
    assert!(matches!(catalog::load_decoders(&broken), Err(RecoveryError::Parse(_))));
}
