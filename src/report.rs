// SPDX-License-Identifier: PMPL-1.0-or-later

//! Table dumps and console output

use crate::context::RecoveryContext;
use crate::datalog::{LogSink, TrackerLogRecord};
use crate::rules::RuleMatch;
use crate::storage::KeyValueStore;
use crate::tracker::TrackerState;
use colored::*;
use std::fmt::Write;

/// Plain-text dump of every tracker, decoder and rule in `ctx`.
pub fn format_tables<S: KeyValueStore, L: LogSink>(ctx: &RecoveryContext<S, L>) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Trackers:");
    for definition in ctx.definitions() {
        let data = ctx
            .tracker_data(&definition.name)
            .unwrap_or_else(|| "None".to_string());
        let _ = writeln!(out, "  Tracker=[{}] Size=[{}] Data=[{}]", definition.name, definition.size, data);
        if !definition.link_disable.is_empty() {
            let _ = writeln!(out, "    LinkDisable=[{}]", definition.link_disable.join(","));
        }
    }

    let _ = writeln!(out, "PinMaps:");
    for decoder in ctx.decoders().iter() {
        let common = decoder.common();
        let _ = writeln!(
            out,
            "  PinMap=[{}] Type=[{}] Size=[{}] PatternModify=[{}]",
            decoder.name(),
            decoder.decoder_kind(),
            decoder.size(),
            common.pattern_modify.as_deref().unwrap_or("")
        );
        if let Ok(json) = serde_json::to_string(decoder) {
            let _ = writeln!(out, "    Data={}", json);
        }
    }

    let _ = writeln!(out, "Rules:");
    for rule in ctx.rules() {
        let _ = writeln!(out, "  Rule=[{}]", rule.name);
        for container in &rule.containers {
            let vectors: Vec<String> = container.values.iter().map(ToString::to_string).collect();
            let _ = writeln!(
                out,
                "    Name=[{}] Size=[{}] Type=[{}] Mode=[{}] BitVectors=[{}]",
                container.name,
                container.size,
                container.rule_type.as_str(),
                container.mode.as_str(),
                vectors.join(",")
            );
        }
    }

    out
}

pub struct ReportFormatter;

impl ReportFormatter {
    pub fn new() -> Self {
        Self
    }

    pub fn print_state(&self, names: &str, state: TrackerState, bits: Option<&str>) {
        let label = match state {
            TrackerState::Untouched => state.as_str().dimmed(),
            TrackerState::Clean => state.as_str().green(),
            TrackerState::Partial => state.as_str().yellow(),
            TrackerState::FullyFailed => state.as_str().red(),
        };
        println!("{} [{}] {}", names.bold(), label, bits.unwrap_or("-"));
    }

    pub fn print_update(&self, names: &str, accepted: bool) {
        let status = if accepted {
            "ACCEPTED".green()
        } else {
            "REJECTED".red()
        };
        println!("{} {}", names.bold(), status);
    }

    pub fn print_matches(&self, rule: &str, matches: &[RuleMatch]) {
        println!("{}", format!("=== RULE {} ===", rule).bold().cyan());
        if matches.is_empty() {
            println!("  {}", "no passing configurations".red());
            return;
        }
        for (i, m) in matches.iter().enumerate() {
            println!(
                "  {}. {} size={} type={} {}",
                i + 1,
                m.name.bold(),
                m.size,
                m.rule_type.as_str().yellow(),
                m.bit_vector
            );
        }
    }

    pub fn print_records(&self, records: &[TrackerLogRecord]) {
        for record in records {
            println!("  {} {}", record.tname_postfix().dimmed(), record.strgval());
        }
    }
}

impl Default for ReportFormatter {
    fn default() -> Self {
        Self::new()
    }
}
