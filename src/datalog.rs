// SPDX-License-Identifier: PMPL-1.0-or-later

//! Structured tracker-update records and their sinks

use crate::types::BitVector;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// One record per tracker update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerLogRecord {
    /// Tracker definition names joined with `|`.
    pub trackers: String,
    pub mask: BitVector,
    pub result: BitVector,
    pub incoming: BitVector,
    pub outgoing: BitVector,
    pub logged_at: String,
}

impl TrackerLogRecord {
    pub fn new(
        trackers: impl Into<String>,
        mask: BitVector,
        result: BitVector,
        incoming: BitVector,
        outgoing: BitVector,
    ) -> Self {
        Self {
            trackers: trackers.into(),
            mask,
            result,
            incoming,
            outgoing,
            logged_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn tname_postfix(&self) -> String {
        format!("::{}", self.trackers)
    }

    pub fn strgval(&self) -> String {
        format!(
            "Mask:b{}|TestResult:b{}|Incoming:b{}|Outgoing:b{}",
            self.mask, self.result, self.incoming, self.outgoing
        )
    }
}

pub trait LogSink {
    fn write(&mut self, record: TrackerLogRecord);
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<TrackerLogRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[TrackerLogRecord] {
        &self.records
    }

    pub fn take(&mut self) -> Vec<TrackerLogRecord> {
        std::mem::take(&mut self.records)
    }
}

impl LogSink for MemorySink {
    fn write(&mut self, record: TrackerLogRecord) {
        self.records.push(record);
    }
}

/// Emits records as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&mut self, record: TrackerLogRecord) {
        tracing::info!(
            target: "die_recovery::datalog",
            tname = %record.tname_postfix(),
            data = %record.strgval(),
            "tracker update"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_formatting() {
        let bits = |s: &str| BitVector::parse(s).expect("bits");
        let record = TrackerLogRecord::new("A|B", bits("00"), bits("10"), bits("01"), bits("11"));
        assert_eq!(record.tname_postfix(), "::A|B");
        assert_eq!(
            record.strgval(),
            "Mask:b00|TestResult:b10|Incoming:b01|Outgoing:b11"
        );
    }

    #[test]
    fn test_memory_sink_take() {
        let mut sink = MemorySink::new();
        sink.write(TrackerLogRecord::new(
            "T",
            BitVector::new(1),
            BitVector::new(1),
            BitVector::new(1),
            BitVector::new(1),
        ));
        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.take().len(), 1);
        assert!(sink.records().is_empty());
    }
}
