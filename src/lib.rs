// SPDX-License-Identifier: PMPL-1.0-or-later

//! Die-Recovery: fail tracking and recovery decisions for partially failing dies.
//!
//! A test execution's raw failure evidence is decoded into a fixed-width fail
//! vector, merged into persistent per-tracker state under a down-bin budget,
//! checked against a catalog of valid defeatured configurations, and turned
//! back into pin masks and pattern-configuration writes for the next run.
//!
//! ENGINE PILLARS:
//! 1. **Decoders**: pin names, failure records and pattern traces to fail bits.
//! 2. **Tracker**: persisted fail state with merge/overwrite and link cascades.
//! 3. **Rules**: subset matching against legal defeature configurations.

pub mod catalog;
pub mod context;
pub mod datalog;
pub mod decoders;
pub mod error;
pub mod pinmap;
pub mod report;
pub mod rules;
pub mod storage;
pub mod tester;
pub mod tracker;
pub mod types;

pub use context::RecoveryContext;
pub use error::{RecoveryError, Result};
pub use pinmap::PinMap;
pub use tracker::{DieRecoveryTracker, TrackerState, UpdateRequest};
pub use types::{BitVector, DownBinPolicy, InputType, TrackerDefinition, UpdateMode};
