// SPDX-License-Identifier: PMPL-1.0-or-later

//! Named decoder catalog

use crate::decoders::PinMapDecoder;
use crate::error::{RecoveryError, Result};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct DecoderRegistry {
    decoders: BTreeMap<String, PinMapDecoder>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a decoder under its own name.
    pub fn register(&mut self, decoder: PinMapDecoder) {
        debug!(decoder = %decoder.name(), kind = decoder.decoder_kind(), size = decoder.size(), "registering decoder");
        self.decoders.insert(decoder.name().to_string(), decoder);
    }

    pub fn get(&self, name: &str) -> Result<&PinMapDecoder> {
        self.decoders
            .get(name)
            .ok_or_else(|| RecoveryError::not_found("decoder", name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.decoders.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PinMapDecoder> {
        self.decoders.values()
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}
