// File: extractor.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use log::trace;
use serde::Serialize;

use crate::config::ExtractorConfig;

/// Fragment delimiter. BSON terminates field names with it.
pub const SENTINEL: u8 = 0x00;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakFragment {
    /// Scan delta of the probe that produced this fragment.
    pub delta: u32,
    /// Position of the first byte within the raw response.
    pub offset: usize,
    #[serde(skip)]
    pub content: Vec<u8>,
}

impl LeakFragment {
    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LeakExtractor {
    config: ExtractorConfig,
}

impl LeakExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Splits everything past the region offset on [`SENTINEL`] and keeps the
    /// runs that pass [`LeakExtractor::accepts`]. A response no longer than the
    /// offset yields nothing.
    pub fn extract(&self, response: &[u8], delta: u32) -> Vec<LeakFragment> {
        let start = self.config.region_offset;
        if response.len() <= start {
            return Vec::new();
        }

        let mut fragments = Vec::new();
        let mut offset = start;
        for run in response[start..].split(|&b| b == SENTINEL) {
            if self.accepts(run) {
                fragments.push(LeakFragment {
                    delta,
                    offset,
                    content: run.to_vec(),
                });
            }
            offset += run.len() + 1;
        }

        trace!(
            "delta {}: {} fragment(s) from {} byte response",
            delta,
            fragments.len(),
            response.len()
        );
        fragments
    }

    pub fn accepts(&self, run: &[u8]) -> bool {
        if run.len() < self.config.min_fragment_len {
            return false;
        }
        !(self.config.drop_uniform_runs && run.len() > 1 && run.iter().all(|&b| b == run[0]))
    }
}
