// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use serde::Serialize;
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use crate::error::ConfigError;
use crate::wire::{Compressor, LEAK_REGION_OFFSET};

pub const DEFAULT_PORT: u16 = 27017;
pub const DEFAULT_MIN_FRAGMENT_LEN: usize = 3;
pub const MAX_WORKERS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetEndpoint {
    host: String,
    port: u16,
}

impl TargetEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ConfigError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        Ok(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Loopback targets skip the authorization prompt.
    pub fn is_loopback(&self) -> bool {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        host.eq_ignore_ascii_case("localhost")
            || host
                .parse::<std::net::IpAddr>()
                .map(|ip| ip.is_loopback())
                .unwrap_or(false)
    }
}

impl fmt::Display for TargetEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Inclusive range of forged-size deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanRange {
    min: u32,
    max: u32,
}

impl ScanRange {
    pub fn new(min: u32, max: u32) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::InvertedRange { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Ascending deltas from `min` to `max` inclusive.
    pub fn deltas(&self, step: u32) -> impl Iterator<Item = u32> {
        let step = step.max(1) as usize;
        (self.min..=self.max).step_by(step)
    }

    pub fn probe_count(&self, step: u32) -> u64 {
        let span = u64::from(self.max - self.min);
        span / u64::from(step.max(1)) + 1
    }

    /// Splits the sweep into at most `parts` contiguous, disjoint sub-ranges that
    /// together visit exactly the deltas of `deltas(step)`.
    pub fn split(&self, parts: usize, step: u32) -> Vec<ScanRange> {
        let step = u64::from(step.max(1));
        let total = self.probe_count(step as u32);
        let parts = (parts.max(1) as u64).min(total);
        let per_part = total / parts;
        let remainder = total % parts;

        let mut ranges = Vec::with_capacity(parts as usize);
        let mut index = 0u64;
        for part in 0..parts {
            let count = per_part + u64::from(part < remainder);
            let first = u64::from(self.min) + index * step;
            let last = first + (count - 1) * step;
            ranges.push(ScanRange {
                min: first as u32,
                max: last as u32,
            });
            index += count;
        }
        ranges
    }
}

impl fmt::Display for ScanRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.min, self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExtractorConfig {
    /// Where genuine payload data ends in a response; everything after is candidate leak.
    pub region_offset: usize,
    pub min_fragment_len: usize,
    /// Discard runs made of one repeated byte value.
    pub drop_uniform_runs: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            region_offset: LEAK_REGION_OFFSET,
            min_fragment_len: DEFAULT_MIN_FRAGMENT_LEN,
            drop_uniform_runs: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub step: u32,
    pub workers: usize,
    pub rate_limit: Option<NonZeroU32>,
    pub reuse_connection: bool,
    pub compressor: Compressor,
    pub command: String,
    pub extractor: ExtractorConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(3000),
            read_timeout: Duration::from_millis(5000),
            write_timeout: Duration::from_millis(3000),
            step: 1,
            workers: 1,
            rate_limit: None,
            reuse_connection: false,
            compressor: Compressor::Zlib,
            command: "hello".to_string(),
            extractor: ExtractorConfig::default(),
        }
    }
}

impl ScanConfig {
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.step == 0 {
            return Err(ConfigError::ZeroStep);
        }
        if self.extractor.min_fragment_len == 0 {
            return Err(ConfigError::ZeroFragmentLength);
        }
        if self.command.is_empty() {
            self.command = "hello".to_string();
        }
        self.workers = self.workers.clamp(1, MAX_WORKERS);
        Ok(())
    }
}
