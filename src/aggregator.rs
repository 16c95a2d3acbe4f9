// File: aggregator.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use log::{debug, info};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::extractor::LeakFragment;

/// Unique fragments in first-seen order, keyed by content.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    seen: HashSet<Vec<u8>>,
    fragments: Vec<LeakFragment>,
    duplicate_count: u64,
    raw_bytes_seen: u64,
    probe_count: u64,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one probe's fragments, inserting each whose content has not
    /// been seen yet. Returns how many were new.
    pub fn record(&mut self, fragments: Vec<LeakFragment>) -> usize {
        self.probe_count += 1;
        let mut added = 0;
        for fragment in fragments {
            self.raw_bytes_seen += fragment.len() as u64;
            if self.seen.contains(&fragment.content) {
                self.duplicate_count += 1;
                continue;
            }
            debug!(
                "New fragment at delta {} offset {} ({} bytes)",
                fragment.delta,
                fragment.offset,
                fragment.len()
            );
            self.seen.insert(fragment.content.clone());
            self.fragments.push(fragment);
            added += 1;
        }
        added
    }

    pub fn unique_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn duplicate_count(&self) -> u64 {
        self.duplicate_count
    }

    pub fn total_bytes(&self) -> u64 {
        self.fragments.iter().map(|f| f.len() as u64).sum()
    }

    pub fn finalize(&self) -> ScanResult {
        let artifact: Vec<u8> = self
            .fragments
            .iter()
            .flat_map(|f| f.content.iter().copied())
            .collect();
        let result = ScanResult {
            unique_fragments: self.fragments.clone(),
            total_bytes_leaked: artifact.len() as u64,
            probe_count: self.probe_count,
            duplicate_count: self.duplicate_count,
            raw_bytes_seen: self.raw_bytes_seen,
            artifact,
        };
        info!(
            "Finalized {} unique fragment(s), {} bytes, {} duplicate(s)",
            result.unique_fragments.len(),
            result.total_bytes_leaked,
            result.duplicate_count
        );
        result
    }
}

/// Mutex-guarded aggregator shared by scan workers.
#[derive(Debug, Clone, Default)]
pub struct SharedAggregator {
    inner: Arc<Mutex<ResultAggregator>>,
}

impl SharedAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, ResultAggregator> {
        // A worker that panicked mid-insert leaves the set consistent
        // enough to keep appending to.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, fragments: Vec<LeakFragment>) -> usize {
        self.lock().record(fragments)
    }

    pub fn finalize(&self) -> ScanResult {
        self.lock().finalize()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub unique_fragments: Vec<LeakFragment>,
    pub total_bytes_leaked: u64,
    pub probe_count: u64,
    pub duplicate_count: u64,
    pub raw_bytes_seen: u64,
    /// Unique fragment contents concatenated verbatim in first-seen order.
    #[serde(skip)]
    pub artifact: Vec<u8>,
}

impl ScanResult {
    pub fn artifact_sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.artifact))
    }

    pub fn write_artifact(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(path)?;
        file.write_all(&self.artifact)?;
        file.flush()?;
        info!(
            "Wrote {} byte artifact to {}",
            self.artifact.len(),
            path.display()
        );
        Ok(())
    }
}
