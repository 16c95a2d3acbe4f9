// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::{Result, Write};
use std::path::Path;

use crate::config::{ScanRange, TargetEndpoint};
use crate::extractor::LeakFragment;
use crate::getstate::ProbeStats;
use crate::scanner::ScanOutcome;

const PREVIEW_LEN: usize = 32;

#[derive(Debug, Clone, Serialize)]
pub struct FragmentEntry {
    pub delta: u32,
    pub offset: usize,
    pub length: usize,
    pub preview_hex: String,
}

impl From<&LeakFragment> for FragmentEntry {
    fn from(fragment: &LeakFragment) -> Self {
        let end = fragment.content.len().min(PREVIEW_LEN);
        Self {
            delta: fragment.delta,
            offset: fragment.offset,
            length: fragment.content.len(),
            preview_hex: hex::encode(&fragment.content[..end]),
        }
    }
}

/// Sidecar describing a finished scan. The binary artifact stays the
/// canonical output; this only indexes it.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub target: String,
    pub range: ScanRange,
    pub probes: ProbeStats,
    pub unique_fragments: usize,
    pub total_bytes_leaked: u64,
    pub duplicate_fragments: u64,
    pub artifact_sha256: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub fragments: Vec<FragmentEntry>,
}

impl ScanSummary {
    pub fn new(endpoint: &TargetEndpoint, range: ScanRange, outcome: &ScanOutcome) -> Self {
        let result = &outcome.result;
        Self {
            target: endpoint.to_string(),
            range,
            probes: outcome.stats,
            unique_fragments: result.unique_fragments.len(),
            total_bytes_leaked: result.total_bytes_leaked,
            duplicate_fragments: result.duplicate_count,
            artifact_sha256: result.artifact_sha256(),
            started_at: timestamp(outcome.stats.start_time),
            finished_at: timestamp(outcome.stats.end_time),
            fragments: result.unique_fragments.iter().map(FragmentEntry::from).collect(),
        }
    }

    pub fn render_text(&self) -> String {
        let stats = &self.probes;
        let mut out = String::new();
        out.push_str(&format!("Target: {}\n", self.target));
        out.push_str(&format!("Deltas: {}\n", self.range));
        out.push_str(&format!(
            "Probes: {}/{} sent, {} ok, {} failed{}\n",
            stats.probes_sent,
            stats.planned_probes,
            stats.successful_probes,
            stats.failed_probes(),
            if stats.cancelled { " (cancelled)" } else { "" }
        ));
        if stats.failed_probes() > 0 {
            out.push_str(&format!(
                "  connection: {}, timeout: {}, encoding: {}, protocol: {}\n",
                stats.connection_errors,
                stats.timeouts,
                stats.encoding_errors,
                stats.protocol_errors
            ));
        }
        out.push_str(&format!(
            "Unique fragments: {} ({} bytes, {} duplicates)\n",
            self.unique_fragments, self.total_bytes_leaked, self.duplicate_fragments
        ));
        out.push_str(&format!("Artifact SHA-256: {}\n", self.artifact_sha256));
        out.push_str(&format!("Elapsed: {} ms\n", stats.elapsed_ms()));
        out
    }
}

fn timestamp(ms: u64) -> Option<DateTime<Utc>> {
    if ms == 0 {
        return None;
    }
    DateTime::from_timestamp_millis(i64::try_from(ms).ok()?)
}

pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    /// `.json` paths get JSON, everything else text.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ReportFormat::Json,
            _ => ReportFormat::Text,
        }
    }
}

pub struct ReportGenerator;

impl ReportGenerator {
    pub fn generate_report(summary: &ScanSummary, output_path: &Path, format: ReportFormat) -> Result<()> {
        match format {
            ReportFormat::Text => Self::generate_text_report(summary, output_path),
            ReportFormat::Json => Self::generate_json_report(summary, output_path),
        }
    }

    pub fn generate_text_report(summary: &ScanSummary, output_path: &Path) -> Result<()> {
        let mut file = File::create(output_path)?;
        write!(file, "{}", summary.render_text())?;
        for entry in &summary.fragments {
            writeln!(
                file,
                "[delta {:6}] [offset {:6}] {:5} bytes  {}",
                entry.delta, entry.offset, entry.length, entry.preview_hex
            )?;
        }
        Ok(())
    }

    pub fn generate_json_report(summary: &ScanSummary, output_path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(summary)?;
        let mut file = File::create(output_path)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }
}
