/*
Copyright 2022 Volker Schwaberow <volker@schwaberow.de>
Permission is hereby granted, free of charge, to any person obtaining a
copy of this software and associated documentation files (the
"Software"), to deal in the Software without restriction, including without
limitation the rights to use, copy, modify, merge, publish, distribute,
sublicense, and/or sell copies of the Software, and to permit persons to whom the
Software is furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be
included in all copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT
SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR
OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE,
ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
DEALINGS IN THE SOFTWARE.
Author(s): Volker Schwaberow
*/

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::ProbeError;

/// Probe tallies shared by every scan worker.
#[derive(Debug, Default)]
pub struct GetState {
    planned_probes: AtomicU64,
    probes_sent: AtomicU64,
    successful_probes: AtomicU64,
    connection_errors: AtomicU64,
    timeouts: AtomicU64,
    encoding_errors: AtomicU64,
    protocol_errors: AtomicU64,
    start_time: AtomicU64,
    end_time: AtomicU64,
    cancelled: AtomicBool,
}

impl GetState {
    pub fn new() -> GetState {
        GetState::default()
    }

    pub fn set_planned_probes(&self, planned: u64) {
        self.planned_probes.store(planned, Ordering::Relaxed);
    }

    pub fn add_probe(&self) {
        self.probes_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_success(&self) {
        self.successful_probes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_failure(&self, error: &ProbeError) {
        let counter = match error {
            ProbeError::Connection { .. } => &self.connection_errors,
            ProbeError::Timeout { .. } => &self.timeouts,
            ProbeError::Encoding(_) => &self.encoding_errors,
            ProbeError::Protocol { .. } => &self.protocol_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn set_start_time(&self, start_time: u64) {
        self.start_time.store(start_time, Ordering::Relaxed);
    }

    pub fn set_end_time(&self, end_time: u64) {
        self.end_time.store(end_time, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProbeStats {
        ProbeStats {
            planned_probes: self.planned_probes.load(Ordering::Relaxed),
            probes_sent: self.probes_sent.load(Ordering::Relaxed),
            successful_probes: self.successful_probes.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            encoding_errors: self.encoding_errors.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            start_time: self.start_time.load(Ordering::Relaxed),
            end_time: self.end_time.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeStats {
    pub planned_probes: u64,
    pub probes_sent: u64,
    pub successful_probes: u64,
    pub connection_errors: u64,
    pub timeouts: u64,
    pub encoding_errors: u64,
    pub protocol_errors: u64,
    pub start_time: u64,
    pub end_time: u64,
    pub cancelled: bool,
}

impl ProbeStats {
    pub fn failed_probes(&self) -> u64 {
        self.connection_errors + self.timeouts + self.encoding_errors + self.protocol_errors
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }
}
