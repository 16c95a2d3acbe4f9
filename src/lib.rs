// File: lib.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::bool_assert_comparison)]
#![allow(clippy::new_without_default)]

pub mod aggregator;
pub mod cli;
pub mod config;
pub mod error;
pub mod extractor;
pub mod getstate;
pub mod report;
pub mod scanner;
pub mod transport;
pub mod wire;


pub use aggregator::{ResultAggregator, ScanResult, SharedAggregator};
pub use config::{ScanConfig, ScanRange, TargetEndpoint};
pub use error::{ConfigError, EncodingError, ProbeError};
pub use extractor::{LeakExtractor, LeakFragment};
pub use scanner::{CancelFlag, OffsetScanner, ScanOutcome};
pub use transport::{RawResponse, TransportSession};
pub use wire::{Compressor, CraftedFrame, FrameBuilder};
