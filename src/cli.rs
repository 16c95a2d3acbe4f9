// File: cli.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use clap::Parser;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{ExtractorConfig, ScanConfig, ScanRange, TargetEndpoint, DEFAULT_PORT};
use crate::error::ConfigError;
use crate::wire::Compressor;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    #[arg(long, default_value = "localhost")]
    pub host: String,

    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[arg(long = "min-offset", default_value_t = 20)]
    pub min_offset: u32,

    #[arg(long = "max-offset", default_value_t = 8192)]
    pub max_offset: u32,

    #[arg(long, default_value_t = 1)]
    pub step: u32,

    #[arg(short = 'o', long = "output", default_value = "leaked.bin")]
    pub output: PathBuf,

    #[arg(long = "summary", help = "Write a scan summary (.json for JSON, otherwise text)")]
    pub summary: Option<PathBuf>,

    #[arg(short = 'w', long = "workers", default_value_t = 1)]
    pub workers: usize,

    #[arg(short = 'r', long = "rate-limit", help = "Maximum probes per second")]
    pub rate_limit: Option<NonZeroU32>,

    #[arg(long = "connect-timeout", default_value_t = 3000, help = "Connect timeout in ms")]
    pub connect_timeout: u64,

    #[arg(long = "read-timeout", default_value_t = 5000, help = "Read timeout in ms")]
    pub read_timeout: u64,

    #[arg(long = "write-timeout", default_value_t = 3000, help = "Write timeout in ms")]
    pub write_timeout: u64,

    #[arg(long, default_value = "zlib", help = "zlib or zstd")]
    pub compressor: String,

    #[arg(long, default_value = "hello", help = "Command name placed in the wrapped OP_MSG")]
    pub command: String,

    #[arg(long = "reuse-connection", help = "Keep one connection open across probes")]
    pub reuse_connection: bool,

    #[arg(long = "min-fragment-len", default_value_t = 3)]
    pub min_fragment_len: usize,

    #[arg(long = "keep-uniform-runs", help = "Keep fragments made of one repeated byte")]
    pub keep_uniform_runs: bool,

    #[arg(long = "log-level", default_value = "warn")]
    pub log_level: String,

    #[arg(short = 'q', long = "quiet", help = "Hide the progress bar and summary")]
    pub quiet: bool,

    #[arg(long = "no-color", help = "Disable colored output")]
    pub no_color: bool,

    #[arg(long = "i-have-authorization")]
    pub skip_authorization_check: bool,
}

impl Cli {
    pub fn endpoint(&self) -> Result<TargetEndpoint, ConfigError> {
        TargetEndpoint::new(self.host.clone(), self.port)
    }

    pub fn range(&self) -> Result<ScanRange, ConfigError> {
        ScanRange::new(self.min_offset, self.max_offset)
    }

    pub fn scan_config(&self) -> Result<ScanConfig, ConfigError> {
        let mut config = ScanConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout),
            read_timeout: Duration::from_millis(self.read_timeout),
            write_timeout: Duration::from_millis(self.write_timeout),
            step: self.step,
            workers: self.workers,
            rate_limit: self.rate_limit,
            reuse_connection: self.reuse_connection,
            compressor: self.compressor.parse::<Compressor>()?,
            command: self.command.clone(),
            extractor: ExtractorConfig {
                min_fragment_len: self.min_fragment_len,
                drop_uniform_runs: !self.keep_uniform_runs,
                ..ExtractorConfig::default()
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Warn)
    }
}
