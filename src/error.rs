// File: error.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use std::time::Duration;

/// Failure to encode a crafted frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    /// The forged uncompressed size does not fit in the signed 32-bit size field.
    #[error("declared size {true_len} + delta {delta} exceeds i32::MAX")]
    SizeOverflow { true_len: usize, delta: u32 },

    /// The whole frame would be longer than the header length field allows.
    #[error("frame length {0} exceeds i32::MAX")]
    FrameTooLarge(usize),

    #[error("compressor {0} cannot be used to build frames")]
    UnsupportedCompressor(&'static str),

    #[error("compression failed: {0}")]
    Compression(String),
}

/// Per-probe failure. None of these abort a scan.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Refused, reset, DNS failure, or the peer hung up before sending anything.
    #[error("connection to {endpoint} failed: {cause}")]
    Connection {
        endpoint: String,
        #[source]
        cause: std::io::Error,
    },

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("{stage} timed out after {elapsed:?}")]
    Timeout {
        stage: &'static str,
        elapsed: Duration,
    },

    /// The response header was cut short or declared an impossible length.
    /// `partial` holds whatever arrived, which is still worth scanning.
    #[error("malformed response: {reason} ({} bytes received)", .partial.len())]
    Protocol { reason: String, partial: Vec<u8> },
}

impl ProbeError {
    pub fn connection(endpoint: impl Into<String>, cause: std::io::Error) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            cause,
        }
    }

    /// Bytes that arrived before the failure, if the failure kept any.
    pub fn partial_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Protocol { partial, .. } if !partial.is_empty() => Some(partial),
            _ => None,
        }
    }
}

/// Rejected scan configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("scan range is inverted: min {min} > max {max}")]
    InvertedRange { min: u32, max: u32 },

    #[error("step must be at least 1")]
    ZeroStep,

    #[error("host must not be empty")]
    EmptyHost,

    #[error("port must not be 0")]
    ZeroPort,

    #[error("minimum fragment length must be at least 1")]
    ZeroFragmentLength,

    #[error("unknown compressor '{0}'")]
    UnknownCompressor(String),

    #[error("cannot prepare probe frame: {0}")]
    Frame(#[from] EncodingError),
}
