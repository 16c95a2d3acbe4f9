// File: transport.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use log::{debug, trace};
use std::io::ErrorKind;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::{ScanConfig, TargetEndpoint};
use crate::error::ProbeError;
use crate::wire::{CraftedFrame, MsgHeader, MAX_MESSAGE_LEN, MSG_HEADER_LEN};

const DRAIN_CHUNK: usize = 4096;

/// Bytes of one reply. `complete` is false when the peer stopped short of the
/// declared length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub bytes: Vec<u8>,
    pub complete: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl From<&ScanConfig> for SessionTimeouts {
    fn from(config: &ScanConfig) -> Self {
        Self {
            connect: config.connect_timeout,
            read: config.read_timeout,
            write: config.write_timeout,
        }
    }
}

/// One TCP connection to the target. Dropping the session closes the socket.
#[derive(Debug)]
pub struct TransportSession {
    stream: TcpStream,
    endpoint: String,
    timeouts: SessionTimeouts,
    next_request_id: i32,
}

impl TransportSession {
    pub async fn connect(
        endpoint: &TargetEndpoint,
        timeouts: SessionTimeouts,
    ) -> Result<Self, ProbeError> {
        let address = endpoint.to_string();
        let started = Instant::now();
        let stream = match tokio::time::timeout(
            timeouts.connect,
            TcpStream::connect((endpoint.host(), endpoint.port())),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ProbeError::connection(address, e)),
            Err(_) => {
                return Err(ProbeError::connection(
                    address,
                    std::io::Error::new(
                        ErrorKind::TimedOut,
                        format!("connect timed out after {:?}", started.elapsed()),
                    ),
                ))
            }
        };
        let _ = stream.set_nodelay(true);
        debug!("Connected to {}", address);

        Ok(Self {
            stream,
            endpoint: address,
            timeouts,
            next_request_id: 1,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Encodes and writes one frame; returns the request id it was sent under.
    pub async fn send(&mut self, frame: &CraftedFrame) -> Result<i32, ProbeError> {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        let bytes = frame.encode(request_id)?;

        let sent = bytes.len();
        let limit = self.timeouts.write;
        let stream = &mut self.stream;
        let started = Instant::now();
        let outcome = tokio::time::timeout(limit, async move {
            stream.write_all(&bytes).await?;
            stream.flush().await
        })
        .await;

        match outcome {
            Ok(Ok(())) => {
                trace!(
                    "Sent {} bytes as request {} to {}",
                    sent,
                    request_id,
                    self.endpoint
                );
                Ok(request_id)
            }
            Ok(Err(e)) => Err(ProbeError::connection(self.endpoint.clone(), e)),
            Err(_) => Err(ProbeError::Timeout {
                stage: "send",
                elapsed: started.elapsed(),
            }),
        }
    }

    /// Reads one length-prefixed reply.
    ///
    /// A peer that closes after the header but before the declared length is
    /// reached yields the truncated bytes as a normal response, marked
    /// incomplete so the caller does not reuse the session.
    pub async fn receive_response(&mut self) -> Result<RawResponse, ProbeError> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.timeouts.read;

        let mut buffer = vec![0u8; MSG_HEADER_LEN];
        let got = self.read_until(&mut buffer, 0, deadline, started).await?;
        if got == 0 {
            return Err(ProbeError::connection(
                self.endpoint.clone(),
                std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "connection closed before any response bytes",
                ),
            ));
        }
        if got < MSG_HEADER_LEN {
            buffer.truncate(got);
            return Err(ProbeError::Protocol {
                reason: format!("header cut short after {} bytes", got),
                partial: buffer,
            });
        }

        let header = MsgHeader::parse(&buffer).ok_or_else(|| ProbeError::Protocol {
            reason: "unparseable header".to_string(),
            partial: buffer.clone(),
        })?;
        let Some(total) = header.checked_length() else {
            self.drain(&mut buffer, deadline).await;
            return Err(ProbeError::Protocol {
                reason: format!("declared message length {} out of bounds", header.message_length),
                partial: buffer,
            });
        };

        buffer.resize(total, 0);
        let got = self
            .read_until(&mut buffer, MSG_HEADER_LEN, deadline, started)
            .await?;
        let complete = got == total;
        if !complete {
            debug!(
                "{} stopped after {} of {} declared bytes",
                self.endpoint, got, total
            );
            buffer.truncate(got);
        }
        trace!("Received {} bytes from {}", buffer.len(), self.endpoint);
        Ok(RawResponse {
            bytes: buffer,
            complete,
        })
    }

    /// Fills `buffer[filled..]`, stopping early on EOF, or on the deadline once
    /// anything has arrived. Returns the filled length.
    async fn read_until(
        &mut self,
        buffer: &mut [u8],
        mut filled: usize,
        deadline: tokio::time::Instant,
        started: Instant,
    ) -> Result<usize, ProbeError> {
        while filled < buffer.len() {
            let read = tokio::time::timeout_at(deadline, self.stream.read(&mut buffer[filled..]));
            match read.await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => filled += n,
                Ok(Err(e))
                    if matches!(
                        e.kind(),
                        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
                    ) && filled > 0 =>
                {
                    break
                }
                Ok(Err(e)) => return Err(ProbeError::connection(self.endpoint.clone(), e)),
                Err(_) if filled > 0 => {
                    debug!("Read deadline hit with {} bytes buffered", filled);
                    break;
                }
                Err(_) => {
                    return Err(ProbeError::Timeout {
                        stage: "receive",
                        elapsed: started.elapsed(),
                    })
                }
            }
        }
        Ok(filled)
    }

    /// Appends whatever else the peer sends until EOF, error, the deadline, or
    /// `MAX_MESSAGE_LEN` total bytes.
    async fn drain(&mut self, buffer: &mut Vec<u8>, deadline: tokio::time::Instant) {
        let mut chunk = [0u8; DRAIN_CHUNK];
        while buffer.len() < MAX_MESSAGE_LEN {
            let room = (MAX_MESSAGE_LEN - buffer.len()).min(DRAIN_CHUNK);
            match tokio::time::timeout_at(deadline, self.stream.read(&mut chunk[..room])).await {
                Ok(Ok(n)) if n > 0 => buffer.extend_from_slice(&chunk[..n]),
                _ => break,
            }
        }
        trace!("Drained {} bytes from {}", buffer.len(), self.endpoint);
    }

    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
        trace!("Closed session to {}", self.endpoint);
    }
}
