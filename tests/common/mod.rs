// File: common/mod.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(dead_code)]

use bleedscan::wire::{MsgHeader, MSG_HEADER_LEN, OP_MSG};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// What the mock does with the next request it reads.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Write these bytes and keep the connection open.
    Bytes(Vec<u8>),
    /// Write these bytes, then hang up.
    BytesThenClose(Vec<u8>),
    /// Write these bytes, then stop answering without hanging up.
    BytesThenSilent(Vec<u8>),
    /// Hang up without writing anything.
    Close,
    /// Never answer; wait for the client to give up.
    Silent,
}

pub struct MockMongo {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    connections: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockMongo {
    /// Serves `replies` in order across all connections; once they run out,
    /// every request gets an empty `OP_MSG` reply.
    pub async fn start(replies: Vec<Reply>) -> MockMongo {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let queue = Arc::new(Mutex::new(VecDeque::from(replies)));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let handle = {
            let requests = Arc::clone(&requests);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let queue = Arc::clone(&queue);
                    let requests = Arc::clone(&requests);
                    tokio::spawn(serve_connection(stream, queue, requests));
                }
            })
        };

        MockMongo {
            addr,
            requests,
            connections,
            handle,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// `uncompressedSize` field of every request received so far.
    pub fn declared_sizes(&self) -> Vec<i32> {
        self.requests()
            .iter()
            .map(|r| i32::from_le_bytes([r[20], r[21], r[22], r[23]]))
            .collect()
    }
}

impl Drop for MockMongo {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    queue: Arc<Mutex<VecDeque<Reply>>>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
) {
    loop {
        let mut header = [0u8; MSG_HEADER_LEN];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }
        let Some(length) = MsgHeader::parse(&header).and_then(|h| h.checked_length()) else {
            return;
        };
        let mut request = header.to_vec();
        request.resize(length, 0);
        if stream.read_exact(&mut request[MSG_HEADER_LEN..]).await.is_err() {
            return;
        }
        requests.lock().unwrap().push(request);

        let reply = queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::Bytes(op_msg_reply(b"")));
        match reply {
            Reply::Bytes(bytes) => {
                if stream.write_all(&bytes).await.is_err() {
                    return;
                }
            }
            Reply::BytesThenClose(bytes) => {
                let _ = stream.write_all(&bytes).await;
                let _ = stream.shutdown().await;
                return;
            }
            Reply::Close => return,
            Reply::BytesThenSilent(bytes) => {
                if stream.write_all(&bytes).await.is_err() {
                    return;
                }
                let mut sink = [0u8; 64];
                while matches!(stream.read(&mut sink).await, Ok(n) if n > 0) {}
                return;
            }
            Reply::Silent => {
                let mut sink = [0u8; 64];
                while matches!(stream.read(&mut sink).await, Ok(n) if n > 0) {}
                return;
            }
        }
    }
}

/// Well-formed `OP_MSG` reply whose bytes after the section kind are `tail`.
pub fn op_msg_reply(tail: &[u8]) -> Vec<u8> {
    let total = MSG_HEADER_LEN + 5 + tail.len();
    reply_with_declared_length(total as i32, tail)
}

/// Reply whose header claims `declared` bytes regardless of what follows.
pub fn reply_with_declared_length(declared: i32, tail: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    MsgHeader {
        message_length: declared,
        request_id: 100,
        response_to: 1,
        op_code: OP_MSG,
    }
    .write_to(&mut out);
    out.extend_from_slice(&0u32.to_le_bytes());
    out.push(0);
    out.extend_from_slice(tail);
    out
}

/// A port nothing is listening on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
