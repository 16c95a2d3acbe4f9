// File: e2e_tests.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

mod common;

use bleedscan::config::{ScanConfig, ScanRange, TargetEndpoint};
use bleedscan::report::{ReportFormat, ReportGenerator, ScanSummary};
use bleedscan::scanner::OffsetScanner;
use bleedscan::wire::{Compressor, FrameBuilder, MsgHeader, MSG_HEADER_LEN, OP_COMPRESSED, OP_MSG};
use common::{closed_port, op_msg_reply, reply_with_declared_length, MockMongo, Reply};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn fast_config() -> ScanConfig {
    ScanConfig {
        connect_timeout: Duration::from_millis(500),
        read_timeout: Duration::from_millis(500),
        write_timeout: Duration::from_millis(500),
        ..ScanConfig::default()
    }
}

fn scanner_for(port: u16, min: u32, max: u32, config: ScanConfig) -> OffsetScanner {
    let endpoint = TargetEndpoint::new("127.0.0.1", port).unwrap();
    let range = ScanRange::new(min, max).unwrap();
    OffsetScanner::new(endpoint, range, config).unwrap()
}

fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    haystack.windows(needle.len()).filter(|w| *w == needle).count()
}

#[tokio::test]
async fn test_one_probe_per_delta_in_ascending_order() {
    let server = MockMongo::start(vec![]).await;
    let outcome = scanner_for(server.port(), 10, 19, fast_config()).run().await;

    assert_eq!(outcome.stats.planned_probes, 10);
    assert_eq!(outcome.stats.probes_sent, 10);
    assert_eq!(outcome.stats.successful_probes, 10);
    assert_eq!(outcome.result.probe_count, 10);
    assert!(!outcome.stats.cancelled);

    let true_len = FrameBuilder::new(Compressor::Zlib, "hello")
        .unwrap()
        .true_uncompressed_size() as i32;
    let expected: Vec<i32> = (10..=19).map(|d| true_len + d).collect();
    assert_eq!(server.declared_sizes(), expected);

    for request in server.requests() {
        let header = MsgHeader::parse(&request).unwrap();
        assert_eq!(header.op_code, OP_COMPRESSED);
        assert_eq!(header.message_length as usize, request.len());
        assert_eq!(request[24], Compressor::Zlib.id());
    }
}

#[tokio::test]
async fn test_zero_delta_probe_yields_no_fragments() {
    let server = MockMongo::start(vec![]).await;
    let outcome = scanner_for(server.port(), 0, 0, fast_config()).run().await;

    assert_eq!(outcome.stats.probes_sent, 1);
    assert_eq!(outcome.stats.encoding_errors, 0);
    assert!(outcome.result.unique_fragments.is_empty());
    assert!(outcome.result.artifact.is_empty());
}

#[tokio::test]
async fn test_shared_fragment_written_once() {
    let server = MockMongo::start(vec![
        Reply::Bytes(op_msg_reply(b"token=abc123\x00first")),
        Reply::Bytes(op_msg_reply(b"\x01\x02\x03\x04\x00xx\x00token=abc123\x00second")),
    ])
    .await;

    let outcome = scanner_for(server.port(), 100, 101, fast_config()).run().await;
    let result = &outcome.result;

    assert_eq!(count_occurrences(&result.artifact, b"token=abc123"), 1);
    assert_eq!(result.duplicate_count, 1);
    assert_eq!(result.artifact, b"token=abc123first\x01\x02\x03\x04second".to_vec());
    let expected: usize = result.unique_fragments.iter().map(|f| f.content.len()).sum();
    assert_eq!(result.artifact.len(), expected);
    assert_eq!(result.unique_fragments[0].delta, 100);
}

#[tokio::test]
async fn test_connection_failure_does_not_stop_scan() {
    let server = MockMongo::start(vec![
        Reply::Bytes(op_msg_reply(b"before-failure")),
        Reply::Close,
        Reply::Bytes(op_msg_reply(b"after-failure")),
    ])
    .await;

    let outcome = scanner_for(server.port(), 1, 3, fast_config()).run().await;

    assert_eq!(outcome.stats.probes_sent, 3);
    assert_eq!(outcome.stats.connection_errors, 1);
    assert_eq!(outcome.stats.successful_probes, 2);
    assert_eq!(outcome.result.artifact, b"before-failureafter-failure".to_vec());
    assert_eq!(outcome.result.unique_fragments[1].delta, 3);
}

#[tokio::test]
async fn test_unreachable_target_counts_every_probe() {
    let port = closed_port().await;
    let outcome = scanner_for(port, 0, 4, fast_config()).run().await;

    assert_eq!(outcome.stats.probes_sent, 5);
    assert_eq!(outcome.stats.connection_errors, 5);
    assert_eq!(outcome.result.probe_count, 5);
    assert!(outcome.result.artifact.is_empty());
}

#[tokio::test]
async fn test_truncated_reply_is_still_scanned() {
    let server = MockMongo::start(vec![Reply::BytesThenClose(reply_with_declared_length(
        4096,
        b"partial-secret\x00cut-off",
    ))])
    .await;

    let outcome = scanner_for(server.port(), 50, 50, fast_config()).run().await;

    assert_eq!(outcome.stats.successful_probes, 1);
    assert_eq!(outcome.result.artifact, b"partial-secretcut-off".to_vec());
}

#[tokio::test]
async fn test_short_header_is_protocol_error() {
    let server = MockMongo::start(vec![
        Reply::BytesThenClose(vec![0x20, 0, 0, 0, 1, 0]),
        Reply::Bytes(op_msg_reply(b"next-probe")),
    ])
    .await;

    let outcome = scanner_for(server.port(), 0, 1, fast_config()).run().await;

    assert_eq!(outcome.stats.protocol_errors, 1);
    assert_eq!(outcome.stats.probes_sent, 2);
    assert_eq!(outcome.result.artifact, b"next-probe".to_vec());
}

#[tokio::test]
async fn test_out_of_bounds_length_is_protocol_error() {
    let server = MockMongo::start(vec![Reply::BytesThenClose(reply_with_declared_length(
        -5,
        b"leaked-password=hunter2\x00more-leak",
    ))])
    .await;

    let outcome = scanner_for(server.port(), 0, 0, fast_config()).run().await;

    assert_eq!(outcome.stats.protocol_errors, 1);
    assert_eq!(
        outcome.result.artifact,
        b"leaked-password=hunter2more-leak".to_vec()
    );
}

#[tokio::test]
async fn test_oversized_length_keeps_following_bytes() {
    let server = MockMongo::start(vec![Reply::BytesThenSilent(reply_with_declared_length(
        i32::MAX,
        b"session-key=f00d",
    ))])
    .await;

    let config = ScanConfig {
        read_timeout: Duration::from_millis(200),
        ..fast_config()
    };
    let outcome = scanner_for(server.port(), 0, 0, config).run().await;

    assert_eq!(outcome.stats.protocol_errors, 1);
    assert_eq!(outcome.stats.timeouts, 0);
    assert_eq!(outcome.result.artifact, b"session-key=f00d".to_vec());
}

#[tokio::test]
async fn test_stalled_header_is_protocol_error() {
    let server = MockMongo::start(vec![
        Reply::BytesThenSilent(vec![0x20, 0, 0, 0, 1, 0]),
        Reply::Bytes(op_msg_reply(b"after-stall")),
    ])
    .await;

    let config = ScanConfig {
        read_timeout: Duration::from_millis(200),
        ..fast_config()
    };
    let outcome = scanner_for(server.port(), 0, 1, config).run().await;

    assert_eq!(outcome.stats.protocol_errors, 1);
    assert_eq!(outcome.stats.timeouts, 0);
    assert_eq!(outcome.stats.successful_probes, 1);
    assert_eq!(outcome.result.artifact, b"after-stall".to_vec());
}

#[tokio::test]
async fn test_stalled_body_is_truncated_response() {
    let server = MockMongo::start(vec![Reply::BytesThenSilent(reply_with_declared_length(
        4096,
        b"stalled-secret",
    ))])
    .await;

    let config = ScanConfig {
        read_timeout: Duration::from_millis(200),
        ..fast_config()
    };
    let outcome = scanner_for(server.port(), 3, 3, config).run().await;

    assert_eq!(outcome.stats.successful_probes, 1);
    assert_eq!(outcome.stats.timeouts, 0);
    assert_eq!(outcome.result.artifact, b"stalled-secret".to_vec());
}

#[tokio::test]
async fn test_overflowing_delta_is_skipped_and_counted() {
    let server = MockMongo::start(vec![Reply::Bytes(op_msg_reply(b"edge-of-range"))]).await;
    let config = fast_config();
    let true_len = FrameBuilder::new(config.compressor, &config.command)
        .unwrap()
        .true_uncompressed_size() as u32;
    let largest = i32::MAX as u32 - true_len;

    let outcome = scanner_for(server.port(), largest, largest + 1, config)
        .run()
        .await;

    assert_eq!(outcome.stats.probes_sent, 2);
    assert_eq!(outcome.stats.successful_probes, 1);
    assert_eq!(outcome.stats.encoding_errors, 1);
    assert_eq!(outcome.result.probe_count, 2);
    assert_eq!(server.declared_sizes(), vec![i32::MAX]);
    assert_eq!(outcome.result.artifact, b"edge-of-range".to_vec());
}

#[tokio::test]
async fn test_silent_server_times_out_and_scan_continues() {
    let server = MockMongo::start(vec![
        Reply::Silent,
        Reply::Bytes(op_msg_reply(b"late-leak")),
    ])
    .await;

    let config = ScanConfig {
        read_timeout: Duration::from_millis(200),
        ..fast_config()
    };
    let outcome = scanner_for(server.port(), 7, 8, config).run().await;

    assert_eq!(outcome.stats.timeouts, 1);
    assert_eq!(outcome.stats.successful_probes, 1);
    assert_eq!(outcome.result.artifact, b"late-leak".to_vec());
}

#[tokio::test]
async fn test_reused_connection_serves_whole_range() {
    let server = MockMongo::start(vec![]).await;
    let config = ScanConfig {
        reuse_connection: true,
        ..fast_config()
    };
    let outcome = scanner_for(server.port(), 0, 4, config).run().await;

    assert_eq!(outcome.stats.successful_probes, 5);
    assert_eq!(server.connection_count(), 1);

    let ids: Vec<i32> = server
        .requests()
        .iter()
        .map(|r| MsgHeader::parse(r).unwrap().request_id)
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_truncated_reply_drops_reused_session() {
    let server = MockMongo::start(vec![
        Reply::BytesThenClose(reply_with_declared_length(4096, b"secret-one")),
        Reply::Bytes(op_msg_reply(b"secret-two")),
    ])
    .await;
    let config = ScanConfig {
        reuse_connection: true,
        ..fast_config()
    };
    let outcome = scanner_for(server.port(), 0, 1, config).run().await;

    assert_eq!(outcome.stats.successful_probes, 2);
    assert_eq!(outcome.stats.connection_errors, 0);
    assert_eq!(server.connection_count(), 2);
    assert_eq!(outcome.result.artifact, b"secret-onesecret-two".to_vec());
}

#[tokio::test]
async fn test_fresh_connection_per_probe_by_default() {
    let server = MockMongo::start(vec![]).await;
    scanner_for(server.port(), 0, 2, fast_config()).run().await;
    assert_eq!(server.connection_count(), 3);
}

#[tokio::test]
async fn test_parallel_workers_cover_range() {
    let server = MockMongo::start(vec![]).await;
    let config = ScanConfig {
        workers: 4,
        ..fast_config()
    };
    let outcome = scanner_for(server.port(), 0, 29, config).run().await;

    assert_eq!(outcome.stats.probes_sent, 30);
    let true_len = FrameBuilder::new(Compressor::Zlib, "hello")
        .unwrap()
        .true_uncompressed_size() as i32;
    let mut deltas: Vec<i32> = server.declared_sizes().iter().map(|s| s - true_len).collect();
    deltas.sort_unstable();
    assert_eq!(deltas, (0..30).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_compressed_reply_is_unwrapped() {
    let inner_tail = b"zlib-wrapped-secret";
    let mut inner = vec![0, 0, 0, 0, 0];
    inner.extend_from_slice(inner_tail);
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&inner).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut reply = Vec::new();
    MsgHeader {
        message_length: (MSG_HEADER_LEN + 9 + compressed.len()) as i32,
        request_id: 5,
        response_to: 1,
        op_code: OP_COMPRESSED,
    }
    .write_to(&mut reply);
    reply.extend_from_slice(&OP_MSG.to_le_bytes());
    reply.extend_from_slice(&(inner.len() as i32).to_le_bytes());
    reply.push(Compressor::Zlib.id());
    reply.extend_from_slice(&compressed);

    let server = MockMongo::start(vec![Reply::Bytes(reply)]).await;
    let outcome = scanner_for(server.port(), 0, 0, fast_config()).run().await;

    assert_eq!(outcome.result.artifact, inner_tail.to_vec());
}

#[tokio::test]
async fn test_cancellation_finalizes_partial_results() {
    let mut replies = vec![Reply::Bytes(op_msg_reply(b"gathered-before-cancel"))];
    replies.extend(std::iter::repeat(Reply::Silent).take(50));
    let server = MockMongo::start(replies).await;

    let config = ScanConfig {
        read_timeout: Duration::from_secs(30),
        ..fast_config()
    };
    let scanner = scanner_for(server.port(), 0, 49, config);
    let cancel = scanner.cancel_flag();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let outcome = scanner.run().await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(outcome.stats.cancelled);
    assert!(outcome.stats.probes_sent < 50);
    assert_eq!(outcome.result.artifact, b"gathered-before-cancel".to_vec());
}

#[tokio::test]
async fn test_artifact_and_summary_on_disk() {
    let server = MockMongo::start(vec![
        Reply::Bytes(op_msg_reply(b"alpha\x00beta")),
        Reply::Bytes(op_msg_reply(b"beta\x00gamma")),
    ])
    .await;

    let endpoint = TargetEndpoint::new("127.0.0.1", server.port()).unwrap();
    let range = ScanRange::new(0, 1).unwrap();
    let outcome = OffsetScanner::new(endpoint.clone(), range, fast_config())
        .unwrap()
        .run()
        .await;

    let dir = TempDir::new().unwrap();
    let artifact = dir.path().join("out").join("leaked.bin");
    outcome.result.write_artifact(&artifact).unwrap();
    assert_eq!(std::fs::read(&artifact).unwrap(), b"alphabetagamma".to_vec());

    let summary_path = dir.path().join("summary.json");
    let summary = ScanSummary::new(&endpoint, range, &outcome);
    ReportGenerator::generate_report(&summary, &summary_path, ReportFormat::from_path(&summary_path))
        .unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&summary_path).unwrap()).unwrap();
    assert_eq!(json["unique_fragments"], 3);
    assert_eq!(json["total_bytes_leaked"], 14);
    assert_eq!(json["duplicate_fragments"], 1);
    assert_eq!(json["artifact_sha256"], outcome.result.artifact_sha256());
}
