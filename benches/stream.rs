// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for agent output normalization and audit chain hashing.
//!
//! Run with: `cargo bench --bench stream`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::hint::black_box;
use std::time::Duration;

use climpire::ledger::{canonical_json, verify_chain, AuditEvent, AuditLog, AuditLogger, AuditOutcome};
use climpire::runner::stream::{clean_line, StreamNormalizer};
use climpire::runner::extract_reply;

fn sample_output(lines: usize) -> Vec<String> {
    (0..lines)
        .map(|i| match i % 5 {
            0 => format!("\x1b[32m✓\x1b[0m compiled module_{}", i),
            1 => "Thinking...\rThinking...\rDone".to_string(),
            2 => format!("{{\"type\":\"text\",\"text\":\"step {}\"}}", i),
            3 => "   ".to_string(),
            _ => "same line repeated".to_string(),
        })
        .collect()
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_normalize");

    for size in [100usize, 1_000, 10_000] {
        let lines = sample_output(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("push", size), &lines, |b, lines| {
            b.iter(|| {
                let mut normalizer = StreamNormalizer::new(Duration::from_millis(1_500));
                let mut kept = 0usize;
                for line in lines {
                    if normalizer.push(black_box(line)).is_some() {
                        kept += 1;
                    }
                }
                kept
            });
        });
    }

    group.bench_function("clean_line_ansi", |b| {
        let raw = "\x1b[1;34minfo\x1b[0m: \x1b[2mrunning\x1b[0m cargo test\r";
        b.iter(|| clean_line(black_box(raw)));
    });

    group.finish();
}

fn bench_extract_reply(c: &mut Criterion) {
    let stdout: String = (0..200)
        .map(|i| format!("{{\"type\":\"assistant\",\"message\":{{\"content\":[{{\"type\":\"text\",\"text\":\"part {}\"}}]}}}}\n", i))
        .chain(std::iter::once(
            "{\"type\":\"result\",\"result\":\"All tests pass.\"}\n".to_string(),
        ))
        .collect();

    c.bench_function("extract_reply_stream_json", |b| {
        b.iter(|| extract_reply(black_box(&stdout)));
    });
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("audit_chain");
    let rt = tokio::runtime::Runtime::new().unwrap();

    let body = json!({
        "endpoint": "messages",
        "outcome": "accepted",
        "metadata": {"taskId": "3f2a9c1e", "sender": "ceo", "tags": ["a", "b", "c"]},
    });
    group.bench_function("canonical_json", |b| {
        b.iter(|| canonical_json(black_box(&body)));
    });

    for size in [100usize, 1_000] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.ndjson");
        rt.block_on(async {
            let log = AuditLog::open(&path, dir.path().join("fallback.ndjson"), Some("bench".into()))
                .await
                .unwrap();
            for i in 0..size {
                log.append(
                    AuditEvent::new("messages", AuditOutcome::Accepted).with_metadata(json!({ "n": i })),
                )
                .await
                .unwrap();
            }
        });
        let content = std::fs::read_to_string(&path).unwrap();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("verify", size), &content, |b, content| {
            b.iter(|| verify_chain(black_box(content), "bench"));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_normalize, bench_extract_reply, bench_chain);
criterion_main!(benches);
