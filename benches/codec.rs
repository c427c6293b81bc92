//! Codec and flow-control benchmark suite.
//!
//! Benchmarks the per-message hot path:
//! - Frame encode/decode for text, native binary and base64 binary
//! - Control message parsing
//! - Congestion window submit/acknowledge cycles
//!
//! Run with: cargo bench --bench codec
//! Results saved to: target/criterion/

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use cockpit_transport::flow::{CongestionController, Outbound};
use cockpit_transport::protocol::{Control, Payload, decode, encode};
use cockpit_transport::{ChannelId, ChannelOptions};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const PAYLOAD_SIZES: &[usize] = &[64, 4 * 1024, 64 * 1024];

const CHANNEL: &str = "1:42";

fn text_payload(size: usize) -> Payload {
    Payload::Text("x".repeat(size))
}

fn binary_payload(size: usize) -> Payload {
    Payload::Binary((0..size).map(|i| (i % 251) as u8).collect())
}

// ============================================================================
// Benchmark: Encode
// ============================================================================

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for &size in PAYLOAD_SIZES {
        group.throughput(Throughput::Bytes(size as u64));

        let text = text_payload(size);
        group.bench_with_input(BenchmarkId::new("text", size), &text, |b, payload| {
            b.iter(|| encode(black_box(CHANNEL), black_box(payload), true));
        });

        let binary = binary_payload(size);
        group.bench_with_input(BenchmarkId::new("binary", size), &binary, |b, payload| {
            b.iter(|| encode(black_box(CHANNEL), black_box(payload), true));
        });
        group.bench_with_input(BenchmarkId::new("base64", size), &binary, |b, payload| {
            b.iter(|| encode(black_box(CHANNEL), black_box(payload), false));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Decode
// ============================================================================

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for &size in PAYLOAD_SIZES {
        group.throughput(Throughput::Bytes(size as u64));

        let text = encode(CHANNEL, &text_payload(size), true);
        group.bench_with_input(BenchmarkId::new("text", size), &text, |b, message| {
            b.iter(|| decode(black_box(message.clone())));
        });

        let binary = encode(CHANNEL, &binary_payload(size), true);
        group.bench_with_input(BenchmarkId::new("binary", size), &binary, |b, message| {
            b.iter(|| decode(black_box(message.clone())));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Control Parsing
// ============================================================================

fn bench_control(c: &mut Criterion) {
    let mut group = c.benchmark_group("control");

    let samples = [
        ("ack", r#"{"command":"ack","channel":"1:42","bytes":4096}"#),
        ("ready", r#"{"command":"ready","channel":"1:42"}"#),
        (
            "init",
            r#"{"command":"init","version":1,"channel-seed":"1:","host":"localhost","csrf-token":"token","capabilities":["binary","multi"]}"#,
        ),
        (
            "close",
            r#"{"command":"close","channel":"1:42","problem":"not-found","message":"no such host"}"#,
        ),
    ];

    for (name, json) in samples {
        group.bench_with_input(BenchmarkId::new("parse", name), json, |b, json| {
            b.iter(|| Control::parse(black_box(json)));
        });
    }

    let open = Control::open(
        ChannelId::from(CHANNEL),
        ChannelOptions::stream("localhost", 9090),
    );
    group.bench_function("serialize_open", |b| {
        b.iter(|| black_box(&open).to_json());
    });

    group.finish();
}

// ============================================================================
// Benchmark: Congestion Window
// ============================================================================

fn bench_congestion(c: &mut Criterion) {
    let mut group = c.benchmark_group("congestion");

    for &size in PAYLOAD_SIZES {
        group.bench_with_input(BenchmarkId::new("submit_ack", size), &size, |b, &size| {
            let channel = ChannelId::from(CHANNEL);
            let payload = text_payload(size);
            b.iter(|| {
                let mut controller = CongestionController::new(size as u64 * 4);
                for _ in 0..16 {
                    let _ = controller.submit(&channel, Outbound::Data(payload.clone()));
                }
                let mut released = 0;
                for _ in 0..16 {
                    released += controller.acknowledge(&channel, size as u64).len();
                }
                black_box(released)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode,
    bench_control,
    bench_congestion
);
criterion_main!(benches);
