//! Performance benchmarks for the APDU command core
//!
//! Measures the full per-packet path: envelope validation, reassembly,
//! incremental decoding and dispatch, for the packet shapes a busy channel
//! actually sees.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use signet_apdu::dispatch::CommandProcessor;
use signet_apdu::envelope::{CLA, P1_CONTINUATION, P1_FIRST};
use signet_apdu::test_utils::{TestBackend, apdu_packet, sample_sign_body};
use std::hint::black_box;

/// Benchmark the cheap single-packet commands
fn bench_simple_commands(c: &mut Criterion) {
    let mut group = c.benchmark_group("Simple Commands");

    let version = apdu_packet(CLA, 0x00, 0x00, 0x00, &[]);
    group.bench_function("get_version", |b| {
        let mut processor = CommandProcessor::new(TestBackend::new());
        b.iter(|| processor.handle_packet(black_box(&version)));
    });

    let unknown = apdu_packet(CLA, 0x7F, 0x00, 0x00, &[0xAA; 64]);
    group.bench_function("reject_unknown_ins", |b| {
        let mut processor = CommandProcessor::new(TestBackend::new());
        b.iter(|| processor.handle_packet(black_box(&unknown)));
    });

    group.finish();
}

/// Benchmark signing requests that fit one packet
fn bench_sign_single_packet(c: &mut Criterion) {
    let mut group = c.benchmark_group("Sign Single Packet");

    for size in &[0usize, 32, 64, 128] {
        let body = sample_sign_body(&vec![0x42u8; *size]);
        let packet = apdu_packet(CLA, 0x04, P1_FIRST, 0x00, &body);

        group.bench_with_input(BenchmarkId::new("calldata", size), size, |b, _| {
            let mut processor = CommandProcessor::new(TestBackend::new());
            b.iter(|| processor.handle_packet(black_box(&packet)));
        });
    }

    group.finish();
}

/// Benchmark signing requests reassembled from continuation packets
fn bench_sign_chunked(c: &mut Criterion) {
    let mut group = c.benchmark_group("Sign Chunked");

    for size in &[512usize, 2048, 8192] {
        let body = sample_sign_body(&vec![0x42u8; *size]);
        let packets: Vec<Vec<u8>> = body
            .chunks(255)
            .enumerate()
            .map(|(i, chunk)| {
                let p1 = if i == 0 { P1_FIRST } else { P1_CONTINUATION };
                apdu_packet(CLA, 0x04, p1, 0x00, chunk)
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("calldata", size), size, |b, _| {
            let mut processor = CommandProcessor::new(TestBackend::new());
            b.iter(|| {
                for packet in &packets {
                    black_box(processor.handle_packet(black_box(packet)));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_simple_commands,
    bench_sign_single_packet,
    bench_sign_chunked
);

criterion_main!(benches);
