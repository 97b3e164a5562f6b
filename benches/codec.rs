//! Benchmarks for the frame codec
//!
//! Run with: cargo bench --bench codec
//!
//! Covers the per-frame work every device does on every poll: the CRC, frame
//! encode and decode, and the resynchronizing stream decoder on clean and
//! noisy input.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use reflex_duel::checksum::{crc8, crc8_bitwise};
use reflex_duel::network::codec::{decode, encode, FrameDecoder, FRAME_LEN};
use reflex_duel::network::messages::{Message, MessageBody};
use reflex_duel::rng::{Pcg32, Rng, SeedableRng};
use reflex_duel::{DeviceId, ResultTime};
use std::hint::black_box;

/// A burst of result and ack frames like the coordinator sees after a go.
fn result_burst(frames: usize) -> Vec<u8> {
    (0..frames)
        .flat_map(|i| {
            let src = DeviceId::CONTROLLERS[i % 4];
            let body = if i % 2 == 0 {
                MessageBody::ReactionResult(ResultTime::Millis(100 + i as u16))
            } else {
                MessageBody::Ack { acked: 0x28 }
            };
            Message::new(DeviceId::HOST, src, body).to_bytes()
        })
        .collect()
}

/// The same burst with a few random garbage bytes between frames.
fn noisy_burst(frames: usize, seed: u64) -> Vec<u8> {
    let mut rng = Pcg32::seed_from_u64(seed);
    let clean = result_burst(frames);
    let mut noisy = Vec::with_capacity(clean.len() * 2);
    for chunk in clean.chunks(FRAME_LEN) {
        for _ in 0..rng.gen_range(0..4) {
            noisy.push(rng.next_u32() as u8);
        }
        noisy.extend_from_slice(chunk);
    }
    noisy
}

fn bench_crc(c: &mut Criterion) {
    let header = [0x0A, 0x00, 0x01, 0x26, 0x00, 0x78];
    let mut group = c.benchmark_group("crc8");
    group.bench_function("table", |b| b.iter(|| crc8(black_box(&header))));
    group.bench_function("bitwise", |b| b.iter(|| crc8_bitwise(black_box(&header))));
    group.finish();
}

fn bench_frame(c: &mut Criterion) {
    let bytes = encode(0x00, 0x01, 0x26, 120);
    let mut group = c.benchmark_group("frame");
    group.bench_function("encode", |b| {
        b.iter(|| encode(black_box(0x00), black_box(0x01), black_box(0x26), black_box(120)))
    });
    group.bench_function("decode", |b| b.iter(|| decode(black_box(&bytes))));
    group.bench_function("decode_message", |b| {
        b.iter(|| {
            decode(black_box(&bytes))
                .ok()
                .and_then(|frame| Message::try_from(frame).ok())
        })
    });
    group.finish();
}

fn bench_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_decoder");
    for frames in [4, 64, 512] {
        let clean = result_burst(frames);
        let noisy = noisy_burst(frames, 7);

        group.throughput(Throughput::Bytes(clean.len() as u64));
        group.bench_with_input(BenchmarkId::new("clean", frames), &clean, |b, bytes| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new();
                decoder.push(black_box(bytes));
                decoder.drain_frames()
            })
        });

        group.throughput(Throughput::Bytes(noisy.len() as u64));
        group.bench_with_input(BenchmarkId::new("noisy", frames), &noisy, |b, bytes| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new();
                decoder.push(black_box(bytes));
                decoder.drain_frames()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_crc, bench_frame, bench_stream);
criterion_main!(benches);
