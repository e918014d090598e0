//! Criterion benchmarks for the RUDP wire codec and sequence arithmetic.

use bytes::{Bytes, BytesMut};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rudp_tokio::wire::{seq_lt, RudpHeader, RudpPacket};
use std::hint::black_box;

fn codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for &size in &[0usize, 100, 1000] {
        let packet = RudpPacket::data(0x1234_5678, Bytes::from(vec![0xAB; size]));
        let wire = packet.to_bytes();
        group.throughput(Throughput::Bytes((RudpHeader::SIZE + size) as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &packet, |b, packet| {
            b.iter(|| {
                let mut buf = BytesMut::with_capacity(packet.size());
                black_box(packet).encode(&mut buf);
                black_box(buf);
            });
        });

        group.bench_with_input(BenchmarkId::new("decode", size), &wire, |b, wire| {
            b.iter(|| RudpPacket::decode(black_box(wire)).expect("decode"));
        });
    }

    group.finish();
}

fn sequence_arithmetic(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequence_arithmetic");
    group.throughput(Throughput::Elements(1024));

    group.bench_function("seq_lt_sweep", |b| {
        b.iter(|| {
            let mut hits = 0u32;
            for i in 0..1024u32 {
                if seq_lt(black_box(i.wrapping_mul(0x9E37_79B9)), black_box(0x8000_0000)) {
                    hits += 1;
                }
            }
            hits
        });
    });

    group.finish();
}

criterion_group!(benches, codec, sequence_arithmetic);
criterion_main!(benches);
