//! Codec benchmarks for herald-protocol.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use herald_protocol::{codec, Event};

fn bench_encode_small(c: &mut Criterion) {
    let event = Event::publish("test", "update", "x".repeat(64));

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("small_64B", |b| b.iter(|| codec::encode(black_box(&event))));
    group.finish();
}

fn bench_decode_small(c: &mut Criterion) {
    let event = Event::publish("test", "update", "x".repeat(64));
    let encoded = codec::encode(&event).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("small_64B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_stream_decode(c: &mut Criterion) {
    let event = Event::publish("test:channel:room", "update", "x".repeat(256));
    let mut stream = BytesMut::new();
    for _ in 0..100 {
        codec::encode_into(&event, &mut stream).unwrap();
    }

    c.bench_function("stream_decode_100x256B", |b| {
        b.iter(|| {
            let mut buf = stream.clone();
            while let Some(event) = codec::decode_from(&mut buf).unwrap() {
                black_box(event);
            }
        })
    });
}

criterion_group!(
    benches,
    bench_encode_small,
    bench_decode_small,
    bench_stream_decode
);
criterion_main!(benches);
