//! Codec benchmarks for parley-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use parley_protocol::{codec, Encoding, MessagePayload, OutboundEvent};

fn sample_message(text_len: usize) -> OutboundEvent {
    OutboundEvent::NewMessage(MessagePayload {
        id: "6650c1f0e4b0a1b2c3d4e5f6".to_string(),
        sender_id: "6650c1f0e4b0a1b2c3d4e5f7".to_string(),
        receiver_id: "6650c1f0e4b0a1b2c3d4e5f8".to_string(),
        text: Some("a".repeat(text_len)),
        image: None,
        created_at: "2024-05-24T12:00:00.000Z".to_string(),
        updated_at: "2024-05-24T12:00:00.000Z".to_string(),
    })
}

fn bench_encode(c: &mut Criterion) {
    let event = sample_message(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));
    group.bench_function("json_64B", |b| {
        b.iter(|| codec::encode(black_box(&event), Encoding::Json))
    });
    group.bench_function("msgpack_64B", |b| {
        b.iter(|| codec::encode(black_box(&event), Encoding::MessagePack))
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let event = sample_message(256);
    let json = codec::encode(&event, Encoding::Json).unwrap();
    let msgpack = codec::encode(&event, Encoding::MessagePack).unwrap();

    let mut group = c.benchmark_group("decode");
    group.bench_function("json_256B", |b| {
        b.iter(|| codec::decode::<OutboundEvent>(black_box(&json)))
    });
    group.bench_function("msgpack_256B", |b| {
        b.iter(|| codec::decode::<OutboundEvent>(black_box(&msgpack)))
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
