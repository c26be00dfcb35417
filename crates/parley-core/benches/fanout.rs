//! Registry lookup and fan-out benchmarks for parley-core.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use parley_core::{
    ChatEvent, ConnectionHandle, ConnectionId, ConnectionRecord, EventRouter, MessageBody,
    PresenceBroadcaster, PresenceConfig, Registry, UserIdentity,
};
use parley_protocol::OutboundEvent;
use std::sync::Arc;
use tokio::sync::mpsc;

type Outbound = mpsc::Receiver<Arc<OutboundEvent>>;

fn populate(registry: &Registry, users: usize, devices: usize) -> Vec<Outbound> {
    let mut receivers = Vec::with_capacity(users * devices);
    for user in 0..users {
        for _ in 0..devices {
            let (handle, rx) = ConnectionHandle::new(ConnectionId::generate(), 1024);
            registry.register(ConnectionRecord::new(format!("user-{user}").into(), handle));
            receivers.push(rx);
        }
    }
    receivers
}

fn bench_connections_for(c: &mut Criterion) {
    let registry = Registry::new();
    let _receivers = populate(&registry, 10_000, 2);
    let target = UserIdentity::new("user-4242");

    c.bench_function("connections_for_10k_users", |b| {
        b.iter(|| registry.connections_for(black_box(&target)))
    });
}

fn bench_deliver_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("deliver_message");

    for devices in [1usize, 4, 16] {
        let registry = Arc::new(Registry::new());
        let mut receivers = populate(&registry, 2, devices);
        let router = EventRouter::new(Arc::clone(&registry));
        let now = Utc::now();
        let message = ChatEvent {
            id: "m1".to_string(),
            sender: "user-0".into(),
            receiver: "user-1".into(),
            body: MessageBody::text("hello"),
            created_at: now,
            updated_at: now,
        };

        group.throughput(Throughput::Elements((devices * 2) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(devices), &message, |b, m| {
            b.iter(|| {
                let report = router.deliver_message(black_box(m));
                for rx in receivers.iter_mut() {
                    while rx.try_recv().is_ok() {}
                }
                report
            })
        });
    }
    group.finish();
}

fn bench_publish_presence(c: &mut Criterion) {
    let registry = Arc::new(Registry::new());
    let mut receivers = populate(&registry, 1_000, 1);
    let presence = PresenceBroadcaster::new(Arc::clone(&registry), PresenceConfig::default());

    c.bench_function("publish_presence_1k", |b| {
        b.iter(|| {
            let delivered = presence.publish_presence();
            for rx in receivers.iter_mut() {
                while rx.try_recv().is_ok() {}
            }
            delivered
        })
    });
}

criterion_group!(
    benches,
    bench_connections_for,
    bench_deliver_message,
    bench_publish_presence
);
criterion_main!(benches);
