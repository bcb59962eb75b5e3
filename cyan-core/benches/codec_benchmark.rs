use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use cyan_core::protocol::{decode, encode, ChatCommand, ChatEvent, TreeEvent};

fn bench_encode_send_chat(c: &mut Criterion) {
    let cmd = ChatCommand::SendChat {
        workspace_id: "w-1".into(),
        message: "ship it".into(),
        parent_id: None,
        client_ref: Some("5f0c1d2e-0000-4000-8000-000000000000".into()),
    };

    c.bench_function("encode_send_chat", |b| {
        b.iter(|| black_box(encode(black_box(&cmd))))
    });
}

fn bench_decode_events(c: &mut Criterion) {
    let mut group = c.benchmark_group("Codec");
    group.throughput(Throughput::Elements(1));

    let chat = r#"{"type":"ChatSent","id":"m-1","workspace_id":"w-1","author":"alice","message":"ship it","timestamp":1700000000000}"#;
    group.bench_function("decode_chat_sent", |b| {
        b.iter(|| black_box(decode::<ChatEvent>(black_box(chat)).unwrap()))
    });

    let unknown = r#"{"type":"PresenceChanged","peer":"p-1"}"#;
    group.bench_function("decode_unknown", |b| {
        b.iter(|| black_box(decode::<TreeEvent>(black_box(unknown)).unwrap()))
    });

    group.bench_function("decode_malformed", |b| {
        b.iter(|| black_box(decode::<TreeEvent>(black_box("{\"type\":")).is_err()))
    });

    group.finish();
}

criterion_group!(benches, bench_encode_send_chat, bench_decode_events);
criterion_main!(benches);
