//! Criterion benchmarks for the envelope codec.
//!
//! The broker decodes every inbound frame, so decode cost is on the hot relay
//! path.  Encoding only happens for broker-built replies.
//!
//! Run with:
//! ```bash
//! cargo bench --package relay-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use relay_core::{ConnectionType, Message, Setup, Status};

fn setup_frame() -> String {
    Message::setup(Setup {
        kind: ConnectionType::Server,
        password: "space-password".to_string(),
        server_password: "server-password".to_string(),
        name: "cam1".to_string(),
    })
    .encode()
    .expect("encode must succeed for benchmark setup")
    .into_owned()
}

fn relay_frame(payload_len: usize) -> String {
    format!(
        r#"{{"action":"video","destination":"phone","data":"{}"}}"#,
        "A".repeat(payload_len)
    )
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let setup = setup_frame();
    group.bench_function("setup", |b| {
        b.iter(|| Message::decode(black_box(setup.clone())).expect("decode must succeed"))
    });

    for size in [64usize, 4096, 65536] {
        let frame = relay_frame(size);
        group.bench_with_input(BenchmarkId::new("relay", size), &frame, |b, frame| {
            b.iter(|| Message::decode(black_box(frame.clone())).expect("decode must succeed"))
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    let status = Message::status(Status::ServerNotFound);
    group.bench_function("connection_status", |b| {
        b.iter(|| black_box(&status).encode().expect("encode must succeed").into_owned())
    });

    let relayed = Message::decode(relay_frame(4096)).expect("decode must succeed");
    group.bench_function("relay_passthrough_4096", |b| {
        b.iter(|| black_box(&relayed).encode().expect("encode must succeed").len())
    });

    group.finish();
}

criterion_group!(benches, bench_decode, bench_encode);
criterion_main!(benches);
