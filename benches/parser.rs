use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use proxyproto::net::BufferPool;
use proxyproto::proxy::{parse, serialize};

const V1_TCP4: &[u8] = b"PROXY TCP4 127.0.0.1 127.0.0.2 111 222\r\n";
const V1_TCP6: &[u8] = b"PROXY TCP6 2607:f8b0:4010:801::1004 2607:f8b0:4010:801::1005 43210 443\r\n";

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_v1_tcp4", |b| b.iter(|| parse(black_box(V1_TCP4))));
    c.bench_function("parse_v1_tcp6", |b| b.iter(|| parse(black_box(V1_TCP6))));

    let (header, _) = parse(V1_TCP6).unwrap();
    c.bench_function("serialize_v1_tcp6", |b| b.iter(|| serialize(black_box(&header))));
}

fn bench_pool(c: &mut Criterion) {
    let pool = Arc::new(BufferPool::default());
    c.bench_function("pool_acquire_release", |b| {
        b.iter(|| {
            let buffer = pool.acquire();
            pool.release(black_box(buffer));
        })
    });
}

criterion_group!(benches, bench_parse, bench_pool);
criterion_main!(benches);
