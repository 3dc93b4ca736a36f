//! Performance benchmarks for wharf.
//!
//! Run with: `cargo bench`

use bytes::Bytes;
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use wharf::codec::{Field, MessageSchema, Record, Value, decode_vuint50, encode_vuint50};
use wharf::websocket::{Frame, FrameDecoder, FrameHandler, OpCode, Role, apply_mask, compute_accept_key};
use wharf::{Config, ConnectionId, Job, JobDispatcher};

const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

// =============================================================================
// Frame Parsing Benchmarks
// =============================================================================

fn bench_frame_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_parsing");

    for size in [10usize, 1024, 64 * 1024] {
        let frame = Frame::binary(vec![0xAB; size]);
        let unmasked = frame.to_bytes(None);
        let masked = frame.to_bytes(Some(MASK));

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("{size}b_unmasked"), |b| {
            b.iter(|| Frame::parse(black_box(&unmasked)))
        });
        group.bench_function(format!("{size}b_masked"), |b| {
            b.iter(|| Frame::parse(black_box(&masked)))
        });
    }

    group.finish();
}

// =============================================================================
// Masking Benchmarks
// =============================================================================

fn bench_masking(c: &mut Criterion) {
    let mut group = c.benchmark_group("masking");

    for size in [64usize, 4096, 1024 * 1024] {
        let mut data = vec![0x5A; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("{size}b"), |b| {
            b.iter(|| apply_mask(black_box(&mut data), MASK))
        });
    }

    group.finish();
}

// =============================================================================
// Streaming Decoder Benchmarks
// =============================================================================

struct Discard;

impl FrameHandler for Discard {
    fn on_message_header(&mut self, _: OpCode) -> wharf::Result<()> {
        Ok(())
    }

    fn on_message_payload(&mut self, _: u64, data: Bytes) -> wharf::Result<()> {
        black_box(data);
        Ok(())
    }

    fn on_message_end(&mut self, _: u64) -> wharf::Result<bool> {
        Ok(true)
    }

    fn on_control_message(&mut self, _: OpCode, _: Bytes) -> wharf::Result<bool> {
        Ok(true)
    }
}

fn bench_decoder(c: &mut Criterion) {
    let mut group = c.benchmark_group("decoder");

    let mut wire = Vec::new();
    for _ in 0..100 {
        wire.extend_from_slice(&Frame::text(vec![b'a'; 128]).to_bytes(Some(MASK)));
    }
    group.throughput(Throughput::Bytes(wire.len() as u64));
    group.bench_function("100x128b_in_1500b_reads", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new(Role::Server, 1 << 20);
            for chunk in wire.chunks(1500) {
                decoder.feed(black_box(chunk), &mut Discard).unwrap();
            }
        })
    });

    group.finish();
}

// =============================================================================
// Handshake and Codec Benchmarks
// =============================================================================

fn bench_handshake(c: &mut Criterion) {
    c.bench_function("compute_accept_key", |b| {
        b.iter(|| compute_accept_key(black_box("dGhlIHNhbXBsZSBub25jZQ==")))
    });
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    group.bench_function("vuint50_encode_decode", |b| {
        let mut buf = Vec::with_capacity(8);
        b.iter(|| {
            buf.clear();
            encode_vuint50(black_box(1 << 40), &mut buf);
            decode_vuint50(&buf)
        })
    });

    let schema = MessageSchema::new(
        "Move",
        7,
        vec![
            Field::vuint("entity"),
            Field::vint("dx"),
            Field::vint("dy"),
            Field::array("tags", vec![Field::string("tag")]),
        ],
    );
    let record = Record::new()
        .with("entity", Value::VUInt(123_456))
        .with("dx", Value::VInt(-3))
        .with("dy", Value::VInt(9))
        .with(
            "tags",
            Value::Array(
                (0..8)
                    .map(|i| Record::new().with("tag", Value::String(format!("t{i}"))))
                    .collect(),
            ),
        );
    let encoded = schema.to_bytes(&record).unwrap();
    group.bench_function("schema_encode", |b| b.iter(|| schema.to_bytes(black_box(&record))));
    group.bench_function("schema_decode", |b| b.iter(|| schema.decode(black_box(&encoded))));

    group.finish();
}

// =============================================================================
// Dispatcher Benchmarks
// =============================================================================

fn bench_dispatcher(c: &mut Criterion) {
    let dispatcher = JobDispatcher::start(&Config::default().with_worker_threads(4)).unwrap();
    let categories: Vec<_> = (0..16).map(|_| ConnectionId::next()).collect();

    c.bench_function("dispatch_1000_jobs_16_categories", |b| {
        b.iter(|| {
            for i in 0..1000 {
                let category = categories[i % categories.len()];
                dispatcher.enqueue(Job::new(category, || Ok(()))).unwrap();
            }
            dispatcher.wait_idle();
        })
    });
}

criterion_group!(
    benches,
    bench_frame_parsing,
    bench_masking,
    bench_decoder,
    bench_handshake,
    bench_codec,
    bench_dispatcher,
);
criterion_main!(benches);
