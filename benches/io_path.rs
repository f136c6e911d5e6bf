/// minibroker I/O Path Benchmarks
///
/// Covers the per-request hot path without networking:
/// - Frame encode/decode for a pipelined batch
/// - Log append (memory and file-backed)
/// - Log read by offset
/// - Full processor round trip (PRODUCE + FETCH)
use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tempfile::TempDir;

use minibroker::broker::MessageProcessor;
use minibroker::protocol::{encode_into, FrameDecoder, Message};
use minibroker::storage::{FileLog, FileLogOptions, MemoryLog, MessageLog};

const PAYLOAD_SIZES: [(usize, &str); 3] = [(128, "128B"), (1024, "1KB"), (16 * 1024, "16KB")];

/// A log pre-filled with `count` messages of `size` bytes.
struct LogFixture {
    _temp_dir: Option<TempDir>,
    log: Arc<dyn MessageLog>,
}

impl LogFixture {
    fn memory(count: usize, size: usize) -> Self {
        Self::fill(None, Arc::new(MemoryLog::new()), count, size)
    }

    fn file(count: usize, size: usize) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let log = FileLog::open(dir.path(), FileLogOptions::default()).expect("failed to open log");
        Self::fill(Some(dir), Arc::new(log), count, size)
    }

    fn fill(dir: Option<TempDir>, log: Arc<dyn MessageLog>, count: usize, size: usize) -> Self {
        // Deterministic payloads: offset % 256 repeated.
        for i in 0..count {
            let msg = Message::produce(vec![(i % 256) as u8; size]).expect("payload too large");
            log.append(&msg).expect("append failed");
        }
        Self { _temp_dir: dir, log }
    }
}

/// Benchmark 1: Codec
///
/// Encode a batch of 64 frames into one buffer, then decode it back the way
/// a connection does after a single read.
fn benchmark_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for (size, label) in PAYLOAD_SIZES {
        let batch: Vec<Message> = (0..64)
            .map(|_| Message::produce(vec![7u8; size]).expect("payload too large"))
            .collect();
        let mut encoded = BytesMut::new();
        for msg in &batch {
            encode_into(msg, &mut encoded);
        }

        group.throughput(Throughput::Bytes(encoded.len() as u64));

        group.bench_function(BenchmarkId::new("encode_batch", label), |b| {
            b.iter(|| {
                let mut out = BytesMut::with_capacity(encoded.len());
                for msg in &batch {
                    encode_into(black_box(msg), &mut out);
                }
                black_box(out);
            });
        });

        group.bench_function(BenchmarkId::new("decode_batch", label), |b| {
            b.iter(|| {
                let mut decoder = FrameDecoder::with_capacity(encoded.len());
                decoder.extend(black_box(&encoded));
                let mut n = 0;
                while let Some(msg) = decoder.next_message().expect("decode failed") {
                    black_box(msg);
                    n += 1;
                }
                assert_eq!(n, batch.len());
            });
        });
    }

    group.finish();
}

/// Benchmark 2: Append
///
/// File appends run without fsync, so this measures the OS-buffered path.
fn benchmark_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");

    for (size, label) in PAYLOAD_SIZES {
        let msg = Message::produce(vec![1u8; size]).expect("payload too large");
        group.throughput(Throughput::Bytes(size as u64));

        let memory = LogFixture::memory(0, size);
        group.bench_function(BenchmarkId::new("memory", label), |b| {
            b.iter(|| black_box(memory.log.append(black_box(&msg)).expect("append failed")));
        });

        let file = LogFixture::file(0, size);
        group.bench_function(BenchmarkId::new("file", label), |b| {
            b.iter(|| black_box(file.log.append(black_box(&msg)).expect("append failed")));
        });
    }

    group.finish();
}

/// Benchmark 3: Read by offset
///
/// Offsets are walked in order over a 10k-entry log.
fn benchmark_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    let record_count = 10_000;

    for (size, label) in PAYLOAD_SIZES {
        group.throughput(Throughput::Bytes(size as u64));

        let fixtures = [
            ("memory", LogFixture::memory(record_count, size)),
            ("file", LogFixture::file(record_count, size)),
        ];

        for (backend, fixture) in &fixtures {
            group.bench_function(BenchmarkId::new(*backend, label), |b| {
                let mut offset = 0i64;
                b.iter(|| {
                    let msg = fixture.log.read(black_box(offset)).expect("read failed");
                    offset = (offset + 1) % record_count as i64;
                    black_box(msg);
                });
            });
        }
    }

    group.finish();
}

/// Benchmark 4: Processor round trip
///
/// One PRODUCE followed by a FETCH of the offset just written.
fn benchmark_processor(c: &mut Criterion) {
    let mut group = c.benchmark_group("processor");
    group.throughput(Throughput::Elements(2));

    let processor = MessageProcessor::new(Arc::new(MemoryLog::new()));
    let produce = Message::produce(vec![9u8; 512]).expect("payload too large");

    group.bench_function("produce_fetch_512B", |b| {
        let mut next = 0u64;
        b.iter(|| {
            black_box(processor.handle(produce.clone()));
            black_box(processor.handle(Message::fetch(next)));
            next += 1;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_codec,
    benchmark_append,
    benchmark_read,
    benchmark_processor
);
criterion_main!(benches);
