//! Log entry serialization benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use quill_logstreams::{
    processed, EventMetadata, LogAppendEntry, LogEntrySerializer, LoggedEvent, RecordType,
    RejectionType, SequencedBatch, ValueType,
};

fn create_test_entry(value_size: usize) -> LogAppendEntry {
    LogAppendEntry::new(
        EventMetadata::new(RecordType::Command, ValueType::ProcessInstance, 1)
            .with_request(3, 42),
        Bytes::from(vec![b'x'; value_size]),
    )
    .with_key(7)
}

fn bench_entry_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("entry_serialize");
    let serializer = LogEntrySerializer::new();

    for size in [100, 1000, 10000] {
        let entry = create_test_entry(size);
        let mut buf = vec![0u8; serializer.framed_length(&entry).unwrap()];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &entry, |b, entry| {
            b.iter(|| black_box(serializer.serialize(&mut buf, 0, entry, 10, 9, 1_000).unwrap()));
        });
    }

    let entry = create_test_entry(100);
    let mut buf = vec![0u8; serializer.framed_length(&entry).unwrap()];
    group.bench_function("processed", |b| {
        b.iter(|| {
            black_box(
                serializer
                    .serialize(&mut buf, 0, &processed(&entry), 10, -1, 1_000)
                    .unwrap(),
            )
        });
    });

    group.finish();
}

fn bench_oversized_metadata(c: &mut Criterion) {
    let mut group = c.benchmark_group("entry_oversized_metadata");
    let serializer = LogEntrySerializer::new();

    for reason_len in [70_000, 500_000] {
        let entry = LogAppendEntry::new(
            EventMetadata::new(RecordType::CommandRejection, ValueType::Job, 0)
                .with_rejection(RejectionType::InvalidArgument, "r".repeat(reason_len)),
            Bytes::from_static(b"{}"),
        );
        let mut buf = vec![0u8; serializer.framed_length(&entry).unwrap()];

        group.throughput(Throughput::Bytes(reason_len as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(reason_len),
            &entry,
            |b, entry| {
                b.iter(|| black_box(serializer.serialize(&mut buf, 0, entry, 1, -1, 1).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_batch_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_serialize");

    for batch_size in [10, 100, 1000] {
        let entries = (0..batch_size).map(|_| create_test_entry(100)).collect();
        let batch = SequencedBatch::new(1, -1, 1_000, entries);
        let mut buf = vec![0u8; batch.length().unwrap()];

        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch,
            |b, batch| {
                b.iter(|| black_box(batch.serialize(&mut buf, 0).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_event_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_read");

    let entries = (0..100).map(|_| create_test_entry(100)).collect();
    let batch = SequencedBatch::new(1, -1, 1_000, entries);
    let mut buf = vec![0u8; batch.length().unwrap()];
    batch.serialize(&mut buf, 0).unwrap();

    group.throughput(Throughput::Elements(100));
    group.bench_function("iterate_and_decode_metadata", |b| {
        b.iter(|| {
            for event in LoggedEvent::iter(&buf) {
                let event = event.unwrap();
                black_box(event.read_metadata().unwrap());
                black_box(event.value());
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_entry_serialize,
    bench_oversized_metadata,
    bench_batch_serialize,
    bench_event_read,
);

criterion_main!(benches);
