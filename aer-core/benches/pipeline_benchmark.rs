//! Benchmarks for packed decoding and the full pipeline cycle.
//!
//! Run with: cargo bench

use aer_core::{
    AddressLayout, Channel, EventBatch, Input, PackedCodec, Pipeline, PipelineConfig, Polarity,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::time::Duration;

/// One default-sized chunk of synthetic stereo events with rising stamps.
fn synthetic_chunk(records: u32) -> Vec<u8> {
    let layout = AddressLayout::DVS128;
    let mut raw = Vec::with_capacity(records as usize * 8);
    for i in 0..records {
        let x = ((i * 7) % 128) as u16;
        let y = ((i * 13) % 128) as u16;
        let polarity = Polarity::from_bit(i);
        let channel = Channel::from_bit(i >> 1);
        PackedCodec::encode_record(layout.encode(x, y, polarity, channel), 1_000 + i, &mut raw);
    }
    raw
}

fn decode_benchmark(c: &mut Criterion) {
    let raw = synthetic_chunk(4_096);
    let codec = PackedCodec::new(AddressLayout::DVS128);
    let mut batch = EventBatch::with_capacity(4_096);

    let mut group = c.benchmark_group("decode_packed");
    group.throughput(Throughput::Bytes(raw.len() as u64));

    group.bench_function("chunk_32k", |b| {
        b.iter(|| {
            batch.clear();
            codec.decode(black_box(&raw), &mut batch);
            black_box(batch.len())
        })
    });

    group.finish();
}

fn pipeline_benchmark(c: &mut Criterion) {
    let input = Input::Packed(synthetic_chunk(4_096));
    let mut pipeline = Pipeline::new(PipelineConfig::default()).unwrap();

    let mut group = c.benchmark_group("pipeline_tick");
    group.throughput(Throughput::Elements(4_096));

    group.bench_function("decode_sync_ingest", |b| {
        b.iter(|| {
            let report = pipeline.tick(black_box(Some(&input)), Duration::from_millis(5));
            black_box(report.ingested)
        })
    });

    group.bench_function("forget", |b| b.iter(|| pipeline.forget()));

    group.finish();
}

criterion_group!(benches, decode_benchmark, pipeline_benchmark);
criterion_main!(benches);
