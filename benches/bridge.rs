use criterion::{criterion_group, criterion_main, Criterion};

use terrabridge::chunk::{convert, ChunkSeed, CHUNK_DIM, CHUNK_PAYLOAD_LEN};
use terrabridge::invoke::RawBuffer;
use terrabridge::symbols::demangle;

fn raw_buffer(seed: &ChunkSeed) -> RawBuffer {
    let mut bytes = Vec::with_capacity(16 + CHUNK_PAYLOAD_LEN);
    bytes.extend_from_slice(&(CHUNK_PAYLOAD_LEN as u32).to_le_bytes());
    bytes.extend_from_slice(&seed.x.to_le_bytes());
    bytes.extend_from_slice(&seed.y.to_le_bytes());
    bytes.extend_from_slice(&seed.version.to_le_bytes());
    for col in 0..CHUNK_DIM as u32 {
        for row in 0..CHUNK_DIM as u32 {
            bytes.extend_from_slice(&(col.wrapping_mul(2654435761).wrapping_add(row)).to_le_bytes());
        }
    }
    RawBuffer::new(bytes)
}

fn bench_demangle(c: &mut Criterion) {
    c.bench_function("demangle_generator_export", |b| {
        b.iter(|| demangle(std::hint::black_box("?GenerateChunk@@YGHIJJIPAPAE@Z")).unwrap())
    });
}

fn bench_convert(c: &mut Criterion) {
    let seed = ChunkSeed {
        world_seed: 42,
        x: 3,
        y: 7,
        version: 1,
    };
    let raw = raw_buffer(&seed);

    c.bench_function("convert_chunk", |b| {
        b.iter(|| convert(std::hint::black_box(&raw), &seed).unwrap())
    });
}

criterion_group!(benches, bench_demangle, bench_convert);
criterion_main!(benches);
