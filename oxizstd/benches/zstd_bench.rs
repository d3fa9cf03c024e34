//! Performance benchmarks for oxizstd
//!
//! This benchmark suite evaluates:
//! - Compression speed per level (one match finder per strategy tier)
//! - Performance across data patterns
//! - Context reuse versus a fresh context per frame
//! - Streaming with small buffers versus one-shot compression
//! - Digested dictionaries attached, copied and reloaded
//! - Reference decoder throughput

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use oxizstd::{
    CCtx, CDict, CParameter, DictAttachPref, EndDirective, InBuffer, OutBuffer, StreamCompressor,
    compress, compress_bound, decompress,
};
use std::hint::black_box;

/// Type alias for pattern generator functions
type PatternGenerator = fn(usize) -> Vec<u8>;

/// Generate test data patterns for benchmarking
mod test_data {
    /// Random data - no patterns (worst compression)
    pub fn random(size: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(size);
        let mut seed: u64 = 0x123456789ABCDEF0;
        for _ in 0..size {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            data.push((seed >> 32) as u8);
        }
        data
    }

    /// Text-like data - realistic scenario
    pub fn text_like(size: usize) -> Vec<u8> {
        let words: [&[u8]; 12] = [
            b"the ", b"quick ", b"brown ", b"fox ", b"jumps ", b"over ", b"lazy ", b"dog ",
            b"pack ", b"my ", b"box ", b"liquor ",
        ];
        let mut data = Vec::with_capacity(size);
        let mut seed: u32 = 0x9E37_79B9;
        while data.len() < size {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            data.extend_from_slice(words[(seed % 12) as usize]);
            if seed % 11 == 0 {
                data.extend_from_slice(b".\n");
            }
        }
        data.truncate(size);
        data
    }

    /// Binary executable-like data - mixed patterns
    pub fn binary_like(size: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(size);
        let mut seed: u64 = 0x123456789ABCDEF0;
        let section_size = size / 4;

        for _ in 0..section_size {
            data.push((seed % 256) as u8);
            if seed % 10 < 3 {
                seed = seed.wrapping_add(1);
            }
        }
        for _ in 0..section_size {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            data.push((seed >> 32) as u8);
        }
        data.extend(std::iter::repeat_n(0, section_size));
        for _ in 0..(size - data.len()) {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            data.push((seed >> 32) as u8);
        }
        data
    }

    /// JSON-like records with varying fields
    pub fn json_like(size: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(size);
        let mut id = 0u32;
        while data.len() < size {
            let record = format!(
                r#"{{"id":{id},"name":"user{}","age":{},"active":{},"tags":["rust","zstd"]}}"#,
                id * 7919 % 1000,
                18 + id % 60,
                id % 3 == 0
            );
            data.extend_from_slice(record.as_bytes());
            id += 1;
        }
        data.truncate(size);
        data
    }
}

/// Standard data sizes for benchmarking
mod data_sizes {
    pub const TINY: usize = 1024; // 1 KB
    pub const SMALL: usize = 10 * 1024; // 10 KB
    pub const MEDIUM: usize = 100 * 1024; // 100 KB
    pub const LARGE: usize = 1024 * 1024; // 1 MB
}

/// Benchmark compression levels
fn bench_compression_levels(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression_levels");

    let size = data_sizes::LARGE;
    let data = test_data::text_like(size);

    for level in [-5, 1, 2, 3, 5, 7, 12, 16, 19] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(level), &data, |b, data| {
            b.iter(|| {
                let compressed = compress(black_box(data), level).unwrap();
                black_box(compressed);
            });
        });
    }

    group.finish();
}

/// Benchmark compression speed for different data types
fn bench_compression_data_types(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression_data_types");

    let patterns: [(&str, PatternGenerator); 4] = [
        ("random", test_data::random as PatternGenerator),
        ("text", test_data::text_like as PatternGenerator),
        ("binary", test_data::binary_like as PatternGenerator),
        ("json", test_data::json_like as PatternGenerator),
    ];

    let size = data_sizes::MEDIUM;

    for (pattern_name, generator) in patterns {
        let data = generator(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(pattern_name),
            &data,
            |b, data| {
                b.iter(|| {
                    let compressed = compress(black_box(data), 3).unwrap();
                    black_box(compressed);
                });
            },
        );
    }

    group.finish();
}

/// Benchmark reusing one context against creating one per frame
fn bench_context_reuse(c: &mut Criterion) {
    let mut group = c.benchmark_group("context_reuse");

    for (size_name, size) in [("1KB", data_sizes::TINY), ("10KB", data_sizes::SMALL)] {
        let data = test_data::json_like(size);
        let mut dst = vec![0u8; compress_bound(size) + 1024];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("fresh", size_name), &data, |b, data| {
            b.iter(|| {
                let mut cctx = CCtx::with_level(3);
                black_box(cctx.compress2(&mut dst, black_box(data)).unwrap());
            });
        });

        let mut dst = vec![0u8; compress_bound(size) + 1024];
        let mut cctx = CCtx::with_level(3);
        group.bench_with_input(BenchmarkId::new("reused", size_name), &data, |b, data| {
            b.iter(|| {
                black_box(cctx.compress2(&mut dst, black_box(data)).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark streaming through a small output buffer
fn bench_streaming(c: &mut Criterion) {
    let mut group = c.benchmark_group("streaming");

    let size = data_sizes::LARGE;
    let data = test_data::text_like(size);

    group.throughput(Throughput::Bytes(size as u64));
    group.bench_with_input(BenchmarkId::from_parameter("one_shot"), &data, |b, data| {
        b.iter(|| black_box(compress(black_box(data), 3).unwrap()));
    });

    group.bench_with_input(BenchmarkId::from_parameter("4KB_chunks"), &data, |b, data| {
        let mut out = vec![0u8; 4096];
        b.iter(|| {
            let mut cctx = CCtx::with_level(3);
            let mut produced = 0usize;
            for chunk in data.chunks(4096) {
                let mut input = InBuffer::new(chunk);
                while !input.is_empty() {
                    let mut output = OutBuffer::new(&mut out);
                    cctx.compress_stream(&mut output, &mut input, EndDirective::Continue)
                        .unwrap();
                    produced += output.pos;
                }
            }
            let mut input = InBuffer::new(&[]);
            loop {
                let mut output = OutBuffer::new(&mut out);
                let left = cctx
                    .compress_stream(&mut output, &mut input, EndDirective::End)
                    .unwrap();
                produced += output.pos;
                if left == 0 {
                    break;
                }
            }
            black_box(produced);
        });
    });

    group.finish();
}

/// Benchmark dictionary modes on small inputs
fn bench_dictionary(c: &mut Criterion) {
    let mut group = c.benchmark_group("dictionary");

    let dict = test_data::json_like(16 * 1024);
    let data = test_data::json_like(2 * 1024);
    let cdict = CDict::new(&dict, 3).unwrap();
    let mut dst = vec![0u8; compress_bound(data.len()) + 1024];

    let prefs = [
        ("attach", DictAttachPref::ForceAttach),
        ("copy", DictAttachPref::ForceCopy),
        ("load", DictAttachPref::ForceLoad),
    ];

    for (name, pref) in prefs {
        let mut cctx = CCtx::with_level(3);
        cctx.set_parameter(CParameter::ForceAttachDict, pref as i32)
            .unwrap();
        cctx.ref_cdict(&cdict).unwrap();

        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &data, |b, data| {
            b.iter(|| black_box(cctx.compress2(&mut dst, black_box(data)).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark decompression speed for different sizes
fn bench_decompression_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompression_sizes");

    let sizes = [
        ("1KB", data_sizes::TINY),
        ("10KB", data_sizes::SMALL),
        ("100KB", data_sizes::MEDIUM),
        ("1MB", data_sizes::LARGE),
    ];

    for (size_name, size) in sizes {
        let original = test_data::text_like(size);
        let compressed = compress(&original, 3).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(size_name),
            &compressed,
            |b, compressed| {
                b.iter(|| {
                    let decompressed = decompress(black_box(compressed)).unwrap();
                    black_box(decompressed);
                });
            },
        );
    }

    group.finish();
}

/// Benchmark compression ratios
fn bench_compression_ratio(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression_ratio");
    group.sample_size(10);

    let data = test_data::json_like(data_sizes::MEDIUM);

    for level in [1, 3, 9, 19] {
        group.bench_with_input(BenchmarkId::from_parameter(level), &data, |b, data| {
            b.iter(|| {
                let compressed = compress(black_box(data), level).unwrap();
                let ratio = data.len() as f64 / compressed.len() as f64;
                black_box((compressed, ratio));
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_compression_levels,
    bench_compression_data_types,
    bench_context_reuse,
    bench_streaming,
    bench_dictionary,
    bench_decompression_sizes,
    bench_compression_ratio,
);
criterion_main!(benches);
