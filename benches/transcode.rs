//! Transcoding throughput: framing, validation and optional gzip output
//!
//! Run with: cargo bench --bench transcode

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fastx_upload::io::{OutputBuffer, RecordFramer, Transcoder};
use std::io::Read;

/// Synthetic FASTQ with `n` reads of `len` bases
fn generate_fastq(n: usize, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(n * (2 * len + 16));
    for i in 0..n {
        out.extend_from_slice(format!("@read{}\n", i).as_bytes());
        out.extend((0..len).map(|j| [b'A', b'C', b'G', b'T'][(i + j) % 4]));
        out.extend_from_slice(b"\n+\n");
        out.extend((0..len).map(|j| 33 + (j % 40) as u8));
        out.push(b'\n');
    }
    out
}

fn transcode(data: &[u8], recompress: bool) -> u64 {
    let framer = RecordFramer::from_bytes(data.to_vec()).unwrap();
    let mut session = Transcoder::new(framer, None, recompress).unwrap();
    let mut sink = Vec::new();
    session.read_to_end(&mut sink).unwrap();
    session.total_written()
}

fn bench_transcode(c: &mut Criterion) {
    let mut group = c.benchmark_group("transcode");

    for reads in [1_000, 10_000, 50_000].iter() {
        let data = generate_fastq(*reads, 150);
        group.throughput(Throughput::Bytes(data.len() as u64));

        group.bench_with_input(BenchmarkId::new("plain", reads), &data, |b, data| {
            b.iter(|| transcode(black_box(data), false))
        });
        group.bench_with_input(BenchmarkId::new("gzip", reads), &data, |b, data| {
            b.iter(|| transcode(black_box(data), true))
        });
    }

    group.finish();
}

fn bench_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");
    let data = generate_fastq(10_000, 150);
    group.throughput(Throughput::Bytes(data.len() as u64));

    for chunk in [4 * 1024, 64 * 1024, 1024 * 1024].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(chunk), chunk, |b, &chunk| {
            b.iter(|| {
                let framer = RecordFramer::from_bytes(data.clone())
                    .unwrap()
                    .with_chunk_size(chunk);
                black_box(framer.filter(|r| r.is_ok()).count())
            })
        });
    }

    group.finish();
}

fn bench_output_buffer(c: &mut Criterion) {
    let record = generate_fastq(1, 150);
    let mut group = c.benchmark_group("output_buffer");
    group.throughput(Throughput::Bytes((record.len() * 10_000) as u64));

    for recompress in [false, true].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(if *recompress { "gzip" } else { "plain" }),
            recompress,
            |b, &recompress| {
                b.iter(|| {
                    let mut buffer = OutputBuffer::new(recompress);
                    for _ in 0..10_000 {
                        buffer.write_all(black_box(&record)).unwrap();
                    }
                    buffer.close().unwrap();
                    black_box(buffer.len())
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_transcode, bench_framing, bench_output_buffer);
criterion_main!(benches);
