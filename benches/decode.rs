//! Benchmarks for output table decoding
//!
//! Run with: cargo bench

use camb_pipes::analysis::decode;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// A Cl-style table: multipole followed by `columns - 1` spectra
fn synthetic_table(rows: usize, columns: usize, fortran_exponents: bool) -> Vec<u8> {
    let mut out = String::from("#    L    TT    EE    BB    TE\n");
    for l in 2..rows + 2 {
        out.push_str(&format!("{:6}", l));
        for c in 1..columns {
            let value = 1.0e3 / (l as f64 * c as f64);
            let cell = format!("{:>16.8E}", value);
            if fortran_exponents {
                out.push_str(&cell.replace('E', "D"));
            } else {
                out.push_str(&cell);
            }
        }
        out.push('\n');
    }
    out.into_bytes()
}

fn bench_decode_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for rows in [100, 2_000, 10_000] {
        let bytes = synthetic_table(rows, 5, false);
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("rows", rows), &bytes, |b, bytes| {
            b.iter(|| decode(black_box(bytes)))
        });
    }

    group.finish();
}

fn bench_decode_exponent_styles(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_exponents");
    let plain = synthetic_table(2_000, 7, false);
    let fortran = synthetic_table(2_000, 7, true);

    group.bench_function("e_exponent", |b| b.iter(|| decode(black_box(&plain))));
    group.bench_function("d_exponent", |b| b.iter(|| decode(black_box(&fortran))));

    group.finish();
}

criterion_group!(benches, bench_decode_sizes, bench_decode_exponent_styles);
criterion_main!(benches);
