use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;
use unspool::misc::mtf::MtfList;
use unspool::transforms::deflate::{DeflateTransform, COMBINATION_COUNT};

fn sample(level: u32) -> Vec<u8> {
    let raw = b"the transform search walks every zlib parameter combination until one reproduces the input exactly"
        .repeat(64);
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::new(level));
    enc.write_all(&raw).unwrap();
    enc.finish().unwrap()
}

fn bench_deflate_validate(c: &mut Criterion) {
    let compressed = sample(6);
    c.bench_function("deflate_validate_cold_mtf", |b| {
        b.iter(|| {
            let mut mtf = MtfList::new(COMBINATION_COUNT);
            DeflateTransform::validate(black_box(&compressed), &mut mtf)
        })
    });

    let mut warm_mtf = MtfList::new(COMBINATION_COUNT);
    DeflateTransform::validate(&compressed, &mut warm_mtf);
    c.bench_function("deflate_validate_warm_mtf", |b| {
        b.iter(|| DeflateTransform::validate(black_box(&compressed), &mut warm_mtf))
    });
}

criterion_group!(benches, bench_deflate_validate);
criterion_main!(benches);
