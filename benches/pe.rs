#![allow(unused)]
extern crate dotpe;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use dotpe::prelude::*;
use std::hint::black_box;

fn metadata(size: usize) -> Vec<u8> {
    let mut metadata = b"BSJB".to_vec();
    metadata.resize(size, 0x5A);
    metadata
}

fn managed_builder(machine: Machine, metadata_size: usize) -> ManagedPEBuilder {
    let mut debug = DebugDirectoryBuilder::new();
    debug.add_reproducible_entry();

    ManagedPEBuilder::new(
        PEHeaderBuilder::create_library_header().with_machine(machine),
        RawMetadata::new(metadata(metadata_size)),
        BlobBuilder::from_bytes(vec![0x2A; 4096]),
    )
    .unwrap()
    .with_debug_directory(debug)
    .deterministic()
}

/// Benchmark header parsing of an x86 managed image (stub, `.text` and `.reloc`)
fn bench_parse_headers(c: &mut Criterion) {
    let image = managed_builder(Machine::I386, 64 * 1024)
        .serialize()
        .unwrap()
        .into_bytes();

    let mut group = c.benchmark_group("headers");
    group.throughput(Throughput::Bytes(image.len() as u64));
    group.bench_function("PEHeaders::from_bytes", |b| {
        b.iter(|| {
            let headers = PEHeaders::from_bytes(black_box(&image)).unwrap();
            black_box(headers)
        });
    });

    // Reader construction plus lazy header and metadata materialization
    group.bench_function("PEReader::get_metadata", |b| {
        b.iter_batched(
            || image.clone(),
            |data| {
                let reader = PEReader::from_bytes(data);
                black_box(reader.get_metadata().unwrap().len())
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

/// Benchmark serialization of managed images of increasing metadata size
fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize");
    for size in [4 * 1024, 256 * 1024, 4 * 1024 * 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("ManagedPEBuilder/{}KB", size / 1024), |b| {
            b.iter_batched(
                || managed_builder(Machine::Amd64, size),
                |builder| black_box(builder.serialize().unwrap()),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

/// Benchmark the PE checksum over a large image
fn bench_checksum(c: &mut Criterion) {
    let mut image = managed_builder(Machine::Amd64, 4 * 1024 * 1024)
        .serialize()
        .unwrap();

    let mut group = c.benchmark_group("checksum");
    group.throughput(Throughput::Bytes(image.len() as u64));
    group.bench_function("PEImage::update_checksum", |b| {
        b.iter(|| {
            image.update_checksum().unwrap();
            black_box(image.checksum().unwrap())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_parse_headers, bench_serialize, bench_checksum);
criterion_main!(benches);
