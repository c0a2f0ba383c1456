//! Benchmarks for value encoding and decoding.

#![allow(clippy::unwrap_used, missing_docs)]

use std::hint::black_box;

use bytes::BytesMut;
use chrono::NaiveDate;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use tds_types::{Param, TypeInfo, Value, decode_column, encode_param, encode_value};
use tds_wire::{Collation, SqlType, TypeId};

fn bench_param_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("param_encode");
    let collation = Collation::default();

    let int = Param::new("id", 42_i32);
    group.bench_function("int", |b| {
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(32);
            encode_param(&mut buf, black_box(&int), collation).unwrap();
            black_box(buf)
        })
    });

    let decimal = Param::new("amount", "12345.6789".parse::<tds_types::Numeric>().unwrap())
        .with_type(SqlType::Decimal {
            precision: 18,
            scale: 2,
        });
    group.bench_function("decimal", |b| {
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(32);
            encode_param(&mut buf, black_box(&decimal), collation).unwrap();
            black_box(buf)
        })
    });

    let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. 日本語 émoji";
    let nvarchar = Param::new("text", text);
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("nvarchar", |b| {
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(256);
            encode_param(&mut buf, black_box(&nvarchar), collation).unwrap();
            black_box(buf)
        })
    });

    let dt = NaiveDate::from_ymd_opt(2024, 5, 17)
        .unwrap()
        .and_hms_nano_opt(10, 11, 12, 123_456_700)
        .unwrap();
    let datetime2 = Param::new("at", dt);
    group.bench_function("datetime2", |b| {
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(32);
            encode_param(&mut buf, black_box(&datetime2), collation).unwrap();
            black_box(buf)
        })
    });
    group.finish();
}

fn bench_row_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("row_decode");

    let int = TypeInfo::new(TypeId::IntN).with_len(4);
    let mut wire = Vec::new();
    encode_value(&mut wire, &int, &Value::I32(123_456), false).unwrap();
    group.bench_function("int", |b| {
        b.iter(|| decode_column(black_box(&int), &mut &wire[..]).unwrap())
    });

    let text = TypeInfo::new(TypeId::NVarChar)
        .with_len(8000)
        .with_collation(Collation::default());
    let mut wire = Vec::new();
    encode_value(&mut wire, &text, &Value::String("x".repeat(2000)), false).unwrap();
    group.throughput(Throughput::Bytes(wire.len() as u64));
    group.bench_function("nvarchar_2000", |b| {
        b.iter(|| decode_column(black_box(&text), &mut &wire[..]).unwrap())
    });

    let blob = TypeInfo::new(TypeId::BigVarBinary).with_len(0xFFFF);
    let mut wire = Vec::new();
    encode_value(&mut wire, &blob, &Value::Bytes(vec![0xAB; 64 * 1024].into()), false).unwrap();
    group.throughput(Throughput::Bytes(wire.len() as u64));
    group.bench_function("varbinary_max_64k", |b| {
        b.iter(|| decode_column(black_box(&blob), &mut &wire[..]).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_param_encode, bench_row_decode);
criterion_main!(benches);
