//! Benchmarks for wire structure encoding and decoding.

#![allow(clippy::unwrap_used, missing_docs)]

use bytes::BytesMut;
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use tds_wire::{
    Done, DoneKind, EncryptionLevel, Login7, PACKET_HEADER_SIZE, PacketHeader, PacketStatus,
    PacketType, PreLogin, ServerVersion, encode_sql_batch, utf16,
};

fn bench_packet_header(c: &mut Criterion) {
    let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 1000);
    let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE);
    header.encode(&mut buf);
    let encoded = buf.freeze();

    c.bench_function("packet_header_encode", |b| {
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE);
            header.encode(&mut buf);
            black_box(buf)
        })
    });
    c.bench_function("packet_header_decode", |b| {
        b.iter(|| {
            let mut cursor = encoded.clone();
            black_box(PacketHeader::decode(&mut cursor).unwrap())
        })
    });
}

fn bench_prelogin(c: &mut Criterion) {
    let prelogin = PreLogin::new(ServerVersion::new(16, 0, 1000), EncryptionLevel::On);
    let encoded = prelogin.encode();

    c.bench_function("prelogin_encode", |b| b.iter(|| black_box(prelogin.encode())));
    c.bench_function("prelogin_decode", |b| {
        b.iter(|| black_box(PreLogin::decode(&encoded).unwrap()))
    });
}

fn bench_login7(c: &mut Criterion) {
    let login = Login7::default()
        .with_sql_auth("sa", "Str0ng!Passw0rd")
        .with_database("master")
        .with_hostname("bench-host");
    c.bench_function("login7_encode", |b| b.iter(|| black_box(login.encode().unwrap())));
}

fn bench_sql_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql_batch_encode");
    for (name, sql) in [
        ("simple", "SELECT 1"),
        (
            "join",
            "SELECT u.id, u.name, o.total FROM users u \
             INNER JOIN orders o ON u.id = o.user_id \
             WHERE u.organization_id = @p1 ORDER BY o.created_at DESC",
        ),
    ] {
        group.throughput(Throughput::Bytes(sql.len() as u64));
        group.bench_function(name, |b| b.iter(|| black_box(encode_sql_batch(black_box(sql), 0))));
    }
    group.finish();
}

fn bench_utf16(c: &mut Criterion) {
    let text = "Grüße aus Zürich, 東京 and plain ASCII ".repeat(16);
    let encoded = utf16::encode_utf16(&text);
    c.bench_function("utf16_decode", |b| {
        b.iter(|| black_box(utf16::decode_utf16_lossy(&encoded)))
    });
}

fn bench_done(c: &mut Criterion) {
    let raw = [0x10u8, 0x00, 0xC1, 0x00, 42, 0, 0, 0, 0, 0, 0, 0];
    c.bench_function("done_decode", |b| {
        b.iter(|| black_box(Done::decode(DoneKind::Done, &mut raw.as_ref()).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_packet_header,
    bench_prelogin,
    bench_login7,
    bench_sql_batch,
    bench_utf16,
    bench_done,
);

criterion_main!(benches);
