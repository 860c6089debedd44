//! Marshaling benchmarks
//!
//! Measures table writes and reads against the in-memory backend, plus the
//! host-side scalar validators on their own.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rfc_bridge::ffi::{FunctionDescHandle, MockLibrary, RfcLibrary};
use rfc_bridge::marshal::scalar;
use rfc_bridge::{MarshalOptions, Marshaller, RfcType, Value};

fn row(i: usize) -> Value {
    [
        ("RFCFLOAT", Value::Number(i as f64 * 1.25)),
        ("RFCCHAR1", Value::from("X")),
        ("RFCINT2", Value::Integer((i % 30_000) as i64)),
        ("RFCINT1", Value::Integer((i % 100) as i64)),
        ("RFCINT4", Value::Integer(i as i64)),
        ("RFCHEX3", Value::Bytes(vec![1, 2, 3])),
        ("RFCTIME", Value::from("101010")),
        ("RFCDATE", Value::from("20240101")),
        ("RFCDATA1", Value::from(format!("row number {}", i))),
    ]
    .into_iter()
    .collect()
}

fn descriptor(lib: &MockLibrary) -> FunctionDescHandle {
    let session = lib
        .open_connection(&[("dest".to_string(), "BENCH".to_string())])
        .expect("open");
    lib.get_function_desc(session, "STFC_STRUCTURE").expect("descriptor")
}

fn bench_table_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_write");

    for size in [10, 100, 1000].iter() {
        let rows = Value::Array((0..*size).map(row).collect());
        group.bench_with_input(BenchmarkId::from_parameter(size), &rows, |b, rows| {
            let lib = MockLibrary::new();
            let marshaller = Marshaller::new(&lib, MarshalOptions::default());
            let desc = descriptor(&lib);
            b.iter(|| {
                let ctx = lib.create_function(desc).expect("call context");
                marshaller
                    .set_value(ctx, "RFCTABLE", RfcType::Table, 0, black_box(rows))
                    .expect("write");
                lib.destroy_function(ctx).expect("destroy");
            });
        });
    }

    group.finish();
}

fn bench_table_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_read");

    for size in [10, 100, 1000].iter() {
        let lib = MockLibrary::new();
        let marshaller = Marshaller::new(&lib, MarshalOptions::default());
        let ctx = lib.create_function(descriptor(&lib)).expect("call context");
        let rows = Value::Array((0..*size).map(row).collect());
        marshaller
            .set_value(ctx, "RFCTABLE", RfcType::Table, 0, &rows)
            .expect("write");

        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| marshaller.get_value(black_box(ctx), "RFCTABLE", RfcType::Table, 0).expect("read"));
        });
    }

    group.finish();
}

fn bench_scalar_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate");
    let text = Value::from("x".repeat(200));
    let number = Value::Integer(12_345);
    let decimal = Value::Number(1234.5678);

    group.bench_function("chars", |b| b.iter(|| scalar::chars("P", black_box(&text), 255)));
    group.bench_function("int2", |b| b.iter(|| scalar::integer::<i16>("P", black_box(&number))));
    group.bench_function("decimal", |b| b.iter(|| scalar::decimal("P", black_box(&decimal))));

    group.finish();
}

criterion_group!(benches, bench_table_write, bench_table_read, bench_scalar_validation);
criterion_main!(benches);
