use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::io::Cursor;

use lazymsg::{BytesSource, Config, OpenOptions, Value, default_codec, open_source, pack_with};

fn generate_tree(rows: usize) -> Value {
    let mut rng = fastrand::Rng::with_seed(0xBEEF);
    let table: Vec<Value> = (0..rows)
        .map(|i| {
            Value::Map(vec![
                ("id".to_string(), Value::Int(i as i64)),
                ("score".to_string(), Value::F64(rng.f64())),
                (
                    "tags".to_string(),
                    Value::Seq((0..8).map(|_| Value::Int(rng.i64(0..1000))).collect()),
                ),
            ])
        })
        .collect();
    Value::Map(vec![
        ("rows".to_string(), Value::Seq(table)),
        (
            "series".to_string(),
            Value::Seq((0..10_000).map(|i| Value::F64(i as f64)).collect()),
        ),
    ])
}

fn pack_to_vec(value: &Value, config: &Config) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    pack_with(value, &mut cursor, config).expect("pack");
    cursor.into_inner()
}

fn bench_pack(c: &mut Criterion) {
    let value = generate_tree(2_000);
    let config = Config::default();

    c.bench_function("pack_2k_rows", |b| {
        b.iter(|| pack_to_vec(black_box(&value), &config))
    });
}

fn bench_lazy_path_read(c: &mut Criterion) {
    let value = generate_tree(2_000);
    let config = Config {
        small_obj_threshold: 256,
        ..Config::default()
    };
    let blob = pack_to_vec(&value, &config);

    c.bench_function("lazy_read_one_element", |b| {
        b.iter(|| {
            let reader = open_source(
                Box::new(BytesSource::new(blob.clone())),
                OpenOptions {
                    cached: true,
                    codec: default_codec(),
                    config: config.clone(),
                },
            )
            .expect("open");
            let value = reader
                .read_path(black_box("series/5000"))
                .expect("read path")
                .to_plain()
                .expect("plain");
            black_box(value)
        })
    });
}

criterion_group!(benches, bench_pack, bench_lazy_path_read);
criterion_main!(benches);
