//! Round-trip and partial-read fidelity over generated trees.

use std::io::Cursor;

use lazymsg::{
    BytesSource, Config, MsgpackCodec, OpenOptions, PathSeg, ReaderSession, TocNode, Value,
    default_codec, open_source, pack_with,
};

fn pack_to_vec(value: &Value, config: &Config) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    pack_with(value, &mut cursor, config).expect("pack");
    cursor.into_inner()
}

fn open_mem(blob: Vec<u8>, config: &Config) -> ReaderSession {
    open_source(
        Box::new(BytesSource::new(blob)),
        OpenOptions {
            cached: true,
            codec: default_codec(),
            config: config.clone(),
        },
    )
    .expect("open")
}

fn random_key(rng: &mut fastrand::Rng, taken: &[(String, Value)]) -> String {
    loop {
        let len = rng.usize(1..8);
        let key: String = (0..len).map(|_| rng.alphanumeric()).collect();
        if !taken.iter().any(|(k, _)| *k == key) {
            return key;
        }
    }
}

fn gen_value(rng: &mut fastrand::Rng, depth: usize) -> Value {
    let pick = if depth == 0 {
        rng.usize(0..6)
    } else {
        rng.usize(0..8)
    };
    match pick {
        0 => Value::Nil,
        1 => Value::Bool(rng.bool()),
        2 => Value::Int(rng.i64(-1_000_000_000..1_000_000_000)),
        3 => Value::F64(rng.f64() * 1e6 - 5e5),
        4 => {
            let len = rng.usize(0..20);
            Value::Str((0..len).map(|_| rng.alphanumeric()).collect())
        }
        5 => {
            let len = rng.usize(0..16);
            Value::Bin((0..len).map(|_| rng.u8(..)).collect())
        }
        6 => {
            let len = rng.usize(0..6);
            Value::Seq((0..len).map(|_| gen_value(rng, depth - 1)).collect())
        }
        _ => {
            let len = rng.usize(0..6);
            let mut pairs: Vec<(String, Value)> = Vec::with_capacity(len);
            for _ in 0..len {
                let key = random_key(rng, &pairs);
                pairs.push((key, gen_value(rng, depth - 1)));
            }
            Value::Map(pairs)
        }
    }
}

fn all_paths(value: &Value) -> Vec<Vec<PathSeg>> {
    fn walk(value: &Value, current: &mut Vec<PathSeg>, out: &mut Vec<Vec<PathSeg>>) {
        out.push(current.clone());
        match value {
            Value::Map(pairs) => {
                for (key, child) in pairs {
                    current.push(PathSeg::Key(key.clone()));
                    walk(child, current, out);
                    current.pop();
                }
            }
            Value::Seq(items) => {
                for (index, child) in items.iter().enumerate() {
                    current.push(PathSeg::Index(index));
                    walk(child, current, out);
                    current.pop();
                }
            }
            _ => {}
        }
    }
    let mut out = Vec::new();
    walk(value, &mut Vec::new(), &mut out);
    out
}

fn follow<'a>(mut value: &'a Value, path: &[PathSeg]) -> &'a Value {
    for segment in path {
        value = match (value, segment) {
            (Value::Map(pairs), PathSeg::Key(key)) => {
                &pairs.iter().find(|(k, _)| k == key).expect("key").1
            }
            (Value::Seq(items), PathSeg::Index(index)) => &items[*index],
            other => panic!("bad path step {other:?}"),
        };
    }
    value
}

#[test]
fn generated_trees_roundtrip() {
    for seed in 0..40u64 {
        let mut rng = fastrand::Rng::with_seed(seed);
        let value = gen_value(&mut rng, 4);
        let blob = pack_to_vec(&value, &Config::default());
        let reader = open_mem(blob, &Config::default());
        let decoded = reader.read().expect("read").to_plain().expect("to_plain");
        assert_eq!(decoded, value, "seed {seed}");
    }
}

#[test]
fn every_path_resolves_to_the_plain_subtree() {
    // A small threshold forces deep TOC expansion so path resolution runs
    // through cursors, not just through decoded small containers.
    let config = Config {
        small_obj_threshold: 16,
        ..Config::default()
    };
    for seed in 0..20u64 {
        let mut rng = fastrand::Rng::with_seed(1000 + seed);
        let value = gen_value(&mut rng, 4);
        let blob = pack_to_vec(&value, &config);
        let reader = open_mem(blob, &config);
        for path in all_paths(&value) {
            let expected = follow(&value, &path);
            let resolved = reader
                .read_path(path.clone())
                .unwrap_or_else(|e| panic!("seed {seed}, path {path:?}: {e}"))
                .to_plain()
                .expect("to_plain");
            assert_eq!(&resolved, expected, "seed {seed}, path {path:?}");
        }
        reader.close();
    }
}

#[test]
fn repacking_a_full_decode_is_byte_identical() {
    let config = Config {
        small_obj_threshold: 32,
        ..Config::default()
    };
    let mut rng = fastrand::Rng::with_seed(7);
    let value = gen_value(&mut rng, 4);
    let blob = pack_to_vec(&value, &config);
    let reader = open_mem(blob.clone(), &config);
    let decoded = reader.read().expect("read").to_plain().expect("to_plain");
    let repacked = pack_to_vec(&decoded, &config);
    assert_eq!(repacked, blob);
}

#[test]
fn toc_of_every_pack_validates() {
    let config = Config {
        small_obj_threshold: 24,
        trivial_size: 10,
        ..Config::default()
    };
    for seed in 0..20u64 {
        let mut rng = fastrand::Rng::with_seed(4242 + seed);
        let value = gen_value(&mut rng, 5);
        let blob = pack_to_vec(&value, &config);
        let header = lazymsg::header::HeaderCodec::parse_prefix(&blob).expect("header");
        let toc_bytes =
            &blob[header.toc_start as usize..(header.toc_start + header.toc_len) as usize];
        let toc = TocNode::decode(&MsgpackCodec, toc_bytes).expect("toc");
        toc.validate(header.payload_len()).expect("invariants hold");
    }
}

#[test]
fn larger_threshold_never_grows_the_toc() {
    let mut rng = fastrand::Rng::with_seed(99);
    let value = gen_value(&mut rng, 5);
    let thresholds = [16usize, 64, 256, 1024, 8192];
    let mut sizes = Vec::new();
    for threshold in thresholds {
        let config = Config {
            small_obj_threshold: threshold,
            ..Config::default()
        };
        let blob = pack_to_vec(&value, &config);
        let header = lazymsg::header::HeaderCodec::parse_prefix(&blob).expect("header");
        sizes.push(header.toc_len);
    }
    for pair in sizes.windows(2) {
        assert!(
            pair[1] <= pair[0],
            "toc grew with threshold: {sizes:?}"
        );
    }
}

#[test]
fn empty_containers_roundtrip() {
    for value in [Value::Map(vec![]), Value::Seq(vec![])] {
        let blob = pack_to_vec(&value, &Config::default());
        let reader = open_mem(blob, &Config::default());
        let decoded = reader.read().expect("read").to_plain().expect("to_plain");
        assert_eq!(decoded, value);
    }
}

#[test]
fn ext_values_pass_through_opaquely() {
    let value = Value::Map(vec![
        ("plain".to_string(), Value::Int(3)),
        ("custom".to_string(), Value::Ext(42, vec![1, 2, 3, 4, 5])),
        (
            "stamps".to_string(),
            Value::Seq(vec![Value::Ext(-1, vec![0; 8]), Value::Ext(-1, vec![9; 8])]),
        ),
    ]);
    let config = Config {
        small_obj_threshold: 4,
        ..Config::default()
    };
    let blob = pack_to_vec(&value, &config);
    let reader = open_mem(blob, &config);
    let decoded = reader.read().expect("read").to_plain().expect("to_plain");
    assert_eq!(decoded, value);
    let ext = reader
        .read_path("custom")
        .expect("custom")
        .to_plain()
        .expect("plain");
    assert_eq!(ext, Value::Ext(42, vec![1, 2, 3, 4, 5]));
}

#[test]
fn deeply_nested_value_roundtrips() {
    let mut value = Value::Str("leaf".to_string());
    for _ in 0..40 {
        value = Value::Seq(vec![value]);
    }
    let config = Config {
        small_obj_threshold: 4,
        ..Config::default()
    };
    let blob = pack_to_vec(&value, &config);
    let reader = open_mem(blob, &config);
    let decoded = reader.read().expect("read").to_plain().expect("to_plain");
    assert_eq!(decoded, value);
}

#[test]
fn grouped_table_flips_exactly_at_the_threshold() {
    let value = Value::Seq((0..64).map(Value::Int).collect());
    let encoded = lazymsg::codec::encode_to_vec(&MsgpackCodec, &value).expect("encode");
    let len = encoded.len();

    let read_toc = |threshold: usize| -> TocNode {
        let config = Config {
            small_obj_threshold: threshold,
            ..Config::default()
        };
        let blob = pack_to_vec(&value, &config);
        let header = lazymsg::header::HeaderCodec::parse_prefix(&blob).expect("header");
        let toc_bytes =
            &blob[header.toc_start as usize..(header.toc_start + header.toc_len) as usize];
        TocNode::decode(&MsgpackCodec, toc_bytes).expect("toc")
    };

    // At the exact encoded length the container is no longer "small".
    assert!(!read_toc(len).is_leaf());
    assert!(read_toc(len + 1).is_leaf());
}

#[test]
fn keys_with_slashes_and_multibyte_text_resolve_via_typed_paths() {
    let value = Value::Map(vec![
        ("a/b".to_string(), Value::Int(1)),
        ("日本語".to_string(), Value::Int(2)),
        (
            "nested".to_string(),
            Value::Map(vec![("inner".to_string(), Value::Str("✓".to_string()))]),
        ),
    ]);
    let config = Config {
        small_obj_threshold: 4,
        ..Config::default()
    };
    let blob = pack_to_vec(&value, &config);
    let reader = open_mem(blob, &config);

    let via_typed = reader
        .read_path(vec![PathSeg::Key("a/b".to_string())])
        .expect("typed path")
        .to_plain()
        .expect("to_plain");
    assert_eq!(via_typed, Value::Int(1));

    let multibyte = reader
        .read_path("日本語")
        .expect("string path")
        .to_plain()
        .expect("to_plain");
    assert_eq!(multibyte, Value::Int(2));

    // The string form splits on '/', so the slash key is unreachable there.
    assert!(reader.read_path("a/b").is_err());
}
