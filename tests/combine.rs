//! Combine: verbatim payload splicing with relocated TOCs.

use std::path::Path;

use lazymsg::{
    Config, FileRef, LazyError, MsgpackCodec, TocChildren, TocNode, Value, combine, combine_with,
    constants::PAYLOAD_ORIGIN, header::HeaderCodec, open_reader, pack_file_with,
};
use tempfile::TempDir;

fn payload_slice(blob: &[u8]) -> &[u8] {
    let header = HeaderCodec::parse_prefix(blob).expect("header");
    &blob[PAYLOAD_ORIGIN as usize..header.toc_start as usize]
}

fn pack_sample(dir: &Path, name: &str, value: &Value, config: &Config) -> std::path::PathBuf {
    let path = dir.join(name);
    pack_file_with(value, &path, config).expect("pack file");
    path
}

#[test]
fn keyed_combine_resolves_and_copies_verbatim() {
    let dir = TempDir::new().expect("tempdir");
    let config = Config::default();

    let a = Value::Map(vec![("x".to_string(), Value::Int(1))]);
    let b = Value::Seq(vec![Value::Int(7), Value::Int(8), Value::Int(9)]);
    let path_a = pack_sample(dir.path(), "a.lzmg", &a, &config);
    let path_b = pack_sample(dir.path(), "b.lzmg", &b, &config);

    let out = dir.path().join("combined.lzmg");
    combine(
        &out,
        &[
            FileRef::named(&path_a, "A"),
            FileRef::named(&path_b, "B"),
        ],
    )
    .expect("combine");

    let reader = open_reader(&out).expect("open combined");
    assert_eq!(
        reader.read_path("A/x").expect("A/x").to_plain().expect("plain"),
        Value::Int(1)
    );
    assert_eq!(
        reader.read_path("B/1").expect("B/1").to_plain().expect("plain"),
        Value::Int(8)
    );
    reader.close();

    // The inputs' payload bytes appear in the output byte-for-byte, at the
    // offsets recorded in the combined TOC.
    let combined = std::fs::read(&out).expect("read combined");
    let blob_a = std::fs::read(&path_a).expect("read a");
    let blob_b = std::fs::read(&path_b).expect("read b");
    let header = HeaderCodec::parse_prefix(&combined).expect("header");
    let toc_bytes =
        &combined[header.toc_start as usize..(header.toc_start + header.toc_len) as usize];
    let toc = TocNode::decode(&MsgpackCodec, toc_bytes).expect("toc");
    let TocChildren::Keyed(children) = toc.children.as_ref().expect("table") else {
        panic!("expected keyed combined TOC");
    };
    let combined_payload = payload_slice(&combined);
    for (blob, (name, node)) in [&blob_a, &blob_b].iter().zip(children) {
        let expected = payload_slice(blob);
        let actual = &combined_payload[node.start as usize..node.end as usize];
        assert_eq!(actual, expected, "payload for '{name}' was re-encoded");
    }
}

#[test]
fn positional_combine_preserves_input_order() {
    let dir = TempDir::new().expect("tempdir");
    let config = Config::default();
    let inputs: Vec<Value> = vec![
        Value::Int(42),
        Value::Seq(vec![Value::Str("mid".to_string())]),
        Value::Map(vec![("k".to_string(), Value::Nil)]),
    ];

    let refs: Vec<FileRef> = inputs
        .iter()
        .enumerate()
        .map(|(i, value)| {
            FileRef::new(pack_sample(
                dir.path(),
                &format!("in{i}.lzmg"),
                value,
                &config,
            ))
        })
        .collect();

    let out = dir.path().join("combined.lzmg");
    combine(&out, &refs).expect("combine");

    let reader = open_reader(&out).expect("open combined");
    for (index, expected) in inputs.iter().enumerate() {
        let got = reader
            .get_index(index)
            .expect("indexed read")
            .to_plain()
            .expect("plain");
        assert_eq!(&got, expected, "input {index}");
    }
    let whole = reader.read().expect("read").to_plain().expect("plain");
    assert_eq!(whole, Value::Seq(inputs));
}

#[test]
fn combined_grouped_tables_stay_lazy() {
    let dir = TempDir::new().expect("tempdir");
    let config = Config {
        small_obj_threshold: 64,
        trivial_size: 10,
        ..Config::default()
    };
    let left = Value::Seq((0..1000).map(Value::Int).collect());
    let right = Value::Seq((1000..2000).map(Value::Int).collect());
    let path_l = pack_sample(dir.path(), "l.lzmg", &left, &config);
    let path_r = pack_sample(dir.path(), "r.lzmg", &right, &config);

    let out = dir.path().join("combined.lzmg");
    combine_with(
        &out,
        &[
            FileRef::named(&path_l, "left"),
            FileRef::named(&path_r, "right"),
        ],
        &config,
    )
    .expect("combine");

    let reader = open_reader(&out).expect("open combined");
    let right_cursor = reader.get("right").expect("right");
    let seq = right_cursor.as_seq().expect("grouped cursor survives graft");
    assert_eq!(seq.len().expect("len"), 1000);
    assert_eq!(
        seq.get(500).expect("element").to_plain().expect("plain"),
        Value::Int(1500)
    );
    reader.close();
}

#[test]
fn mixed_naming_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let config = Config::default();
    let path_a = pack_sample(dir.path(), "a.lzmg", &Value::Int(1), &config);
    let path_b = pack_sample(dir.path(), "b.lzmg", &Value::Int(2), &config);

    let out = dir.path().join("combined.lzmg");
    let err = combine(
        &out,
        &[FileRef::named(&path_a, "A"), FileRef::new(&path_b)],
    )
    .expect_err("mixed naming");
    assert!(matches!(err, LazyError::CombineNameMix));
}

#[test]
fn duplicate_names_are_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let config = Config::default();
    let path_a = pack_sample(dir.path(), "a.lzmg", &Value::Int(1), &config);
    let path_b = pack_sample(dir.path(), "b.lzmg", &Value::Int(2), &config);

    let out = dir.path().join("combined.lzmg");
    let err = combine(
        &out,
        &[FileRef::named(&path_a, "A"), FileRef::named(&path_b, "A")],
    )
    .expect_err("duplicate names");
    assert!(matches!(err, LazyError::Encode { .. }));
}

#[test]
fn combine_validates_inputs() {
    let dir = TempDir::new().expect("tempdir");
    let bogus = dir.path().join("bogus.lzmg");
    std::fs::write(&bogus, b"junk").expect("write junk");

    let out = dir.path().join("combined.lzmg");
    let err = combine(&out, &[FileRef::new(&bogus)]).expect_err("bad input");
    assert!(matches!(err, LazyError::Format { .. }));
}

#[test]
fn combined_blob_can_be_combined_again() {
    let dir = TempDir::new().expect("tempdir");
    let config = Config::default();
    let a = Value::Map(vec![("x".to_string(), Value::Int(1))]);
    let path_a = pack_sample(dir.path(), "a.lzmg", &a, &config);

    let first = dir.path().join("first.lzmg");
    combine(&first, &[FileRef::named(&path_a, "A")]).expect("first combine");

    let second = dir.path().join("second.lzmg");
    combine(&second, &[FileRef::named(&first, "outer")]).expect("second combine");

    let reader = open_reader(&second).expect("open");
    assert_eq!(
        reader
            .read_path("outer/A/x")
            .expect("outer/A/x")
            .to_plain()
            .expect("plain"),
        Value::Int(1)
    );
}
