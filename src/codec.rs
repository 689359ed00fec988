//! MessagePack codec used for payload values and the encoded TOC.
//!
//! The codec is a capability interface: a session carries one [`Codec`]
//! implementation and uses it for every decode it performs. The default
//! back-end works at the `rmp` marker level so the packer can interleave
//! container headers with child encoding while capturing byte offsets.

use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use crate::error::{LazyError, Result};
use crate::value::Value;

/// Encode/decode capability shared by a session.
///
/// Implementations must preserve byte-for-byte round-trips for every
/// supported [`Value`].
pub trait Codec: Send + Sync {
    /// Stream-encodes a value into `sink`.
    fn encode(&self, value: &Value, sink: &mut dyn Write) -> Result<()>;

    /// Decodes a complete byte range, rejecting trailing bytes.
    fn decode(&self, bytes: &[u8]) -> Result<Value>;

    /// Decodes the first value in `bytes` and reports the consumed length.
    ///
    /// Used for boundary discovery when walking concatenated encodings.
    fn decode_skipping(&self, bytes: &[u8]) -> Result<(Value, usize)>;

    /// Writes a sequence header announcing `len` elements.
    fn write_seq_header(&self, len: usize, sink: &mut dyn Write) -> Result<()>;

    /// Writes a map header announcing `len` pairs.
    fn write_map_header(&self, len: usize, sink: &mut dyn Write) -> Result<()>;

    /// Encodes a map key.
    fn write_key(&self, key: &str, sink: &mut dyn Write) -> Result<()>;
}

/// Returns the codec sessions use unless told otherwise.
#[must_use]
pub fn default_codec() -> Arc<dyn Codec> {
    Arc::new(MsgpackCodec)
}

/// The standard `rmp`-backed MessagePack codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgpackCodec;

impl Codec for MsgpackCodec {
    fn encode(&self, value: &Value, mut sink: &mut dyn Write) -> Result<()> {
        encode_into(value, &mut sink)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let (value, consumed) = self.decode_skipping(bytes)?;
        if consumed != bytes.len() {
            return Err(LazyError::decode("unexpected trailing bytes"));
        }
        Ok(value)
    }

    fn decode_skipping(&self, bytes: &[u8]) -> Result<(Value, usize)> {
        let mut cursor = Cursor::new(bytes);
        let value = decode_value(&mut cursor)?;
        Ok((value, cursor.position() as usize))
    }

    fn write_seq_header(&self, len: usize, mut sink: &mut dyn Write) -> Result<()> {
        let len = u32::try_from(len).map_err(|_| LazyError::encode("sequence too long"))?;
        rmp::encode::write_array_len(&mut sink, len).map_err(enc_err)?;
        Ok(())
    }

    fn write_map_header(&self, len: usize, mut sink: &mut dyn Write) -> Result<()> {
        let len = u32::try_from(len).map_err(|_| LazyError::encode("map too long"))?;
        rmp::encode::write_map_len(&mut sink, len).map_err(enc_err)?;
        Ok(())
    }

    fn write_key(&self, key: &str, mut sink: &mut dyn Write) -> Result<()> {
        rmp::encode::write_str(&mut sink, key).map_err(enc_err)?;
        Ok(())
    }
}

fn enc_err<E: std::fmt::Display>(err: E) -> LazyError {
    LazyError::encode(err.to_string())
}

fn encode_into<W: Write>(value: &Value, wr: &mut W) -> Result<()> {
    match value {
        Value::Nil => {
            rmp::encode::write_nil(wr).map_err(enc_err)?;
        }
        Value::Bool(v) => {
            rmp::encode::write_bool(wr, *v).map_err(enc_err)?;
        }
        Value::Int(v) => {
            rmp::encode::write_sint(wr, *v).map_err(enc_err)?;
        }
        Value::UInt(v) => {
            rmp::encode::write_uint(wr, *v).map_err(enc_err)?;
        }
        Value::F64(v) => {
            rmp::encode::write_f64(wr, *v).map_err(enc_err)?;
        }
        Value::Str(v) => {
            rmp::encode::write_str(wr, v).map_err(enc_err)?;
        }
        Value::Bin(v) => {
            let len = u32::try_from(v.len()).map_err(|_| LazyError::encode("byte string too long"))?;
            rmp::encode::write_bin_len(wr, len).map_err(enc_err)?;
            wr.write_all(v).map_err(enc_err)?;
        }
        Value::Seq(items) => {
            let len =
                u32::try_from(items.len()).map_err(|_| LazyError::encode("sequence too long"))?;
            rmp::encode::write_array_len(wr, len).map_err(enc_err)?;
            for item in items {
                encode_into(item, wr)?;
            }
        }
        Value::Map(pairs) => {
            let len = u32::try_from(pairs.len()).map_err(|_| LazyError::encode("map too long"))?;
            rmp::encode::write_map_len(wr, len).map_err(enc_err)?;
            for (key, item) in pairs {
                rmp::encode::write_str(wr, key).map_err(enc_err)?;
                encode_into(item, wr)?;
            }
        }
        Value::Ext(ty, data) => {
            let len = u32::try_from(data.len()).map_err(|_| LazyError::encode("ext too long"))?;
            rmp::encode::write_ext_meta(wr, len, *ty).map_err(enc_err)?;
            wr.write_all(data).map_err(enc_err)?;
        }
    }
    Ok(())
}

fn decode_value(rd: &mut Cursor<&[u8]>) -> Result<Value> {
    use rmp::Marker;

    let marker = rmp::decode::read_marker(rd)
        .map_err(|e| LazyError::decode(format!("bad marker: {e:?}")))?;
    let value = match marker {
        Marker::Null => Value::Nil,
        Marker::True => Value::Bool(true),
        Marker::False => Value::Bool(false),
        Marker::FixPos(n) => Value::Int(n.into()),
        Marker::FixNeg(n) => Value::Int(n.into()),
        Marker::U8 => Value::Int(i64::from(read_be::<1>(rd)?[0])),
        Marker::U16 => Value::Int(u16::from_be_bytes(read_be::<2>(rd)?).into()),
        Marker::U32 => Value::Int(u32::from_be_bytes(read_be::<4>(rd)?).into()),
        Marker::U64 => {
            let raw = u64::from_be_bytes(read_be::<8>(rd)?);
            match i64::try_from(raw) {
                Ok(v) => Value::Int(v),
                Err(_) => Value::UInt(raw),
            }
        }
        Marker::I8 => Value::Int((read_be::<1>(rd)?[0] as i8).into()),
        Marker::I16 => Value::Int(i16::from_be_bytes(read_be::<2>(rd)?).into()),
        Marker::I32 => Value::Int(i32::from_be_bytes(read_be::<4>(rd)?).into()),
        Marker::I64 => Value::Int(i64::from_be_bytes(read_be::<8>(rd)?)),
        Marker::F32 => Value::F64(f32::from_be_bytes(read_be::<4>(rd)?).into()),
        Marker::F64 => Value::F64(f64::from_be_bytes(read_be::<8>(rd)?)),
        Marker::FixStr(len) => decode_str(rd, len as usize)?,
        Marker::Str8 => {
            let len = read_be::<1>(rd)?[0] as usize;
            decode_str(rd, len)?
        }
        Marker::Str16 => {
            let len = u16::from_be_bytes(read_be::<2>(rd)?) as usize;
            decode_str(rd, len)?
        }
        Marker::Str32 => {
            let len = u32::from_be_bytes(read_be::<4>(rd)?) as usize;
            decode_str(rd, len)?
        }
        Marker::Bin8 => {
            let len = read_be::<1>(rd)?[0] as usize;
            Value::Bin(read_bytes(rd, len)?)
        }
        Marker::Bin16 => {
            let len = u16::from_be_bytes(read_be::<2>(rd)?) as usize;
            Value::Bin(read_bytes(rd, len)?)
        }
        Marker::Bin32 => {
            let len = u32::from_be_bytes(read_be::<4>(rd)?) as usize;
            Value::Bin(read_bytes(rd, len)?)
        }
        Marker::FixArray(len) => decode_seq(rd, len as usize)?,
        Marker::Array16 => {
            let len = u16::from_be_bytes(read_be::<2>(rd)?) as usize;
            decode_seq(rd, len)?
        }
        Marker::Array32 => {
            let len = u32::from_be_bytes(read_be::<4>(rd)?) as usize;
            decode_seq(rd, len)?
        }
        Marker::FixMap(len) => decode_map(rd, len as usize)?,
        Marker::Map16 => {
            let len = u16::from_be_bytes(read_be::<2>(rd)?) as usize;
            decode_map(rd, len)?
        }
        Marker::Map32 => {
            let len = u32::from_be_bytes(read_be::<4>(rd)?) as usize;
            decode_map(rd, len)?
        }
        Marker::FixExt1 => decode_ext(rd, 1)?,
        Marker::FixExt2 => decode_ext(rd, 2)?,
        Marker::FixExt4 => decode_ext(rd, 4)?,
        Marker::FixExt8 => decode_ext(rd, 8)?,
        Marker::FixExt16 => decode_ext(rd, 16)?,
        Marker::Ext8 => {
            let len = read_be::<1>(rd)?[0] as usize;
            decode_ext(rd, len)?
        }
        Marker::Ext16 => {
            let len = u16::from_be_bytes(read_be::<2>(rd)?) as usize;
            decode_ext(rd, len)?
        }
        Marker::Ext32 => {
            let len = u32::from_be_bytes(read_be::<4>(rd)?) as usize;
            decode_ext(rd, len)?
        }
        Marker::Reserved => {
            return Err(LazyError::decode("reserved marker encountered"));
        }
    };
    Ok(value)
}

fn read_be<const N: usize>(rd: &mut Cursor<&[u8]>) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    rd.read_exact(&mut buf)
        .map_err(|_| LazyError::decode("truncated value"))?;
    Ok(buf)
}

fn read_bytes(rd: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    rd.read_exact(&mut buf)
        .map_err(|_| LazyError::decode("truncated value"))?;
    Ok(buf)
}

fn decode_str(rd: &mut Cursor<&[u8]>, len: usize) -> Result<Value> {
    let bytes = read_bytes(rd, len)?;
    let s = String::from_utf8(bytes).map_err(|_| LazyError::decode("invalid utf-8 in string"))?;
    Ok(Value::Str(s))
}

fn decode_seq(rd: &mut Cursor<&[u8]>, len: usize) -> Result<Value> {
    let mut items = Vec::with_capacity(len.min(4096));
    for _ in 0..len {
        items.push(decode_value(rd)?);
    }
    Ok(Value::Seq(items))
}

fn decode_map(rd: &mut Cursor<&[u8]>, len: usize) -> Result<Value> {
    let mut pairs = Vec::with_capacity(len.min(4096));
    for _ in 0..len {
        let key = match decode_value(rd)? {
            Value::Str(s) => s,
            other => {
                return Err(LazyError::decode(format!(
                    "non-string map key of type {}",
                    other.type_name()
                )));
            }
        };
        pairs.push((key, decode_value(rd)?));
    }
    Ok(Value::Map(pairs))
}

fn decode_ext(rd: &mut Cursor<&[u8]>, len: usize) -> Result<Value> {
    let ty = read_be::<1>(rd)?[0] as i8;
    Ok(Value::Ext(ty, read_bytes(rd, len)?))
}

/// Encodes a value to a fresh buffer. Convenience for TOC encoding and tests.
pub fn encode_to_vec(codec: &dyn Codec, value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    codec.encode(value, &mut buf)?;
    Ok(buf)
}
