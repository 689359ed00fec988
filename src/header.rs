//! Fixed-size header region at the front of every blob.
//!
//! Layout, part of the format contract: 4 magic bytes (`b"LZMG"`), then a
//! 20-byte header holding `toc_start` (u64, little-endian, absolute file
//! offset) and `toc_len` (u64, little-endian), followed by 4 reserved zero
//! bytes. The payload region begins immediately after, at offset 24.

use std::convert::TryInto;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::constants::{HEADER_SIZE, MAGIC, PAYLOAD_ORIGIN};
use crate::error::{LazyError, Result};

const TOC_START_POS: usize = 0;
const TOC_LEN_POS: usize = 8;

/// Decoded header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    /// Absolute file offset of the encoded TOC.
    pub toc_start: u64,
    /// Byte length of the encoded TOC.
    pub toc_len: u64,
}

impl BlobHeader {
    /// Length of the payload region described by this header.
    #[must_use]
    pub fn payload_len(&self) -> u64 {
        self.toc_start - PAYLOAD_ORIGIN
    }
}

/// Deterministic encoder/decoder for the magic and header region.
pub struct HeaderCodec;

impl HeaderCodec {
    /// Encodes the header into its canonical 20-byte representation.
    #[must_use]
    pub fn encode(header: &BlobHeader) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[TOC_START_POS..TOC_START_POS + 8].copy_from_slice(&header.toc_start.to_le_bytes());
        buf[TOC_LEN_POS..TOC_LEN_POS + 8].copy_from_slice(&header.toc_len.to_le_bytes());
        buf
    }

    /// Decodes and validates the 20 header bytes that follow the magic.
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<BlobHeader> {
        let toc_start = u64::from_le_bytes(extract_array(bytes, TOC_START_POS)?);
        let toc_len = u64::from_le_bytes(extract_array(bytes, TOC_LEN_POS)?);
        if toc_start < PAYLOAD_ORIGIN {
            return Err(LazyError::format("toc_start precedes payload region"));
        }
        Ok(BlobHeader { toc_start, toc_len })
    }

    /// Seeks past the magic and patches the header in place.
    pub fn write<W: Write + Seek>(writer: &mut W, header: &BlobHeader) -> Result<()> {
        writer.seek(SeekFrom::Start(MAGIC.len() as u64))?;
        writer.write_all(&Self::encode(header))?;
        Ok(())
    }

    /// Reads magic plus header from the start of a blob, validating the magic.
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<BlobHeader> {
        reader.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; MAGIC.len()];
        reader
            .read_exact(&mut magic)
            .map_err(|_| LazyError::format("file too short for magic"))?;
        if magic != MAGIC {
            return Err(LazyError::format("magic mismatch"));
        }
        let mut buf = [0u8; HEADER_SIZE];
        reader
            .read_exact(&mut buf)
            .map_err(|_| LazyError::format("file too short for header"))?;
        Self::decode(&buf)
    }

    /// Parses magic plus header from an in-memory prefix.
    pub fn parse_prefix(bytes: &[u8]) -> Result<BlobHeader> {
        if bytes.len() < MAGIC.len() + HEADER_SIZE {
            return Err(LazyError::format("file too short for header"));
        }
        if bytes[..MAGIC.len()] != MAGIC {
            return Err(LazyError::format("magic mismatch"));
        }
        let header: [u8; HEADER_SIZE] = bytes[MAGIC.len()..MAGIC.len() + HEADER_SIZE]
            .try_into()
            .map_err(|_| LazyError::format("file too short for header"))?;
        Self::decode(&header)
    }
}

fn extract_array<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N]> {
    bytes
        .get(offset..offset + N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| LazyError::format("header truncated"))
}
