//! # On-Disk Scalar and Key Encoding
//!
//! Every multi-byte integer the engine persists is big-endian. Strings are
//! length-prefixed: `[len: u32][utf-8 bytes]`. This module is the single
//! place those encodings live; the row codec, the catalog codec and the log
//! record codec all go through it.
//!
//! ## Index key mapping
//!
//! B+ tree keys are unsigned 64-bit. Signed column values map into that key
//! space order-preservingly by flipping the sign bit, so that
//! `-2 < -1 < 0 < 1` also holds for the unsigned key comparisons the tree
//! performs. Strings map through a rolling hash (`h = h * 13331 + b`); the
//! hash is not collision-free, so equality probes re-verify the decoded
//! field value afterwards.

use byteorder::{BigEndian, ByteOrder};
use eyre::{ensure, Result};

use crate::config::HASH_SEED;
use crate::error::EngineError;

pub fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn read_u16(buf: &[u8]) -> u16 {
    BigEndian::read_u16(buf)
}

pub fn read_u32(buf: &[u8]) -> u32 {
    BigEndian::read_u32(buf)
}

pub fn read_u64(buf: &[u8]) -> u64 {
    BigEndian::read_u64(buf)
}

pub fn write_u16(buf: &mut [u8], v: u16) {
    BigEndian::write_u16(buf, v);
}

pub fn write_u64(buf: &mut [u8], v: u64) {
    BigEndian::write_u64(buf, v);
}

/// Appends `[len: u32][bytes]`.
pub fn put_string(out: &mut Vec<u8>, s: &str) {
    put_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

/// Decodes a length-prefixed string; returns the string and the number of
/// bytes consumed.
pub fn read_string(buf: &[u8]) -> Result<(String, usize)> {
    ensure!(buf.len() >= 4, EngineError::InvalidValues);
    let len = read_u32(buf) as usize;
    ensure!(buf.len() >= 4 + len, EngineError::InvalidValues);
    let s = std::str::from_utf8(&buf[4..4 + len])
        .map_err(|_| EngineError::InvalidValues)?
        .to_owned();
    Ok((s, 4 + len))
}

/// Rolling hash used for both log checksums and string index keys.
pub fn rolling_checksum(mut acc: u32, data: &[u8]) -> u32 {
    for &b in data {
        acc = acc.wrapping_mul(HASH_SEED).wrapping_add(b as u32);
    }
    acc
}

/// Maps a string to its 64-bit index key.
pub fn string_key(s: &str) -> u64 {
    let mut acc = 0u64;
    for &b in s.as_bytes() {
        acc = acc.wrapping_mul(HASH_SEED as u64).wrapping_add(b as u64);
    }
    acc
}

/// Maps a signed integer to the unsigned key space, preserving order.
pub fn int_key(v: i64) -> u64 {
    (v as u64) ^ (1 << 63)
}
