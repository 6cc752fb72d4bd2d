//! # Wire Transport
//!
//! One packet per line, hex-encoded, newline-terminated. The payload's
//! first byte is a flag:
//!
//! ```text
//! [0][bytes...]  result data (request: statement text; response: result)
//! [1][bytes...]  UTF-8 error message
//! ```
//!
//! Hex keeps the framing trivially line-safe regardless of payload bytes.
//! Traffic is strict ping-pong: one request line in, one response line out.

use std::io::{BufRead, BufReader, BufWriter, Read, Write};

use eyre::{bail, ensure, Result, WrapErr};

use crate::error::EngineError;

/// A decoded packet: either result data or an error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Package {
    Data(Vec<u8>),
    Err(String),
}

impl Package {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Package::Data(data) => {
                let mut out = Vec::with_capacity(1 + data.len());
                out.push(0);
                out.extend_from_slice(data);
                out
            }
            Package::Err(message) => {
                let mut out = Vec::with_capacity(1 + message.len());
                out.push(1);
                out.extend_from_slice(message.as_bytes());
                out
            }
        }
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        ensure!(!raw.is_empty(), EngineError::InvalidPacket);
        match raw[0] {
            0 => Ok(Package::Data(raw[1..].to_vec())),
            1 => Ok(Package::Err(
                String::from_utf8_lossy(&raw[1..]).into_owned(),
            )),
            _ => bail!(EngineError::InvalidPacket),
        }
    }
}

pub fn hex_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for &b in data {
        out.push(char::from_digit((b >> 4) as u32, 16).unwrap());
        out.push(char::from_digit((b & 0xF) as u32, 16).unwrap());
    }
    out
}

pub fn hex_decode(line: &str) -> Result<Vec<u8>> {
    let line = line.trim();
    ensure!(line.len() % 2 == 0, EngineError::InvalidPacket);
    let mut out = Vec::with_capacity(line.len() / 2);
    let bytes = line.as_bytes();
    for pair in bytes.chunks_exact(2) {
        let hi = (pair[0] as char)
            .to_digit(16)
            .ok_or(EngineError::InvalidPacket)?;
        let lo = (pair[1] as char)
            .to_digit(16)
            .ok_or(EngineError::InvalidPacket)?;
        out.push(((hi << 4) | lo) as u8);
    }
    Ok(out)
}

/// Line-framed packet stream over any read/write pair (in practice a
/// `TcpStream` cloned for each direction).
pub struct Transporter<R: Read, W: Write> {
    reader: BufReader<R>,
    writer: BufWriter<W>,
}

impl<R: Read, W: Write> Transporter<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
        }
    }

    pub fn send(&mut self, package: &Package) -> Result<()> {
        let line = hex_encode(&package.encode());
        self.writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush())
            .wrap_err("failed to send packet")
    }

    /// Receives the next packet; `None` when the peer closed the stream.
    pub fn receive(&mut self) -> Result<Option<Package>> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .wrap_err("failed to read packet line")?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(Package::decode(&hex_decode(&line)?)?))
    }
}
