//! Collaborator interfaces for the byte-level codecs of a token, with default implementations.
//!
//! The encoder and validator only ever talk to these traits, so any of them can be replaced (e.g.
//! by a test double, or a hardware-accelerated compressor).

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use cbor::CborType;
use ciborium::value::Value;
use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, ZlibEncoder};

use crate::config::Compression;
use crate::HcertError;

/// Failure to parse a CBOR data item.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("CBOR decoding failed: {0}")]
pub struct CborDecodeError(pub String);

/// Serializes and parses CBOR data items.
pub trait CborCodec: Send + Sync {
    fn encode(&self, value: &CborType) -> Vec<u8>;
    fn decode(&self, bytes: &[u8]) -> Result<CborType, CborDecodeError>;
}

/// Compresses the encoded envelope.
pub trait Compressor: Send + Sync {
    fn deflate(&self, bytes: &[u8]) -> Result<Vec<u8>, HcertError>;
    fn inflate(&self, bytes: &[u8]) -> Result<Vec<u8>, HcertError>;
}

/// Maps compressed bytes to barcode-safe text and back. Must round-trip byte-exactly.
pub trait TransportCodec: Send + Sync {
    fn encode(&self, bytes: &[u8]) -> String;
    fn decode(&self, text: &str) -> Result<Vec<u8>, HcertError>;
}

/// Canonical CBOR. Serialization goes through `moz_cbor`, which writes maps in canonical key
/// order. Parsing goes through `ciborium`, which also reads text strings.
///
/// Decoding accepts exactly one data item built from integers, byte and text strings, arrays,
/// maps, tags and null. Floats, booleans, duplicate map keys and trailing bytes are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalCbor;

impl CborCodec for CanonicalCbor {
    fn encode(&self, value: &CborType) -> Vec<u8> {
        value.serialize()
    }

    fn decode(&self, bytes: &[u8]) -> Result<CborType, CborDecodeError> {
        let mut reader = Cursor::new(bytes);
        let value: Value = ciborium::de::from_reader(&mut reader)
            .map_err(|e| CborDecodeError(e.to_string()))?;
        if reader.position() != bytes.len() as u64 {
            return Err(CborDecodeError(format!(
                "{} trailing bytes",
                bytes.len() as u64 - reader.position()
            )));
        }
        from_value(value)
    }
}

fn from_value(value: Value) -> Result<CborType, CborDecodeError> {
    Ok(match value {
        Value::Integer(i) => {
            let i = i128::from(i);
            if i >= 0 {
                CborType::Integer(i as u64)
            } else {
                let i = i64::try_from(i)
                    .map_err(|_| CborDecodeError(format!("integer {} out of range", i)))?;
                CborType::SignedInteger(i)
            }
        }
        Value::Bytes(b) => CborType::Bytes(b),
        Value::Text(t) => CborType::String(t),
        Value::Array(items) => CborType::Array(
            items
                .into_iter()
                .map(from_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Map(entries) => {
            let mut map = BTreeMap::new();
            for (key, value) in entries {
                if map.insert(from_value(key)?, from_value(value)?).is_some() {
                    return Err(CborDecodeError("duplicate map key".to_string()));
                }
            }
            CborType::Map(map)
        }
        Value::Tag(tag, inner) => CborType::Tag(tag, Box::new(from_value(*inner)?)),
        Value::Null => CborType::Null,
        other => {
            return Err(CborDecodeError(format!(
                "unsupported data item {:?}",
                other
            )))
        }
    })
}

/// DEFLATE through `flate2`, either raw or wrapped in a zlib header and checksum.
#[derive(Debug, Clone, Copy)]
pub struct Deflate {
    framing: Compression,
    max_inflated_len: usize,
}

impl Deflate {
    pub fn new(framing: Compression, max_inflated_len: usize) -> Deflate {
        Deflate {
            framing,
            max_inflated_len,
        }
    }
}

impl Default for Deflate {
    fn default() -> Deflate {
        Deflate::new(Compression::default(), crate::config::DEFAULT_MAX_INFLATED_LEN)
    }
}

impl Compressor for Deflate {
    fn deflate(&self, bytes: &[u8]) -> Result<Vec<u8>, HcertError> {
        let level = flate2::Compression::best();
        let compressed = match self.framing {
            Compression::Raw => {
                let mut encoder = DeflateEncoder::new(Vec::new(), level);
                encoder.write_all(bytes).and_then(|_| encoder.finish())
            }
            Compression::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), level);
                encoder.write_all(bytes).and_then(|_| encoder.finish())
            }
        };
        compressed.map_err(|e| HcertError::Compress(e.to_string()))
    }

    fn inflate(&self, bytes: &[u8]) -> Result<Vec<u8>, HcertError> {
        // Read one byte past the limit so an oversized stream is detected rather than truncated.
        let limit = self.max_inflated_len as u64 + 1;
        let mut inflated = Vec::new();
        let read = match self.framing {
            Compression::Raw => DeflateDecoder::new(bytes).take(limit).read_to_end(&mut inflated),
            Compression::Zlib => ZlibDecoder::new(bytes).take(limit).read_to_end(&mut inflated),
        };
        read.map_err(|e| HcertError::Decompress(e.to_string()))?;
        if inflated.len() > self.max_inflated_len {
            return Err(HcertError::Decompress(format!(
                "inflated data exceeds {} bytes",
                self.max_inflated_len
            )));
        }
        Ok(inflated)
    }
}

/// The RFC 9285 Base45 transport encoding, through the `base45` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base45;

impl TransportCodec for Base45 {
    fn encode(&self, bytes: &[u8]) -> String {
        base45::encode(bytes)
    }

    fn decode(&self, text: &str) -> Result<Vec<u8>, HcertError> {
        base45::decode(text).map_err(|e| HcertError::TransportDecode(format!("{:?}", e)))
    }
}
