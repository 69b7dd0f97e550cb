//! Conversion between the two encodings of an ECDSA signature.
//!
//! COSE carries ECDSA signatures as the fixed-length concatenation `r || s`, each component
//! left-padded to the byte length of the curve's field. Generic signature primitives produce and
//! consume the ASN.1 DER form instead:
//!
//! ```text
//! Ecdsa-Sig-Value ::= SEQUENCE {
//!     r INTEGER,
//!     s INTEGER
//! }
//! ```
//!
//! DER INTEGERs are minimal and signed, so a component loses its leading zero bytes and gains a
//! single `0x00` when its most significant bit is set.

const DER_SEQUENCE: u8 = 0x30;
const DER_INTEGER: u8 = 0x02;

/// Errors produced while converting signature encodings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscodeError {
    #[error("concatenated signature has {actual} bytes, expected {expected}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("signature does not start with a DER SEQUENCE")]
    MissingSequence,
    #[error("expected a DER INTEGER at offset {0}")]
    MissingInteger(usize),
    #[error("DER signature is truncated")]
    Truncated,
    #[error("unsupported DER length encoding")]
    UnsupportedLength,
    #[error("DER INTEGERs do not end with the SEQUENCE")]
    LengthMismatch,
}

/// Convert a concatenated `r || s` signature with `field_len`-byte components into DER.
pub fn concat_to_der(concat: &[u8], field_len: usize) -> Result<Vec<u8>, TranscodeError> {
    if field_len == 0 || concat.len() != 2 * field_len {
        return Err(TranscodeError::InvalidLength {
            expected: 2 * field_len,
            actual: concat.len(),
        });
    }
    let (r, s) = concat.split_at(field_len);
    let mut content = der_integer(r);
    content.extend_from_slice(&der_integer(s));

    let mut der = Vec::with_capacity(content.len() + 3);
    der.push(DER_SEQUENCE);
    push_length(&mut der, content.len());
    der.extend_from_slice(&content);
    Ok(der)
}

/// Convert a DER `SEQUENCE { INTEGER r, INTEGER s }` into the concatenated `r || s` form with
/// `field_len`-byte components. The input must hold exactly one SEQUENCE and nothing after it.
pub fn der_to_concat(der: &[u8], field_len: usize) -> Result<Vec<u8>, TranscodeError> {
    if field_len == 0 {
        return Err(TranscodeError::InvalidLength {
            expected: 0,
            actual: der.len(),
        });
    }
    if der.first() != Some(&DER_SEQUENCE) {
        return Err(TranscodeError::MissingSequence);
    }
    let (content_len, mut offset) = read_length(der, 1)?;
    let sequence_end = offset + content_len;
    if der.len() < sequence_end {
        return Err(TranscodeError::Truncated);
    }
    if der.len() > sequence_end {
        return Err(TranscodeError::LengthMismatch);
    }

    let mut concat = vec![0u8; 2 * field_len];
    for component in concat.chunks_mut(field_len) {
        if der.get(offset) != Some(&DER_INTEGER) {
            return Err(TranscodeError::MissingInteger(offset));
        }
        let (len, value_start) = read_length(der, offset + 1)?;
        if value_start + len > sequence_end {
            return Err(TranscodeError::LengthMismatch);
        }
        let value = &der[value_start..value_start + len];
        // Too long: drop the sign padding. Too short: left-pad with zeros.
        if len > field_len {
            component.copy_from_slice(&value[len - field_len..]);
        } else {
            component[field_len - len..].copy_from_slice(value);
        }
        offset = value_start + len;
    }
    if offset != sequence_end {
        return Err(TranscodeError::LengthMismatch);
    }
    Ok(concat)
}

fn der_integer(field: &[u8]) -> Vec<u8> {
    let first_non_zero = field.iter().position(|b| *b != 0);
    let value = match first_non_zero {
        Some(offset) => &field[offset..],
        None => return vec![DER_INTEGER, 0x01, 0x00],
    };
    let pad = value[0] & 0x80 != 0;
    let len = value.len() + usize::from(pad);

    let mut out = Vec::with_capacity(len + 3);
    out.push(DER_INTEGER);
    push_length(&mut out, len);
    if pad {
        out.push(0x00);
    }
    out.extend_from_slice(value);
    out
}

fn push_length(output: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        output.push(len as u8);
    } else if len <= 0xff {
        output.push(0x81);
        output.push(len as u8);
    } else {
        output.push(0x82);
        output.push((len >> 8) as u8);
        output.push((len & 0xff) as u8);
    }
}

/// Read a DER length starting at `offset`. Returns the length and the offset of the first
/// content byte.
fn read_length(der: &[u8], offset: usize) -> Result<(usize, usize), TranscodeError> {
    let first = *der.get(offset).ok_or(TranscodeError::Truncated)?;
    if first & 0x80 == 0 {
        return Ok((first as usize, offset + 1));
    }
    let num_bytes = (first & 0x7f) as usize;
    if num_bytes == 0 || num_bytes > 2 {
        return Err(TranscodeError::UnsupportedLength);
    }
    let bytes = der
        .get(offset + 1..offset + 1 + num_bytes)
        .ok_or(TranscodeError::Truncated)?;
    let len = bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Ok((len, offset + 1 + num_bytes))
}
