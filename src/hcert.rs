//! This crate encodes and verifies health certificate tokens: a CBOR claims set signed into a
//! COSE_Sign1 envelope, compressed, Base45-encoded and prefixed with a context identifier such as
//! `HC1:`.
//!
//! Example usage: let `payload` hold the clinical JSON document, `signer` a loaded key, and
//! `certificate` the DER encoding of the signer's certificate.
//!
//!```rust,ignore
//! use hcert::{CertificateEncoder, CertificateValidator};
//!
//! let token = CertificateEncoder::default().encode(&payload, valid_from, valid_till, &signer)?;
//!
//! let result = CertificateValidator::default().validate(&token, now, Some(&certificate));
//! if !result.is_valid {
//!     println!("rejected: {:?}", result.error_message);
//! }
//!```
extern crate moz_cbor as cbor;

pub mod codec;
pub mod config;
pub mod crypto;
pub mod encoder;
pub mod envelope;
pub mod payload;
pub mod transcode;
mod util;
pub mod validator;

pub use config::{Compression, EncoderConfig, FailurePolicy, ValidatorConfig};
pub use crypto::{EcdsaP256Signer, RsaPssSigner, Signer, VerificationKey, Verifier};
pub use encoder::{CertificateEncoder, EncodedCertificate, PreparedCertificate, TestVector};
pub use envelope::{Envelope, EnvelopeBuilder, ParseError};
pub use payload::{Claims, Header, Names};
pub use validator::{CertificateValidator, ValidationResult};

/// Errors that can be returned while encoding or validating a certificate.
///
/// The `Display` text of every variant is stable; callers may match on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HcertError {
    #[error("Invalid QR code context prefix")]
    Prefix,
    #[error("Invalid transport encoding: {0}")]
    TransportDecode(String),
    #[error("Compression failed: {0}")]
    Compress(String),
    #[error("Decompression failed: {0}")]
    Decompress(String),
    #[error("Invalid Tag. Only single-signer structures are supported")]
    UnsupportedStructure,
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("Invalid protected header: {0}")]
    HeaderDecode(String),
    #[error("Cannot resolve verification key: {0}")]
    KeyResolution(String),
    #[error("Invalid Signature")]
    InvalidSignature,
    #[error("Invalid certificate payload: {0}")]
    PayloadDecode(String),
    #[error("Certificate has expired or not yet active.")]
    TemporalValidity,
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("Invalid clinical payload: {0}")]
    PayloadFormat(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// An enum identifying supported signature algorithms. Currently only ECDSA with P-256 and SHA256
/// (ES256) and RSASSA-PSS with SHA-256 (PS256) are supported. Note that with PS256, the salt
/// length is defined to be 32 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum SignatureAlgorithm {
    ES256 = -7,
    PS256 = -37,
}

impl SignatureAlgorithm {
    /// Look up an algorithm by its COSE identifier.
    pub fn from_id(id: i64) -> Option<SignatureAlgorithm> {
        match id {
            -7 => Some(SignatureAlgorithm::ES256),
            -37 => Some(SignatureAlgorithm::PS256),
            _ => None,
        }
    }

    /// The algorithm a signature is checked with. ES256 for -7; every other identifier falls
    /// through to PS256, so an unexpected `alg` surfaces as a signature failure.
    pub fn for_verification(id: i64) -> SignatureAlgorithm {
        if id == SignatureAlgorithm::ES256.id() {
            SignatureAlgorithm::ES256
        } else {
            SignatureAlgorithm::PS256
        }
    }

    pub fn id(self) -> i64 {
        self as i64
    }

    /// Byte length of one signature component for elliptic-curve algorithms.
    pub fn field_len(self) -> Option<usize> {
        match self {
            SignatureAlgorithm::ES256 => Some(32),
            SignatureAlgorithm::PS256 => None,
        }
    }
}

#[cfg(test)]
mod test_setup;
#[cfg(test)]
mod test_transcode;
#[cfg(test)]
mod test_codec;
#[cfg(test)]
mod test_envelope;
#[cfg(test)]
mod test_hcert;
