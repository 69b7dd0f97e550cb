//! Building and parsing the COSE_Sign1 envelope.

use std::collections::BTreeMap;
use std::sync::Arc;

use cbor::CborType;

use crate::codec::{CanonicalCbor, CborCodec};
use crate::payload::Header;
use crate::HcertError;

pub const COSE_SIGN1_TAG: u64 = 18;
pub const SIGNATURE1_CONTEXT: &str = "Signature1";

/// Errors produced by `EnvelopeBuilder::parse_envelope`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("not a COSE_Sign1 structure")]
    UnsupportedStructure,
    #[error("{0}")]
    Malformed(String),
}

impl From<ParseError> for HcertError {
    fn from(e: ParseError) -> HcertError {
        match e {
            ParseError::UnsupportedStructure => HcertError::UnsupportedStructure,
            ParseError::Malformed(reason) => HcertError::MalformedEnvelope(reason),
        }
    }
}

/// The four components of a COSE_Sign1 structure. Header contents are not interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub protected: Vec<u8>,
    pub unprotected: BTreeMap<CborType, CborType>,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Envelope {
    pub fn unprotected_header(&self) -> Result<Header, HcertError> {
        Header::from_map(&self.unprotected)
    }
}

/// Encodes the signing input and the tagged envelope, and parses untrusted envelopes.
#[derive(Clone)]
pub struct EnvelopeBuilder {
    codec: Arc<dyn CborCodec>,
}

impl Default for EnvelopeBuilder {
    fn default() -> EnvelopeBuilder {
        EnvelopeBuilder::new(Arc::new(CanonicalCbor))
    }
}

impl EnvelopeBuilder {
    pub fn new(codec: Arc<dyn CborCodec>) -> EnvelopeBuilder {
        EnvelopeBuilder { codec }
    }

    pub fn codec(&self) -> &dyn CborCodec {
        self.codec.as_ref()
    }

    // Sig_structure is a CBOR array:
    //
    // Sig_structure = [
    //   context : "Signature" / "Signature1" / "CounterSignature",
    //   body_protected : empty_or_serialized_map,
    //   ? sign_protected : empty_or_serialized_map,
    //   external_aad : bstr,
    //   payload : bstr
    // ]
    //
    // In this case, the context is "Signature1" and there is no sign_protected. There is no
    // external_aad, so this is a zero-length bstr.
    pub fn build_signing_input(&self, protected: &[u8], payload: &[u8]) -> Vec<u8> {
        let sig_structure = vec![
            CborType::String(String::from(SIGNATURE1_CONTEXT)),
            CborType::Bytes(protected.to_vec()),
            CborType::Bytes(Vec::new()),
            CborType::Bytes(payload.to_vec()),
        ];
        self.codec.encode(&CborType::Array(sig_structure))
    }

    // 18(
    //  [
    //    / protected / h'a10126' / {
    //        \ alg \ 1:-7 \ ECDSA with SHA-256 \
    //      } / ,
    //    / unprotected / {
    //        \ kid \ 4:h'..' \ first 8 bytes of the signer certificate's SHA-256 \
    //      },
    //    / payload / h'a4..' / CWT claims set /,
    //    / signature / h'..' / r || s /
    //  ]
    //)
    pub fn build_envelope(
        &self,
        protected: &[u8],
        unprotected: &Header,
        payload: &[u8],
        signature: &[u8],
    ) -> Vec<u8> {
        let cose_sign1 = vec![
            CborType::Bytes(protected.to_vec()),
            unprotected.to_cbor(),
            CborType::Bytes(payload.to_vec()),
            CborType::Bytes(signature.to_vec()),
        ];
        let tagged = CborType::Tag(COSE_SIGN1_TAG, Box::new(CborType::Array(cose_sign1)));
        self.codec.encode(&tagged)
    }

    /// COSE_Sign1 = [
    ///     protected : empty_or_serialized_map,
    ///     unprotected : header_map,
    ///     payload : bstr / nil,
    ///     signature : bstr
    /// ]
    ///
    /// The structure must be tagged with 18. This implementation requires an embedded payload.
    pub fn parse_envelope(&self, bytes: &[u8]) -> Result<Envelope, ParseError> {
        let tagged = self
            .codec
            .decode(bytes)
            .map_err(|e| ParseError::Malformed(e.to_string()))?;
        let values = match tagged {
            CborType::Tag(COSE_SIGN1_TAG, inner) => match *inner {
                CborType::Array(values) => values,
                _ => return Err(ParseError::Malformed("COSE_Sign1 is not an array".to_string())),
            },
            _ => return Err(ParseError::UnsupportedStructure),
        };
        if values.len() != 4 {
            return Err(ParseError::Malformed(format!(
                "expected 4 elements, found {}",
                values.len()
            )));
        }

        let mut values = values.into_iter();
        let protected = match values.next() {
            Some(CborType::Bytes(b)) => b,
            _ => return Err(malformed("protected header")),
        };
        let unprotected = match values.next() {
            Some(CborType::Map(m)) => m,
            _ => return Err(malformed("unprotected header")),
        };
        let payload = match values.next() {
            Some(CborType::Bytes(b)) => b,
            _ => return Err(malformed("payload")),
        };
        let signature = match values.next() {
            Some(CborType::Bytes(b)) => b,
            _ => return Err(malformed("signature")),
        };
        Ok(Envelope {
            protected,
            unprotected,
            payload,
            signature,
        })
    }
}

fn malformed(element: &str) -> ParseError {
    ParseError::Malformed(format!("{} has an unexpected type", element))
}
