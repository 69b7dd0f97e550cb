//! Turning a clinical JSON document into a signed, compressed and transport-encoded token.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::codec::{Base45, Compressor, Deflate, TransportCodec};
use crate::config::{EncoderConfig, DEFAULT_MAX_INFLATED_LEN};
use crate::crypto::Signer;
use crate::envelope::EnvelopeBuilder;
use crate::payload::{Claims, Header};
use crate::transcode::der_to_concat;
use crate::util::json_to_cbor;
use crate::{HcertError, SignatureAlgorithm};

/// Every intermediate artifact of one encoding run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCertificate {
    /// The clinical document as CBOR, before it is wrapped in the claims set.
    pub cbor: Vec<u8>,
    /// The encoded CWT claims set, which is the envelope payload.
    pub claims: Vec<u8>,
    /// The tagged COSE_Sign1 envelope.
    pub cose: Vec<u8>,
    pub compressed: Vec<u8>,
    pub base45: String,
    /// The final token, prefix included.
    pub token: String,
}

impl EncodedCertificate {
    /// Describe this encoding as a conformance test vector, expected to decode and verify at
    /// `validation_clock`.
    pub fn test_vector(&self, json: &str, validation_clock: DateTime<Utc>) -> TestVector {
        TestVector {
            json: json.to_string(),
            cbor: hex::encode(&self.cbor),
            cose: hex::encode(&self.cose),
            base45: self.base45.clone(),
            prefix: self.token.clone(),
            expected_decode: true,
            expected_verify: true,
            validation_clock,
        }
    }
}

/// A test vector in the layout shared by health certificate test suites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct TestVector {
    pub json: String,
    pub cbor: String,
    pub cose: String,
    pub base45: String,
    pub prefix: String,
    #[serde(rename = "EXPECTEDDECODE")]
    pub expected_decode: bool,
    #[serde(rename = "EXPECTEDVERIFY")]
    pub expected_verify: bool,
    #[serde(rename = "VALIDATIONCLOCK")]
    pub validation_clock: DateTime<Utc>,
}

/// A certificate waiting for a signature from an external signer.
///
/// `signing_input` is the exact byte sequence to sign. `digest` is its SHA-256, for signers that
/// take a pre-hashed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCertificate {
    pub algorithm_id: i64,
    pub kid: Vec<u8>,
    /// The clinical document as CBOR.
    pub body: Vec<u8>,
    pub protected: Vec<u8>,
    pub payload: Vec<u8>,
    pub signing_input: Vec<u8>,
    pub digest: Vec<u8>,
}

/// Encodes health certificates. Holds no per-call state; one encoder can serve any number of
/// threads.
#[derive(Clone)]
pub struct CertificateEncoder {
    config: EncoderConfig,
    envelope: EnvelopeBuilder,
    compressor: Arc<dyn Compressor>,
    transport: Arc<dyn TransportCodec>,
}

impl Default for CertificateEncoder {
    fn default() -> CertificateEncoder {
        CertificateEncoder::with_collaborators(
            EncoderConfig::default(),
            EnvelopeBuilder::default(),
            Arc::new(Deflate::default()),
            Arc::new(Base45),
        )
    }
}

impl CertificateEncoder {
    /// An encoder using the stock collaborators.
    pub fn new(config: EncoderConfig) -> Result<CertificateEncoder, HcertError> {
        config.validate()?;
        let compressor = Deflate::new(config.compression, DEFAULT_MAX_INFLATED_LEN);
        Ok(CertificateEncoder::with_collaborators(
            config,
            EnvelopeBuilder::default(),
            Arc::new(compressor),
            Arc::new(Base45),
        ))
    }

    pub fn with_collaborators(
        config: EncoderConfig,
        envelope: EnvelopeBuilder,
        compressor: Arc<dyn Compressor>,
        transport: Arc<dyn TransportCodec>,
    ) -> CertificateEncoder {
        CertificateEncoder {
            config,
            envelope,
            compressor,
            transport,
        }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Encode `json` into a token valid from `valid_from` until `valid_till`, signed by `signer`.
    pub fn encode(
        &self,
        json: &str,
        valid_from: DateTime<Utc>,
        valid_till: DateTime<Utc>,
        signer: &dyn Signer,
    ) -> Result<String, HcertError> {
        self.encode_detailed(json, valid_from, valid_till, signer)
            .map(|encoded| encoded.token)
    }

    /// Like `encode`, but returns every intermediate artifact.
    pub fn encode_detailed(
        &self,
        json: &str,
        valid_from: DateTime<Utc>,
        valid_till: DateTime<Utc>,
        signer: &dyn Signer,
    ) -> Result<EncodedCertificate, HcertError> {
        let prepared = self.prepare(
            json,
            valid_from,
            valid_till,
            signer.algorithm_id(),
            signer.key_identifier(),
        )?;
        let signature = signer.sign(&prepared.signing_input)?;
        self.assemble(prepared, &signature)
    }

    /// Build everything up to the signing input, for signing outside this process.
    pub fn prepare(
        &self,
        json: &str,
        valid_from: DateTime<Utc>,
        valid_till: DateTime<Utc>,
        algorithm_id: i64,
        kid: Vec<u8>,
    ) -> Result<PreparedCertificate, HcertError> {
        let document: serde_json::Value =
            serde_json::from_str(json).map_err(|e| HcertError::PayloadFormat(e.to_string()))?;
        let certificate = json_to_cbor(&document)?;
        let body = self.envelope.codec().encode(&certificate);
        let claims = Claims {
            issuer: self.config.issuer.clone(),
            issued_at: valid_from.timestamp(),
            expires_at: valid_till.timestamp(),
            certificate,
        };
        let payload = self.envelope.codec().encode(&claims.to_cbor());
        let protected = self
            .envelope
            .codec()
            .encode(&Header::protected(algorithm_id).to_cbor());
        let signing_input = self.envelope.build_signing_input(&protected, &payload);
        let digest = Sha256::digest(&signing_input).to_vec();
        debug!(
            algorithm_id,
            kid = %hex::encode(&kid),
            payload_len = payload.len(),
            "prepared certificate for signing"
        );
        Ok(PreparedCertificate {
            algorithm_id,
            kid,
            body,
            protected,
            payload,
            signing_input,
            digest,
        })
    }

    /// Complete a prepared certificate with a signature in the algorithm's native format.
    pub fn finish(
        &self,
        prepared: PreparedCertificate,
        signature: &[u8],
    ) -> Result<String, HcertError> {
        self.assemble(prepared, signature).map(|encoded| encoded.token)
    }

    fn assemble(
        &self,
        prepared: PreparedCertificate,
        signature: &[u8],
    ) -> Result<EncodedCertificate, HcertError> {
        // COSE wants r || s for ECDSA; the signer hands out DER.
        let signature = match SignatureAlgorithm::from_id(prepared.algorithm_id)
            .and_then(SignatureAlgorithm::field_len)
        {
            Some(field_len) => der_to_concat(signature, field_len)
                .map_err(|e| HcertError::Signing(e.to_string()))?,
            None => signature.to_vec(),
        };
        let unprotected = Header::unprotected(prepared.kid);
        let cose = self.envelope.build_envelope(
            &prepared.protected,
            &unprotected,
            &prepared.payload,
            &signature,
        );
        let compressed = self.compressor.deflate(&cose)?;
        let base45 = self.transport.encode(&compressed);
        let token = format!("{}:{}", self.config.version_prefix, base45);
        debug!(
            cose_len = cose.len(),
            compressed_len = compressed.len(),
            token_len = token.len(),
            "encoded certificate"
        );
        Ok(EncodedCertificate {
            cbor: prepared.body,
            claims: prepared.payload,
            cose,
            compressed,
            base45,
            token,
        })
    }
}
