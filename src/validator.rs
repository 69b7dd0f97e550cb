//! Verification of untrusted tokens.
//!
//! `CertificateValidator::validate` runs a fixed pipeline: prefix check, transport decoding,
//! decompression, envelope parsing, protected header decoding, key resolution, signature
//! verification, payload decoding and the validity window check. Every failure ends up in the
//! returned `ValidationResult`; nothing is propagated to the caller.

use std::sync::Arc;

use cbor::CborType;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::{Base45, Compressor, Deflate, TransportCodec};
use crate::config::{FailurePolicy, ValidatorConfig};
use crate::crypto::{DefaultVerifier, VerificationKey, Verifier};
use crate::envelope::{Envelope, EnvelopeBuilder};
use crate::payload::{Claims, Header, Names};
use crate::transcode::concat_to_der;
use crate::util::cbor_to_json;
use crate::{HcertError, SignatureAlgorithm};

/// The outcome of one validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// True only if every step that ran succeeded.
    pub is_valid: bool,
    /// Message of the first failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Every failure, in the order the steps ran.
    #[serde(skip)]
    pub errors: Vec<HcertError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub names: Option<Names>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
}

impl ValidationResult {
    fn failure(error: HcertError) -> ValidationResult {
        ValidationResult {
            is_valid: false,
            error_message: Some(error.to_string()),
            errors: vec![error],
            names: None,
            date_of_birth: None,
        }
    }

    /// The first failure, if any.
    pub fn error(&self) -> Option<&HcertError> {
        self.errors.first()
    }
}

// Results gathered while the pipeline runs.
#[derive(Default)]
struct Findings {
    errors: Vec<HcertError>,
    names: Option<Names>,
    date_of_birth: Option<NaiveDate>,
}

/// Validates health certificate tokens. Stateless across calls and shareable between threads.
#[derive(Clone)]
pub struct CertificateValidator {
    config: ValidatorConfig,
    envelope: EnvelopeBuilder,
    compressor: Arc<dyn Compressor>,
    transport: Arc<dyn TransportCodec>,
    verifier: Arc<dyn Verifier>,
    fallback_key: Option<VerificationKey>,
}

impl Default for CertificateValidator {
    fn default() -> CertificateValidator {
        CertificateValidator::with_collaborators(
            ValidatorConfig::default(),
            EnvelopeBuilder::default(),
            Arc::new(Deflate::default()),
            Arc::new(Base45),
            Arc::new(DefaultVerifier),
        )
    }
}

impl CertificateValidator {
    /// A validator using the stock collaborators.
    pub fn new(config: ValidatorConfig) -> Result<CertificateValidator, HcertError> {
        config.validate()?;
        let compressor = Deflate::new(config.compression, config.max_inflated_len);
        Ok(CertificateValidator::with_collaborators(
            config,
            EnvelopeBuilder::default(),
            Arc::new(compressor),
            Arc::new(Base45),
            Arc::new(DefaultVerifier),
        ))
    }

    pub fn with_collaborators(
        config: ValidatorConfig,
        envelope: EnvelopeBuilder,
        compressor: Arc<dyn Compressor>,
        transport: Arc<dyn TransportCodec>,
        verifier: Arc<dyn Verifier>,
    ) -> CertificateValidator {
        CertificateValidator {
            config,
            envelope,
            compressor,
            transport,
            verifier,
            fallback_key: None,
        }
    }

    /// Key used when `validate` is called without a certificate. Meant for tests and demos.
    pub fn with_fallback_key(mut self, key: VerificationKey) -> CertificateValidator {
        self.fallback_key = Some(key);
        self
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate `token` at time `now`. The signature is checked against the public key in
    /// `certificate` (DER X.509 certificate or SubjectPublicKeyInfo), or against the fallback key
    /// when no certificate is given.
    pub fn validate(
        &self,
        token: &str,
        now: DateTime<Utc>,
        certificate: Option<&[u8]>,
    ) -> ValidationResult {
        let mut findings = Findings::default();
        if let Err(error) = self.run(token, now, certificate, &mut findings) {
            warn!(%error, "certificate rejected");
            if self.config.failure_policy == FailurePolicy::ShortCircuit {
                return ValidationResult::failure(error);
            }
            findings.errors.push(error);
        }
        ValidationResult {
            is_valid: findings.errors.is_empty(),
            error_message: findings.errors.first().map(|e| e.to_string()),
            errors: findings.errors,
            names: findings.names,
            date_of_birth: findings.date_of_birth,
        }
    }

    /// Decode a token down to its envelope without checking anything beyond structure.
    pub fn open(&self, token: &str) -> Result<Envelope, HcertError> {
        let encoded = token
            .strip_prefix(self.config.version_prefix.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or(HcertError::Prefix)?;
        let compressed = self.transport.decode(encoded)?;
        let cose = self.compressor.inflate(&compressed)?;
        debug!(
            compressed_len = compressed.len(),
            cose_len = cose.len(),
            "unpacked token"
        );
        Ok(self.envelope.parse_envelope(&cose)?)
    }

    /// Decode the protected header of an envelope.
    pub fn protected_header(&self, envelope: &Envelope) -> Result<Header, HcertError> {
        let value = self
            .envelope
            .codec()
            .decode(&envelope.protected)
            .map_err(|e| HcertError::HeaderDecode(e.to_string()))?;
        Header::from_cbor(&value)
    }

    /// Decode the claims set of an envelope.
    pub fn claims(&self, envelope: &Envelope) -> Result<Claims, HcertError> {
        let value = self
            .envelope
            .codec()
            .decode(&envelope.payload)
            .map_err(|e| HcertError::PayloadDecode(e.to_string()))?;
        Claims::from_cbor(&value)
    }

    /// Render the headers and claims of a token as JSON, without verifying anything.
    pub fn inspect(&self, token: &str) -> Result<serde_json::Value, HcertError> {
        let envelope = self.open(token)?;
        let protected = self
            .envelope
            .codec()
            .decode(&envelope.protected)
            .map_err(|e| HcertError::HeaderDecode(e.to_string()))?;
        let payload = self
            .envelope
            .codec()
            .decode(&envelope.payload)
            .map_err(|e| HcertError::PayloadDecode(e.to_string()))?;
        Ok(serde_json::json!({
            "protected": cbor_to_json(&protected),
            "unprotected": cbor_to_json(&CborType::Map(envelope.unprotected)),
            "payload": cbor_to_json(&payload),
            "signature": hex::encode(&envelope.signature),
        }))
    }

    fn run(
        &self,
        token: &str,
        now: DateTime<Utc>,
        certificate: Option<&[u8]>,
        findings: &mut Findings,
    ) -> Result<(), HcertError> {
        let envelope = self.open(token)?;

        if let Err(error) = self.verify_signature(&envelope, certificate) {
            self.record(findings, error)?;
        }

        let claims = self.claims(&envelope)?;
        debug!(
            issuer = %claims.issuer,
            iat = claims.issued_at,
            exp = claims.expires_at,
            "decoded claims"
        );
        match claims.names() {
            Ok(names) => findings.names = Some(names),
            Err(error) => self.record(findings, error)?,
        }
        match claims.date_of_birth() {
            Ok(dob) => findings.date_of_birth = Some(dob),
            Err(error) => self.record(findings, error)?,
        }

        if self.config.check_validity_window && !claims.is_active_at(now.timestamp()) {
            self.record(findings, HcertError::TemporalValidity)?;
        }
        Ok(())
    }

    fn verify_signature(
        &self,
        envelope: &Envelope,
        certificate: Option<&[u8]>,
    ) -> Result<(), HcertError> {
        let header = self.protected_header(envelope)?;
        let alg = header
            .alg
            .ok_or_else(|| HcertError::HeaderDecode("missing alg".to_string()))?;
        let algorithm = SignatureAlgorithm::for_verification(alg);
        if algorithm.id() != alg {
            debug!(alg, "unregistered algorithm, verifying as {:?}", algorithm);
        }
        if let Some(kid) = envelope.unprotected_header().ok().and_then(|h| h.kid) {
            debug!(?algorithm, kid = %hex::encode(&kid), "verifying signature");
        }

        let key = match certificate {
            Some(certificate) => self.verifier.public_key_from_certificate(certificate)?,
            None => self.fallback_key.clone().ok_or_else(|| {
                HcertError::KeyResolution(
                    "no certificate given and no fallback key configured".to_string(),
                )
            })?,
        };

        let signature = match algorithm.field_len() {
            Some(field_len) => concat_to_der(&envelope.signature, field_len).map_err(|e| {
                debug!(%e, "embedded signature is not a valid concatenated signature");
                HcertError::InvalidSignature
            })?,
            None => envelope.signature.clone(),
        };
        let signed = self
            .envelope
            .build_signing_input(&envelope.protected, &envelope.payload);
        if self.verifier.verify(&key, algorithm, &signed, &signature) {
            Ok(())
        } else {
            Err(HcertError::InvalidSignature)
        }
    }

    // Keep going under `ContinueAndReport`, otherwise hand the error back to abort the run.
    fn record(&self, findings: &mut Findings, error: HcertError) -> Result<(), HcertError> {
        match self.config.failure_policy {
            FailurePolicy::ShortCircuit => Err(error),
            FailurePolicy::ContinueAndReport => {
                warn!(%error, "validation step failed, continuing");
                findings.errors.push(error);
                Ok(())
            }
        }
    }
}
