//! Signing and verification capabilities.
//!
//! The encoder and validator never touch key material directly: they call a `Signer` or a
//! `Verifier`. The implementations here cover ES256 (ECDSA over P-256 with SHA-256) and PS256
//! (RSASSA-PSS with SHA-256, 32-byte salt).
//!
//! Signatures cross these interfaces in the algorithm's native format: DER for ECDSA, the raw
//! modulus-sized octet string for RSA-PSS.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::DecodePublicKey;
use rand_core::OsRng;
use rsa::pkcs8::DecodePublicKey as _;
use rsa::{pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use signature::{RandomizedSigner, SignatureEncoding, Signer as _, Verifier as _};
use tracing::debug;

use crate::{HcertError, SignatureAlgorithm};

/// Length of a key identifier: the leading bytes of the certificate's SHA-256.
pub const KID_LEN: usize = 8;

/// Produces signatures for the encoder.
pub trait Signer: Send + Sync {
    /// The COSE algorithm identifier this signer produces signatures for.
    fn algorithm_id(&self) -> i64;
    /// Identifier of the verification key, carried in the unprotected header.
    fn key_identifier(&self) -> Vec<u8>;
    /// Sign `data`, returning the signature in the algorithm's native format.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, HcertError>;
}

/// A public key recovered from certificate material.
#[derive(Debug, Clone)]
pub enum VerificationKey {
    P256(p256::ecdsa::VerifyingKey),
    Rsa(RsaPublicKey),
}

impl VerificationKey {
    pub fn supports(&self, algorithm: SignatureAlgorithm) -> bool {
        matches!(
            (self, algorithm),
            (VerificationKey::P256(_), SignatureAlgorithm::ES256)
                | (VerificationKey::Rsa(_), SignatureAlgorithm::PS256)
        )
    }
}

/// Resolves keys and checks signatures for the validator.
pub trait Verifier: Send + Sync {
    fn public_key_from_certificate(&self, certificate: &[u8]) -> Result<VerificationKey, HcertError>;
    /// Check `signature` (native format) over `signed`.
    fn verify(
        &self,
        key: &VerificationKey,
        algorithm: SignatureAlgorithm,
        signed: &[u8],
        signature: &[u8],
    ) -> bool;
}

/// Derive the key identifier of a DER certificate: the first 8 bytes of its SHA-256.
pub fn key_identifier(certificate_der: &[u8]) -> Vec<u8> {
    Sha256::digest(certificate_der)[..KID_LEN].to_vec()
}

/// Extract the DER SubjectPublicKeyInfo of a DER certificate. Input that does not parse as a
/// certificate is assumed to already be an SPKI.
fn spki_from_der_key_or_cert(der: &[u8]) -> Vec<u8> {
    match x509_parser::parse_x509_certificate(der) {
        Ok((_, cert)) => cert.tbs_certificate.subject_pki.raw.to_vec(),
        Err(_) => der.to_vec(),
    }
}

/// The stock `Verifier`: X.509/SPKI parsing, P-256 and RSA keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultVerifier;

impl Verifier for DefaultVerifier {
    fn public_key_from_certificate(&self, certificate: &[u8]) -> Result<VerificationKey, HcertError> {
        let spki = spki_from_der_key_or_cert(certificate);
        if let Ok(pk) = p256::PublicKey::from_public_key_der(&spki) {
            let point = pk.to_encoded_point(false);
            let vk = p256::ecdsa::VerifyingKey::from_sec1_bytes(point.as_bytes())
                .map_err(|e| HcertError::KeyResolution(format!("bad P-256 public key: {}", e)))?;
            return Ok(VerificationKey::P256(vk));
        }
        if let Ok(pk) = RsaPublicKey::from_public_key_der(&spki) {
            return Ok(VerificationKey::Rsa(pk));
        }
        Err(HcertError::KeyResolution(
            "certificate does not hold a P-256 or RSA public key".to_string(),
        ))
    }

    fn verify(
        &self,
        key: &VerificationKey,
        algorithm: SignatureAlgorithm,
        signed: &[u8],
        signature: &[u8],
    ) -> bool {
        match (key, algorithm) {
            (VerificationKey::P256(vk), SignatureAlgorithm::ES256) => {
                match p256::ecdsa::Signature::from_der(signature) {
                    Ok(sig) => vk.verify(signed, &sig).is_ok(),
                    Err(_) => false,
                }
            }
            (VerificationKey::Rsa(pk), SignatureAlgorithm::PS256) => {
                let vk = pss::VerifyingKey::<Sha256>::new(pk.clone());
                match pss::Signature::try_from(signature) {
                    Ok(sig) => vk.verify(signed, &sig).is_ok(),
                    Err(_) => false,
                }
            }
            _ => {
                debug!(?algorithm, "key type does not match the signature algorithm");
                false
            }
        }
    }
}

/// ES256 signer over a P-256 key. Produces DER signatures.
#[derive(Clone)]
pub struct EcdsaP256Signer {
    key: p256::ecdsa::SigningKey,
    kid: Vec<u8>,
}

impl EcdsaP256Signer {
    /// A signer whose key identifier is derived from `certificate_der`.
    pub fn new(key: p256::ecdsa::SigningKey, certificate_der: &[u8]) -> EcdsaP256Signer {
        EcdsaP256Signer::with_kid(key, key_identifier(certificate_der))
    }

    pub fn with_kid(key: p256::ecdsa::SigningKey, kid: Vec<u8>) -> EcdsaP256Signer {
        EcdsaP256Signer { key, kid }
    }

    pub fn verification_key(&self) -> VerificationKey {
        VerificationKey::P256(self.key.verifying_key().clone())
    }
}

impl Signer for EcdsaP256Signer {
    fn algorithm_id(&self) -> i64 {
        SignatureAlgorithm::ES256.id()
    }

    fn key_identifier(&self) -> Vec<u8> {
        self.kid.clone()
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, HcertError> {
        let signature: p256::ecdsa::Signature = self
            .key
            .try_sign(data)
            .map_err(|e| HcertError::Signing(e.to_string()))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

/// PS256 signer over an RSA key.
#[derive(Clone)]
pub struct RsaPssSigner {
    key: pss::SigningKey<Sha256>,
    public: RsaPublicKey,
    kid: Vec<u8>,
}

impl RsaPssSigner {
    pub fn new(key: RsaPrivateKey, certificate_der: &[u8]) -> RsaPssSigner {
        RsaPssSigner::with_kid(key, key_identifier(certificate_der))
    }

    pub fn with_kid(key: RsaPrivateKey, kid: Vec<u8>) -> RsaPssSigner {
        let public = key.to_public_key();
        RsaPssSigner {
            key: pss::SigningKey::<Sha256>::new(key),
            public,
            kid,
        }
    }

    pub fn verification_key(&self) -> VerificationKey {
        VerificationKey::Rsa(self.public.clone())
    }
}

impl Signer for RsaPssSigner {
    fn algorithm_id(&self) -> i64 {
        SignatureAlgorithm::PS256.id()
    }

    fn key_identifier(&self) -> Vec<u8> {
        self.kid.clone()
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, HcertError> {
        let signature = self
            .key
            .try_sign_with_rng(&mut OsRng, data)
            .map_err(|e| HcertError::Signing(e.to_string()))?;
        Ok(signature.to_bytes().as_ref().to_vec())
    }
}
