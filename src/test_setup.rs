use std::sync::OnceLock;

use chrono::{DateTime, TimeZone, Utc};
use p256::pkcs8::DecodePrivateKey;
use rand_core::OsRng;
use rsa::pkcs8::EncodePublicKey;
use rsa::RsaPrivateKey;

use crate::crypto::{EcdsaP256Signer, RsaPssSigner};

pub const PAYLOAD: &str = r#"{
    "ver": "1.0.0",
    "nam": {"fn": "Doe", "fnt": "DOE", "gn": "Jane", "gnt": "JANE"},
    "dob": "1990-01-01",
    "v": [{
        "tg": "840539006",
        "vp": "1119349007",
        "mp": "EU/1/20/1528",
        "ma": "ORG-100030215",
        "dn": 2,
        "sd": 2,
        "dt": "2021-04-21",
        "co": "BG",
        "is": "Ministry of Health",
        "ci": "URN:UVCI:01:BG:UFR5PLGKU8WDSZK7#0"
    }]
}"#;

pub struct P256Identity {
    pub key: p256::ecdsa::SigningKey,
    pub signer: EcdsaP256Signer,
    pub certificate: Vec<u8>,
}

/// A fresh self-signed P-256 certificate and the matching signer.
pub fn p256_identity() -> P256Identity {
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let params = rcgen::CertificateParams::new(vec!["dsc.hcert.test".to_string()]).unwrap();
    let certificate = params.self_signed(&key_pair).unwrap().der().to_vec();
    let key = p256::ecdsa::SigningKey::from_pkcs8_der(&key_pair.serialize_der()).unwrap();
    P256Identity {
        signer: EcdsaP256Signer::new(key.clone(), &certificate),
        key,
        certificate,
    }
}

pub struct RsaIdentity {
    pub signer: RsaPssSigner,
    /// DER SubjectPublicKeyInfo of the signer.
    pub public_key: Vec<u8>,
}

/// An RSA identity. Key generation is slow, so one small key is generated per test run.
pub fn rsa_identity() -> RsaIdentity {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    let key = KEY
        .get_or_init(|| RsaPrivateKey::new(&mut OsRng, 1024).unwrap())
        .clone();
    let public_key = key
        .to_public_key()
        .to_public_key_der()
        .unwrap()
        .as_bytes()
        .to_vec();
    RsaIdentity {
        signer: RsaPssSigner::new(key, &public_key),
        public_key,
    }
}

pub fn valid_from() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 5, 1, 0, 0, 0).unwrap()
}

pub fn valid_till() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 5, 1, 0, 0, 0).unwrap()
}

/// A point in time inside `[valid_from, valid_till]`.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 8, 15, 12, 0, 0).unwrap()
}
