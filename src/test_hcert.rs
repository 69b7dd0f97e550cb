use std::sync::Arc;

use cbor::CborType;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use sha2::{Digest, Sha256};
use signature::hazmat::PrehashSigner;

use crate::codec::{Base45, CanonicalCbor, CborCodec, Compressor, Deflate, TransportCodec};
use crate::config::{Compression, EncoderConfig, FailurePolicy, ValidatorConfig, HC2};
use crate::crypto::{key_identifier, Signer};
use crate::envelope::{Envelope, EnvelopeBuilder};
use crate::payload::{Claims, Header, Names};
use crate::test_setup::{self as test, PAYLOAD};
use crate::util::json_to_cbor;
use crate::{CertificateEncoder, CertificateValidator, HcertError, ValidationResult};

fn encode_p256() -> (test::P256Identity, String) {
    let identity = test::p256_identity();
    let token = CertificateEncoder::default()
        .encode(PAYLOAD, test::valid_from(), test::valid_till(), &identity.signer)
        .unwrap();
    (identity, token)
}

fn validate(token: &str, certificate: &[u8]) -> ValidationResult {
    CertificateValidator::default().validate(token, test::now(), Some(certificate))
}

/// Decode `token`, let `tamper` modify the envelope, and encode it again without re-signing.
fn repack<F: FnOnce(&mut Envelope)>(token: &str, tamper: F) -> String {
    let mut envelope = CertificateValidator::default().open(token).unwrap();
    tamper(&mut envelope);
    let cose = EnvelopeBuilder::default().build_envelope(
        &envelope.protected,
        &envelope.unprotected_header().unwrap(),
        &envelope.payload,
        &envelope.signature,
    );
    let compressed = Deflate::default().deflate(&cose).unwrap();
    format!("HC1:{}", Base45.encode(&compressed))
}

fn expected_names() -> Names {
    Names {
        family_name: Some("Doe".to_string()),
        family_name_transliterated: Some("DOE".to_string()),
        given_name: Some("Jane".to_string()),
        given_name_transliterated: Some("JANE".to_string()),
    }
}

#[test]
fn test_round_trip() {
    let (identity, token) = encode_p256();
    assert!(token.starts_with("HC1:"));

    let result = validate(&token, &identity.certificate);
    assert!(result.is_valid, "{:?}", result.error_message);
    assert_eq!(result.error_message, None);
    assert!(result.errors.is_empty());
    assert_eq!(result.names, Some(expected_names()));
    assert_eq!(
        result.date_of_birth,
        Some(NaiveDate::from_ymd_opt(1990, 1, 1).unwrap())
    );
}

#[test]
fn test_concrete_scenario() {
    let identity = test::p256_identity();
    let encoded = CertificateEncoder::default()
        .encode_detailed(PAYLOAD, test::valid_from(), test::valid_till(), &identity.signer)
        .unwrap();

    // Unpack by hand: prefix, Base45, DEFLATE, tag 18.
    let text = encoded.token.strip_prefix("HC1:").unwrap();
    assert_eq!(text, encoded.base45);
    let compressed = Base45.decode(text).unwrap();
    assert_eq!(compressed, encoded.compressed);
    let cose = Deflate::default().inflate(&compressed).unwrap();
    assert_eq!(cose, encoded.cose);
    let envelope = EnvelopeBuilder::default().parse_envelope(&cose).unwrap();
    assert_eq!(envelope.payload, encoded.claims);

    let protected = Header::from_cbor(&CanonicalCbor.decode(&envelope.protected).unwrap()).unwrap();
    assert_eq!(protected.alg, Some(-7));
    assert_eq!(protected.kid, None);
    let unprotected = envelope.unprotected_header().unwrap();
    assert_eq!(unprotected.kid, Some(key_identifier(&identity.certificate)));
    assert_eq!(
        unprotected.kid,
        Some(Sha256::digest(&identity.certificate)[..8].to_vec())
    );
    assert_eq!(envelope.signature.len(), 64);

    let claims = Claims::from_cbor(&CanonicalCbor.decode(&envelope.payload).unwrap()).unwrap();
    // The clinical body sits under -260 -> 1, encoded exactly as `cbor`.
    assert_eq!(CanonicalCbor.encode(&claims.certificate), encoded.cbor);
    assert_eq!(claims.issuer, "BG");
    assert_eq!(claims.issued_at, test::valid_from().timestamp());
    assert_eq!(claims.expires_at, test::valid_till().timestamp());
    assert_eq!(claims.issued_at, 1619827200);

    let result = validate(&encoded.token, &identity.certificate);
    assert!(result.is_valid);
    assert_eq!(
        result.date_of_birth,
        Some(NaiveDate::from_ymd_opt(1990, 1, 1).unwrap())
    );
    assert_eq!(
        serde_json::to_value(&result).unwrap(),
        serde_json::json!({
            "isValid": true,
            "names": {"fn": "Doe", "fnt": "DOE", "gn": "Jane", "gnt": "JANE"},
            "dateOfBirth": "1990-01-01"
        })
    );
}

#[test]
fn test_tamper_signature() {
    let (identity, token) = encode_p256();
    for bit in 0..64 * 8 {
        let tampered = repack(&token, |envelope| {
            envelope.signature[bit / 8] ^= 1 << (bit % 8);
        });
        let result = validate(&tampered, &identity.certificate);
        assert!(!result.is_valid, "bit {}", bit);
        assert_eq!(result.error(), Some(&HcertError::InvalidSignature), "bit {}", bit);
        assert_eq!(result.error_message.as_deref(), Some("Invalid Signature"));
    }
}

#[test]
fn test_tamper_payload() {
    let (identity, token) = encode_p256();
    let payload_len = CertificateValidator::default().open(&token).unwrap().payload.len();
    for bit in 0..payload_len * 8 {
        let tampered = repack(&token, |envelope| {
            envelope.payload[bit / 8] ^= 1 << (bit % 8);
        });
        let result = validate(&tampered, &identity.certificate);
        assert!(!result.is_valid, "bit {}", bit);
        assert_eq!(result.error(), Some(&HcertError::InvalidSignature), "bit {}", bit);
        assert_eq!(result.names, None);
    }
}

#[test]
fn test_tamper_protected_header() {
    let (identity, token) = encode_p256();
    let mut signature_failures = 0;
    for bit in 0..3 * 8 {
        let mut protected = vec![0xa1, 0x01, 0x26];
        protected[bit / 8] ^= 1 << (bit % 8);
        let tampered = repack(&token, |envelope| envelope.protected = protected.clone());
        let result = validate(&tampered, &identity.certificate);
        assert!(!result.is_valid, "bit {}", bit);

        // A header that still carries an integer alg gets as far as the signature check.
        let alg = CanonicalCbor
            .decode(&protected)
            .ok()
            .and_then(|value| Header::from_cbor(&value).ok())
            .and_then(|header| header.alg);
        if alg.is_some() {
            signature_failures += 1;
            assert_eq!(
                result.error(),
                Some(&HcertError::InvalidSignature),
                "bit {}: alg {:?}",
                bit,
                alg
            );
            assert_eq!(result.error_message.as_deref(), Some("Invalid Signature"));
        } else {
            assert!(
                matches!(result.error(), Some(HcertError::HeaderDecode(_))),
                "bit {}: {:?}",
                bit,
                result.error()
            );
        }
    }
    // Every flip of the low five bits of -7 yields another negative integer.
    assert!(signature_failures >= 5, "{}", signature_failures);
}

#[test]
fn test_unregistered_alg_fails_signature() {
    let (identity, token) = encode_p256();
    for alg in [-8, -37, -260, 0, 1, 7, 1000] {
        let protected = CanonicalCbor.encode(&Header::protected(alg).to_cbor());
        let tampered = repack(&token, |envelope| envelope.protected = protected);
        let result = validate(&tampered, &identity.certificate);
        assert_eq!(
            result.error(),
            Some(&HcertError::InvalidSignature),
            "alg {}",
            alg
        );
    }

    // Without an alg there is nothing to select a verifier with.
    let protected = CanonicalCbor.encode(&Header::default().to_cbor());
    let tampered = repack(&token, |envelope| envelope.protected = protected);
    let result = validate(&tampered, &identity.certificate);
    assert!(matches!(result.error(), Some(HcertError::HeaderDecode(_))));
}

#[test]
fn test_prefix_rejection() {
    let (identity, token) = encode_p256();
    let body = token.strip_prefix("HC1:").unwrap();
    let candidates = [
        String::new(),
        "HC1".to_string(),
        body.to_string(),
        format!("HC2:{}", body),
        format!("hc1:{}", body),
        format!(" HC1:{}", body),
        format!("HC1;{}", body),
        // Not Base45 either; the prefix check must fire first.
        "XYZ:!!!!".to_string(),
    ];
    for candidate in candidates.iter() {
        let result = validate(candidate, &identity.certificate);
        assert!(!result.is_valid);
        assert_eq!(result.error(), Some(&HcertError::Prefix), "{:?}", candidate);
        assert_eq!(
            result.error_message.as_deref(),
            Some("Invalid QR code context prefix")
        );
    }
}

#[test]
fn test_transport_and_decompression_failures() {
    let (identity, _) = encode_p256();

    let result = validate("HC1:bb8", &identity.certificate);
    assert!(matches!(result.error(), Some(HcertError::TransportDecode(_))));

    let result = validate("HC1:ABCD", &identity.certificate);
    assert!(matches!(result.error(), Some(HcertError::TransportDecode(_))));

    let garbage = format!("HC1:{}", Base45.encode(&[0xff, 0xff, 0xff, 0xff]));
    let result = validate(&garbage, &identity.certificate);
    assert!(!result.is_valid);
    assert!(matches!(result.error(), Some(HcertError::Decompress(_))));
}

#[test]
fn test_tag_rejection() {
    let (identity, token) = encode_p256();
    let envelope = CertificateValidator::default().open(&token).unwrap();
    let items = vec![
        CborType::Bytes(envelope.protected.clone()),
        CborType::Map(envelope.unprotected.clone()),
        CborType::Bytes(envelope.payload.clone()),
        CborType::Bytes(envelope.signature.clone()),
    ];
    // COSE_Sign, the multi-signer structure.
    let cose = CborType::Tag(98, Box::new(CborType::Array(items))).serialize();
    let token = format!(
        "HC1:{}",
        Base45.encode(&Deflate::default().deflate(&cose).unwrap())
    );

    let result = validate(&token, &identity.certificate);
    assert!(!result.is_valid);
    assert_eq!(result.error(), Some(&HcertError::UnsupportedStructure));
    assert_eq!(
        result.error_message.as_deref(),
        Some("Invalid Tag. Only single-signer structures are supported")
    );
}

#[test]
fn test_validity_window() {
    let (identity, token) = encode_p256();
    let validator = CertificateValidator::default();
    let iat = test::valid_from();
    let exp = test::valid_till();
    let one = Duration::seconds(1);

    for now in [iat, exp] {
        let result = validator.validate(&token, now, Some(&identity.certificate));
        assert!(result.is_valid, "{}: {:?}", now, result.error_message);
    }
    for now in [iat - one, exp + one] {
        let result = validator.validate(&token, now, Some(&identity.certificate));
        assert!(!result.is_valid, "{}", now);
        assert_eq!(result.error(), Some(&HcertError::TemporalValidity));
        assert_eq!(
            result.error_message.as_deref(),
            Some("Certificate has expired or not yet active.")
        );
    }

    let config = ValidatorConfig {
        check_validity_window: false,
        ..ValidatorConfig::default()
    };
    let validator = CertificateValidator::new(config).unwrap();
    let result = validator.validate(&token, exp + one, Some(&identity.certificate));
    assert!(result.is_valid);
}

#[test]
fn test_inverted_window() {
    let identity = test::p256_identity();
    let token = CertificateEncoder::default()
        .encode(PAYLOAD, test::valid_till(), test::valid_from(), &identity.signer)
        .unwrap();
    let result = validate(&token, &identity.certificate);
    assert_eq!(result.error(), Some(&HcertError::TemporalValidity));
}

#[test]
fn test_rsa_round_trip() {
    let identity = test::rsa_identity();
    let encoded = CertificateEncoder::default()
        .encode_detailed(PAYLOAD, test::valid_from(), test::valid_till(), &identity.signer)
        .unwrap();
    let envelope = CertificateValidator::default().open(&encoded.token).unwrap();
    let protected = Header::from_cbor(&CanonicalCbor.decode(&envelope.protected).unwrap()).unwrap();
    assert_eq!(protected.alg, Some(-37));
    // RSA signatures are carried as is.
    assert_eq!(envelope.signature.len(), 128);

    let result = validate(&encoded.token, &identity.public_key);
    assert!(result.is_valid, "{:?}", result.error_message);
    assert_eq!(result.names, Some(expected_names()));

    let tampered = repack(&encoded.token, |envelope| envelope.signature[0] ^= 1);
    let result = validate(&tampered, &identity.public_key);
    assert_eq!(result.error(), Some(&HcertError::InvalidSignature));
}

#[test]
fn test_wrong_key() {
    let (_, token) = encode_p256();
    let other = test::p256_identity();
    let result = validate(&token, &other.certificate);
    assert!(!result.is_valid);
    assert_eq!(result.error(), Some(&HcertError::InvalidSignature));

    // An RSA key cannot verify ES256.
    let rsa = test::rsa_identity();
    let result = validate(&token, &rsa.public_key);
    assert_eq!(result.error(), Some(&HcertError::InvalidSignature));
}

#[test]
fn test_key_resolution_failures() {
    let (_, token) = encode_p256();
    let result = validate(&token, b"not a certificate");
    assert!(matches!(result.error(), Some(HcertError::KeyResolution(_))));

    let result = CertificateValidator::default().validate(&token, test::now(), None);
    assert!(!result.is_valid);
    assert!(matches!(result.error(), Some(HcertError::KeyResolution(_))));
}

#[test]
fn test_fallback_key() {
    let (identity, token) = encode_p256();
    let validator =
        CertificateValidator::default().with_fallback_key(identity.signer.verification_key());
    let result = validator.validate(&token, test::now(), None);
    assert!(result.is_valid, "{:?}", result.error_message);

    // An explicit certificate wins over the fallback key.
    let other = test::p256_identity();
    let result = validator.validate(&token, test::now(), Some(&other.certificate));
    assert_eq!(result.error(), Some(&HcertError::InvalidSignature));
}

#[test]
fn test_continue_and_report() {
    let (identity, token) = encode_p256();
    let tampered = repack(&token, |envelope| envelope.signature[10] ^= 0x40);
    let config = ValidatorConfig {
        failure_policy: FailurePolicy::ContinueAndReport,
        ..ValidatorConfig::default()
    };
    let validator = CertificateValidator::new(config).unwrap();
    let expired = test::valid_till() + Duration::days(1);

    let result = validator.validate(&tampered, expired, Some(&identity.certificate));
    assert!(!result.is_valid);
    assert_eq!(
        result.errors,
        vec![HcertError::InvalidSignature, HcertError::TemporalValidity]
    );
    assert_eq!(result.error_message.as_deref(), Some("Invalid Signature"));
    // Payload fields are still reported for diagnostics.
    assert_eq!(result.names, Some(expected_names()));
    assert_eq!(
        result.date_of_birth,
        Some(NaiveDate::from_ymd_opt(1990, 1, 1).unwrap())
    );

    // Without a key, the signature check is skipped and recorded.
    let result = validator.validate(&token, test::now(), None);
    assert!(!result.is_valid);
    assert_eq!(result.errors.len(), 1);
    assert!(matches!(result.errors[0], HcertError::KeyResolution(_)));
    assert_eq!(result.names, Some(expected_names()));

    // Structural failures still end the run.
    let result = validator.validate("HC2:", test::now(), Some(&identity.certificate));
    assert_eq!(result.errors, vec![HcertError::Prefix]);
    assert_eq!(result.names, None);
}

#[test]
fn test_short_circuit_hides_payload() {
    let (identity, token) = encode_p256();
    let tampered = repack(&token, |envelope| envelope.signature[10] ^= 0x40);
    let result = validate(&tampered, &identity.certificate);
    assert_eq!(result.errors, vec![HcertError::InvalidSignature]);
    assert_eq!(result.names, None);
    assert_eq!(result.date_of_birth, None);
    assert_eq!(
        serde_json::to_value(&result).unwrap(),
        serde_json::json!({"isValid": false, "errorMessage": "Invalid Signature"})
    );
}

#[test]
fn test_missing_payload_fields() {
    let identity = test::p256_identity();
    let token = CertificateEncoder::default()
        .encode(
            r#"{"ver": "1.0.0", "dob": "1990-13-45"}"#,
            test::valid_from(),
            test::valid_till(),
            &identity.signer,
        )
        .unwrap();
    let result = validate(&token, &identity.certificate);
    assert!(!result.is_valid);
    assert!(matches!(result.error(), Some(HcertError::PayloadDecode(_))));
}

#[test]
fn test_external_signing() {
    let identity = test::p256_identity();
    let encoder = CertificateEncoder::default();
    let kid = key_identifier(&identity.certificate);
    let prepared = encoder
        .prepare(PAYLOAD, test::valid_from(), test::valid_till(), -7, kid.clone())
        .unwrap();
    assert_eq!(prepared.kid, kid);
    assert_eq!(
        prepared.digest,
        Sha256::digest(&prepared.signing_input).to_vec()
    );
    assert_eq!(
        prepared.signing_input,
        EnvelopeBuilder::default().build_signing_input(&prepared.protected, &prepared.payload)
    );

    // Sign only the digest, the way a remote signing service would.
    let signature: p256::ecdsa::Signature = identity.key.sign_prehash(&prepared.digest).unwrap();
    let token = encoder
        .finish(prepared, signature.to_der().as_bytes())
        .unwrap();
    let result = validate(&token, &identity.certificate);
    assert!(result.is_valid, "{:?}", result.error_message);
}

#[test]
fn test_finish_rejects_bad_ecdsa_signature() {
    let encoder = CertificateEncoder::default();
    let prepared = encoder
        .prepare(PAYLOAD, test::valid_from(), test::valid_till(), -7, vec![1; 8])
        .unwrap();
    assert!(matches!(
        encoder.finish(prepared, &[0x00; 64]),
        Err(HcertError::Signing(_))
    ));
}

#[test]
fn test_payload_format_errors() {
    let identity = test::p256_identity();
    let encoder = CertificateEncoder::default();
    for json in ["not json", r#"{"dn": 1.5}"#, r#"{"flag": true}"#] {
        let result = encoder.encode(json, test::valid_from(), test::valid_till(), &identity.signer);
        assert!(
            matches!(result, Err(HcertError::PayloadFormat(_))),
            "{}: {:?}",
            json,
            result
        );
    }
}

struct UnavailableSigner;

impl Signer for UnavailableSigner {
    fn algorithm_id(&self) -> i64 {
        -7
    }

    fn key_identifier(&self) -> Vec<u8> {
        vec![0; 8]
    }

    fn sign(&self, _data: &[u8]) -> Result<Vec<u8>, HcertError> {
        Err(HcertError::Signing("key unavailable".to_string()))
    }
}

#[test]
fn test_signing_failure() {
    let result = CertificateEncoder::default().encode(
        PAYLOAD,
        test::valid_from(),
        test::valid_till(),
        &UnavailableSigner,
    );
    assert_eq!(
        result,
        Err(HcertError::Signing("key unavailable".to_string()))
    );
}

#[test]
fn test_hc2_with_zlib() {
    let identity = test::p256_identity();
    let encoder = CertificateEncoder::new(EncoderConfig {
        issuer: "AT".to_string(),
        version_prefix: HC2.to_string(),
        compression: Compression::Zlib,
    })
    .unwrap();
    let token = encoder
        .encode(PAYLOAD, test::valid_from(), test::valid_till(), &identity.signer)
        .unwrap();
    assert!(token.starts_with("HC2:"));

    let validator = CertificateValidator::new(ValidatorConfig {
        version_prefix: HC2.to_string(),
        compression: Compression::Zlib,
        ..ValidatorConfig::default()
    })
    .unwrap();
    let result = validator.validate(&token, test::now(), Some(&identity.certificate));
    assert!(result.is_valid, "{:?}", result.error_message);
    let claims = validator.claims(&validator.open(&token).unwrap()).unwrap();
    assert_eq!(claims.issuer, "AT");

    let result = validate(&token, &identity.certificate);
    assert_eq!(result.error(), Some(&HcertError::Prefix));
}

/// Hex instead of Base45, to show the transport codec is swappable.
struct Hex;

impl TransportCodec for Hex {
    fn encode(&self, bytes: &[u8]) -> String {
        hex::encode(bytes)
    }

    fn decode(&self, text: &str) -> Result<Vec<u8>, HcertError> {
        hex::decode(text).map_err(|e| HcertError::TransportDecode(e.to_string()))
    }
}

#[test]
fn test_custom_collaborators() {
    let identity = test::p256_identity();
    let encoder = CertificateEncoder::with_collaborators(
        EncoderConfig::default(),
        EnvelopeBuilder::new(Arc::new(CanonicalCbor)),
        Arc::new(Deflate::default()),
        Arc::new(Hex),
    );
    let token = encoder
        .encode(PAYLOAD, test::valid_from(), test::valid_till(), &identity.signer)
        .unwrap();
    assert!(token[4..].chars().all(|c| c.is_ascii_hexdigit()));

    let validator = CertificateValidator::with_collaborators(
        ValidatorConfig::default(),
        EnvelopeBuilder::default(),
        Arc::new(Deflate::default()),
        Arc::new(Hex),
        Arc::new(crate::crypto::DefaultVerifier),
    );
    let result = validator.validate(&token, test::now(), Some(&identity.certificate));
    assert!(result.is_valid, "{:?}", result.error_message);
}

#[test]
fn test_test_vector() {
    let identity = test::p256_identity();
    let encoded = CertificateEncoder::default()
        .encode_detailed(PAYLOAD, test::valid_from(), test::valid_till(), &identity.signer)
        .unwrap();
    let clock = Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap();
    let vector = encoded.test_vector(PAYLOAD, clock);
    assert_eq!(vector.prefix, encoded.token);
    assert_eq!(vector.cose, hex::encode(&encoded.cose));
    // CBOR is the clinical body alone, not the claims set around it.
    let body: serde_json::Value = serde_json::from_str(PAYLOAD).unwrap();
    let body = CanonicalCbor.encode(&json_to_cbor(&body).unwrap());
    assert_eq!(vector.cbor, hex::encode(&body));
    assert_ne!(encoded.cbor, encoded.claims);

    let json = serde_json::to_value(&vector).unwrap();
    for key in [
        "JSON",
        "CBOR",
        "COSE",
        "BASE45",
        "PREFIX",
        "EXPECTEDDECODE",
        "EXPECTEDVERIFY",
        "VALIDATIONCLOCK",
    ] {
        assert!(json.get(key).is_some(), "missing {}", key);
    }
    assert_eq!(json["EXPECTEDVERIFY"], serde_json::json!(true));

    let result = CertificateValidator::default().validate(
        &vector.prefix,
        vector.validation_clock,
        Some(&identity.certificate),
    );
    assert!(result.is_valid);
}

#[test]
fn test_concurrent_validation() {
    let (identity, token) = encode_p256();
    let validator = CertificateValidator::default();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| validator.validate(&token, test::now(), Some(&identity.certificate)))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_valid);
        }
    });
}

#[test]
fn test_inspect() {
    let (identity, token) = encode_p256();
    let json = CertificateValidator::default().inspect(&token).unwrap();
    assert_eq!(json["protected"], serde_json::json!({"1": -7}));
    assert_eq!(
        json["unprotected"]["4"],
        serde_json::json!(hex::encode(key_identifier(&identity.certificate)))
    );
    assert_eq!(json["payload"]["1"], serde_json::json!("BG"));
    assert_eq!(json["payload"]["-260"]["1"]["dob"], serde_json::json!("1990-01-01"));
    assert_eq!(json["payload"]["-260"]["1"]["v"][0]["dn"], serde_json::json!(2));

    assert_eq!(
        CertificateValidator::default().inspect("HC2:"),
        Err(HcertError::Prefix)
    );
}
