use std::collections::BTreeMap;

use cbor::CborType;
use chrono::NaiveDate;

use crate::envelope::{EnvelopeBuilder, ParseError, COSE_SIGN1_TAG};
use crate::payload::{Claims, Header, Names};
use crate::util::json_to_cbor;
use crate::HcertError;

const PROTECTED_ES256: [u8; 3] = [0xa1, 0x01, 0x26];

fn tagged(tag: u64, items: Vec<CborType>) -> Vec<u8> {
    CborType::Tag(tag, Box::new(CborType::Array(items))).serialize()
}

fn sign1_items() -> Vec<CborType> {
    vec![
        CborType::Bytes(PROTECTED_ES256.to_vec()),
        CborType::Map(BTreeMap::new()),
        CborType::Bytes(b"payload".to_vec()),
        CborType::Bytes(vec![0x5a; 64]),
    ]
}

#[test]
fn test_protected_header_bytes() {
    let header = Header::protected(-7).to_cbor().serialize();
    assert_eq!(header, PROTECTED_ES256.to_vec());
}

#[test]
fn test_signing_input() {
    let builder = EnvelopeBuilder::default();
    let input = builder.build_signing_input(&PROTECTED_ES256, b"abc");
    let mut expected = vec![0x84, 0x6a];
    expected.extend_from_slice(b"Signature1");
    expected.extend_from_slice(&[0x43, 0xa1, 0x01, 0x26, 0x40, 0x43]);
    expected.extend_from_slice(b"abc");
    assert_eq!(input, expected);
    // Deterministic.
    assert_eq!(builder.build_signing_input(&PROTECTED_ES256, b"abc"), input);
}

#[test]
fn test_build_and_parse() {
    let builder = EnvelopeBuilder::default();
    let kid = vec![1, 2, 3, 4, 5, 6, 7, 8];
    let signature = vec![0x11; 64];
    let bytes = builder.build_envelope(
        &PROTECTED_ES256,
        &Header::unprotected(kid.clone()),
        b"payload",
        &signature,
    );
    // Tag 18 is encoded as 0xd2, followed by a 4-element array.
    assert_eq!(&bytes[..2], &[0xd2, 0x84]);

    let envelope = builder.parse_envelope(&bytes).unwrap();
    assert_eq!(envelope.protected, PROTECTED_ES256.to_vec());
    assert_eq!(envelope.payload, b"payload".to_vec());
    assert_eq!(envelope.signature, signature);
    assert_eq!(envelope.unprotected_header().unwrap().kid, Some(kid));
}

#[test]
fn test_empty_unprotected_header() {
    let builder = EnvelopeBuilder::default();
    let bytes = builder.build_envelope(&PROTECTED_ES256, &Header::default(), b"payload", &[0; 64]);
    let envelope = builder.parse_envelope(&bytes).unwrap();
    assert!(envelope.unprotected.is_empty());
    assert!(envelope.unprotected_header().unwrap().is_empty());
}

#[test]
fn test_parse_wrong_tag() {
    let builder = EnvelopeBuilder::default();
    // COSE_Sign (98), COSE_Mac0 (17) and COSE_Encrypt0 (16) are all rejected.
    for tag in [98, 17, 16] {
        assert_eq!(
            builder.parse_envelope(&tagged(tag, sign1_items())),
            Err(ParseError::UnsupportedStructure)
        );
    }
    let untagged = CborType::Array(sign1_items()).serialize();
    assert_eq!(
        builder.parse_envelope(&untagged),
        Err(ParseError::UnsupportedStructure)
    );
    assert_eq!(
        HcertError::from(ParseError::UnsupportedStructure).to_string(),
        "Invalid Tag. Only single-signer structures are supported"
    );
}

#[test]
fn test_parse_malformed() {
    let builder = EnvelopeBuilder::default();

    let mut items = sign1_items();
    items.pop();
    assert!(matches!(
        builder.parse_envelope(&tagged(COSE_SIGN1_TAG, items)),
        Err(ParseError::Malformed(_))
    ));

    let mut items = sign1_items();
    items.push(CborType::Null);
    assert!(matches!(
        builder.parse_envelope(&tagged(COSE_SIGN1_TAG, items)),
        Err(ParseError::Malformed(_))
    ));

    let mut items = sign1_items();
    items[0] = CborType::Map(BTreeMap::new());
    assert!(matches!(
        builder.parse_envelope(&tagged(COSE_SIGN1_TAG, items)),
        Err(ParseError::Malformed(_))
    ));

    let mut items = sign1_items();
    items[2] = CborType::Null;
    assert!(matches!(
        builder.parse_envelope(&tagged(COSE_SIGN1_TAG, items)),
        Err(ParseError::Malformed(_))
    ));

    assert!(matches!(
        builder.parse_envelope(&[0xd2, 0x84, 0x43]),
        Err(ParseError::Malformed(_))
    ));
    assert!(matches!(
        builder.parse_envelope(&[]),
        Err(ParseError::Malformed(_))
    ));

    let mut bytes = tagged(COSE_SIGN1_TAG, sign1_items());
    bytes.push(0x00);
    assert!(matches!(
        builder.parse_envelope(&bytes),
        Err(ParseError::Malformed(_))
    ));
}

#[test]
fn test_header_rejects_bad_values() {
    let mut map = BTreeMap::new();
    map.insert(CborType::Integer(1), CborType::String("ES256".to_string()));
    assert!(matches!(
        Header::from_map(&map),
        Err(HcertError::HeaderDecode(_))
    ));

    let mut map = BTreeMap::new();
    map.insert(CborType::Integer(4), CborType::Integer(4));
    assert!(matches!(
        Header::from_map(&map),
        Err(HcertError::HeaderDecode(_))
    ));

    assert!(matches!(
        Header::from_cbor(&CborType::Bytes(vec![])),
        Err(HcertError::HeaderDecode(_))
    ));
}

#[test]
fn test_header_keeps_other_labels() {
    let mut map = BTreeMap::new();
    map.insert(CborType::Integer(1), CborType::SignedInteger(-37));
    map.insert(CborType::Integer(3), CborType::String("application/cbor".to_string()));
    let header = Header::from_map(&map).unwrap();
    assert_eq!(header.alg, Some(-37));
    assert_eq!(header.other.len(), 1);
    assert_eq!(header.to_cbor(), CborType::Map(map));
}

fn claims(json: &str) -> Claims {
    Claims {
        issuer: "BG".to_string(),
        issued_at: 1619827200,
        expires_at: 1651363200,
        certificate: json_to_cbor(&serde_json::from_str(json).unwrap()).unwrap(),
    }
}

#[test]
fn test_claims_round_trip() {
    let claims = claims(crate::test_setup::PAYLOAD);
    let decoded = Claims::from_cbor(&claims.to_cbor()).unwrap();
    assert_eq!(decoded, claims);
    assert_eq!(
        decoded.names().unwrap(),
        Names {
            family_name: Some("Doe".to_string()),
            family_name_transliterated: Some("DOE".to_string()),
            given_name: Some("Jane".to_string()),
            given_name_transliterated: Some("JANE".to_string()),
        }
    );
    assert_eq!(
        decoded.date_of_birth().unwrap(),
        NaiveDate::from_ymd_opt(1990, 1, 1).unwrap()
    );
}

#[test]
fn test_claims_missing_body() {
    let mut map = match claims("{}").to_cbor() {
        CborType::Map(map) => map,
        _ => unreachable!(),
    };
    map.insert(CborType::SignedInteger(-260), CborType::Map(BTreeMap::new()));
    assert_eq!(
        Claims::from_cbor(&CborType::Map(map)),
        Err(HcertError::PayloadDecode("missing hcert body".to_string()))
    );
}

#[test]
fn test_claims_bad_dob() {
    let claims = claims(r#"{"nam": {"fn": "Doe"}, "dob": "01.01.1990"}"#);
    assert!(matches!(
        claims.date_of_birth(),
        Err(HcertError::PayloadDecode(_))
    ));
    let names = claims.names().unwrap();
    assert_eq!(names.family_name, Some("Doe".to_string()));
    assert_eq!(names.given_name, None);

    let claims = self::claims(r#"{"dob": "1990-01-01T00:00:00"}"#);
    assert_eq!(
        claims.date_of_birth().unwrap(),
        NaiveDate::from_ymd_opt(1990, 1, 1).unwrap()
    );
    assert!(matches!(claims.names(), Err(HcertError::PayloadDecode(_))));
}

#[test]
fn test_validity_window_bounds() {
    let claims = claims("{}");
    assert!(claims.is_active_at(claims.issued_at));
    assert!(claims.is_active_at(claims.expires_at));
    assert!(!claims.is_active_at(claims.issued_at - 1));
    assert!(!claims.is_active_at(claims.expires_at + 1));
}

#[test]
fn test_json_without_floats_or_booleans() {
    assert!(matches!(
        json_to_cbor(&serde_json::json!({"dn": 1.5})),
        Err(HcertError::PayloadFormat(_))
    ));
    assert!(matches!(
        json_to_cbor(&serde_json::json!([true])),
        Err(HcertError::PayloadFormat(_))
    ));
    assert_eq!(
        json_to_cbor(&serde_json::json!({"a": [-1, null]})).unwrap(),
        CborType::Map(
            vec![(
                CborType::String("a".to_string()),
                CborType::Array(vec![CborType::SignedInteger(-1), CborType::Null]),
            )]
            .into_iter()
            .collect()
        )
    );
}
