use std::collections::BTreeMap;

use cbor::CborType;

use crate::codec::{Base45, CanonicalCbor, CborCodec, Compressor, Deflate, TransportCodec};
use crate::config::{Compression, EncoderConfig, FailurePolicy, ValidatorConfig, HC2};
use crate::HcertError;

#[test]
fn test_base45_vectors() {
    assert_eq!(Base45.encode(b"AB"), "BB8");
    assert_eq!(Base45.encode(b"Hello!!"), "%69 VD92EX0");
    assert_eq!(Base45.encode(b"ietf!"), "QED8WEX0");
    assert_eq!(Base45.encode(b""), "");

    assert_eq!(Base45.decode("BB8").unwrap(), b"AB".to_vec());
    assert_eq!(Base45.decode("%69 VD92EX0").unwrap(), b"Hello!!".to_vec());
    assert_eq!(Base45.decode("QED8WEX0").unwrap(), b"ietf!".to_vec());
}

#[test]
fn test_base45_all_bytes() {
    let bytes: Vec<u8> = (0..=255).collect();
    let text = Base45.encode(&bytes);
    assert_eq!(Base45.decode(&text).unwrap(), bytes);
}

#[test]
fn test_base45_invalid() {
    // Lower case is not part of the alphabet.
    assert!(matches!(
        Base45.decode("bb8"),
        Err(HcertError::TransportDecode(_))
    ));
    assert!(matches!(
        Base45.decode("BB8#"),
        Err(HcertError::TransportDecode(_))
    ));
    // A single dangling character cannot encode anything.
    assert!(matches!(
        Base45.decode("BB8A"),
        Err(HcertError::TransportDecode(_))
    ));
}

#[test]
fn test_deflate_raw_and_zlib() {
    let data = b"This is the content. This is the content. This is the content.".to_vec();
    for framing in [Compression::Raw, Compression::Zlib] {
        let deflate = Deflate::new(framing, 1024);
        let compressed = deflate.deflate(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(deflate.inflate(&compressed).unwrap(), data);
    }

    // A zlib stream starts with the CMF byte 0x78, raw DEFLATE does not carry one.
    let zlib = Deflate::new(Compression::Zlib, 1024).deflate(&data).unwrap();
    assert_eq!(zlib[0], 0x78);
}

#[test]
fn test_inflate_limit() {
    let data = vec![0u8; 4096];
    let compressed = Deflate::new(Compression::Raw, 8192).deflate(&data).unwrap();
    assert!(Deflate::new(Compression::Raw, 4096).inflate(&compressed).is_ok());
    assert!(matches!(
        Deflate::new(Compression::Raw, 4095).inflate(&compressed),
        Err(HcertError::Decompress(_))
    ));
}

#[test]
fn test_inflate_garbage() {
    // Block type 0b11 is reserved.
    assert!(matches!(
        Deflate::default().inflate(&[0xff, 0xff, 0xff, 0xff]),
        Err(HcertError::Decompress(_))
    ));
}

#[test]
fn test_cbor_map_order_is_canonical() {
    let mut map = BTreeMap::new();
    map.insert(CborType::SignedInteger(-260), CborType::Integer(1));
    map.insert(CborType::Integer(6), CborType::Integer(2));
    map.insert(CborType::Integer(1), CborType::String("BG".to_string()));
    let bytes = CanonicalCbor.encode(&CborType::Map(map.clone()));
    // Shorter encodings first: 1, 6, then -260.
    assert_eq!(
        bytes,
        vec![0xa3, 0x01, 0x62, 0x42, 0x47, 0x06, 0x02, 0x39, 0x01, 0x03, 0x01]
    );
    assert_eq!(CanonicalCbor.decode(&bytes).unwrap(), CborType::Map(map));
}

#[test]
fn test_cbor_decode_text_and_tags() {
    // 18([h'a10126', {4: h'01'}, "text", [-1, null]])
    let bytes = [
        0xd2, 0x84, 0x43, 0xa1, 0x01, 0x26, 0xa1, 0x04, 0x41, 0x01, 0x64, 0x74, 0x65, 0x78, 0x74,
        0x82, 0x20, 0xf6,
    ];
    let mut unprotected = BTreeMap::new();
    unprotected.insert(CborType::Integer(4), CborType::Bytes(vec![0x01]));
    let expected = CborType::Tag(
        18,
        Box::new(CborType::Array(vec![
            CborType::Bytes(vec![0xa1, 0x01, 0x26]),
            CborType::Map(unprotected),
            CborType::String("text".to_string()),
            CborType::Array(vec![CborType::SignedInteger(-1), CborType::Null]),
        ])),
    );
    let decoded = CanonicalCbor.decode(&bytes).unwrap();
    assert_eq!(decoded, expected);
    assert_eq!(CanonicalCbor.encode(&decoded), bytes.to_vec());

    // Non-ASCII text survives the round trip.
    let name = CborType::String("Müller-Ñúñez".to_string());
    assert_eq!(
        CanonicalCbor.decode(&CanonicalCbor.encode(&name)).unwrap(),
        name
    );
}

#[test]
fn test_cbor_decode_rejects() {
    // 1.0 as a single-precision float.
    assert!(CanonicalCbor.decode(&[0xfa, 0x3f, 0x80, 0x00, 0x00]).is_err());
    // true
    assert!(CanonicalCbor.decode(&[0xf5]).is_err());
    // {1: 1, 1: 2}
    assert!(CanonicalCbor
        .decode(&[0xa2, 0x01, 0x01, 0x01, 0x02])
        .is_err());
    // A complete item followed by another byte.
    assert!(CanonicalCbor.decode(&[0x01, 0x02]).is_err());
    // -2^64 does not fit an i64.
    assert!(CanonicalCbor
        .decode(&[0x3b, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff])
        .is_err());
    // A text string announcing more bytes than there are.
    assert!(CanonicalCbor.decode(&[0x64, 0x74, 0x65]).is_err());
    assert!(CanonicalCbor.decode(&[]).is_err());
}

#[test]
fn test_config_from_json() {
    let config = EncoderConfig::from_json(r#"{"issuer": "AT", "version_prefix": "HC2"}"#).unwrap();
    assert_eq!(config.issuer, "AT");
    assert_eq!(config.version_prefix, HC2);
    assert_eq!(config.compression, Compression::Raw);

    let config = ValidatorConfig::from_json(
        r#"{"failure_policy": "continue-and-report", "compression": "zlib"}"#,
    )
    .unwrap();
    assert_eq!(config.failure_policy, FailurePolicy::ContinueAndReport);
    assert_eq!(config.compression, Compression::Zlib);
    assert!(config.check_validity_window);

    assert_eq!(ValidatorConfig::from_json("{}").unwrap(), ValidatorConfig::default());
}

#[test]
fn test_config_rejected() {
    assert!(matches!(
        EncoderConfig::from_json(r#"{"version_prefix": "HC1:"}"#),
        Err(HcertError::InvalidConfig(_))
    ));
    assert!(matches!(
        EncoderConfig::from_json(r#"{"issuer": ""}"#),
        Err(HcertError::InvalidConfig(_))
    ));
    assert!(matches!(
        ValidatorConfig::from_json(r#"{"max_inflated_len": 0}"#),
        Err(HcertError::InvalidConfig(_))
    ));
    assert!(matches!(
        ValidatorConfig::from_json(r#"{"prefix": "HC1"}"#),
        Err(HcertError::InvalidConfig(_))
    ));
}
