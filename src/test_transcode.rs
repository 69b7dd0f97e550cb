use proptest::prelude::*;

use crate::transcode::{concat_to_der, der_to_concat, TranscodeError};

const FIELD_LEN: usize = 32;

fn concat_of(r: u8, s: u8) -> Vec<u8> {
    let mut concat = vec![r; FIELD_LEN];
    concat.extend_from_slice(&[s; FIELD_LEN]);
    concat
}

#[test]
fn test_all_zero_fields() {
    let concat = vec![0u8; 2 * FIELD_LEN];
    let der = concat_to_der(&concat, FIELD_LEN).unwrap();
    assert_eq!(der, vec![0x30, 0x06, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00]);
    assert_eq!(der_to_concat(&der, FIELD_LEN).unwrap(), concat);
}

#[test]
fn test_high_bit_is_padded() {
    let concat = concat_of(0x80, 0x01);
    let der = concat_to_der(&concat, FIELD_LEN).unwrap();
    // r gets a 0x00 pad byte, s does not.
    assert_eq!(&der[..5], &[0x30, 0x45, 0x02, 0x21, 0x00]);
    assert_eq!(der[5], 0x80);
    assert_eq!(&der[2 + 2 + 33..2 + 2 + 33 + 2], &[0x02, 0x20]);
    assert_eq!(der.len(), 2 + 35 + 34);
    assert_eq!(der_to_concat(&der, FIELD_LEN).unwrap(), concat);
}

#[test]
fn test_leading_zeros_are_stripped() {
    let mut concat = vec![0u8; 2 * FIELD_LEN];
    concat[FIELD_LEN - 1] = 0x05;
    concat[2 * FIELD_LEN - 2] = 0x7f;
    concat[2 * FIELD_LEN - 1] = 0xff;
    let der = concat_to_der(&concat, FIELD_LEN).unwrap();
    assert_eq!(
        der,
        vec![0x30, 0x07, 0x02, 0x01, 0x05, 0x02, 0x02, 0x7f, 0xff]
    );
    assert_eq!(der_to_concat(&der, FIELD_LEN).unwrap(), concat);
}

#[test]
fn test_long_form_sequence_length() {
    // P-256 signatures always fit the short form; a P-521 sized field does not.
    let field_len = 66;
    let concat = vec![0xffu8; 2 * field_len];
    let der = concat_to_der(&concat, field_len).unwrap();
    assert_eq!(&der[..3], &[0x30, 0x81, 2 * (2 + 67)]);
    assert_eq!(der_to_concat(&der, field_len).unwrap(), concat);
}

#[test]
fn test_concat_wrong_length() {
    assert_eq!(
        concat_to_der(&[1u8; 63], FIELD_LEN),
        Err(TranscodeError::InvalidLength {
            expected: 64,
            actual: 63
        })
    );
}

#[test]
fn test_malformed_der() {
    assert_eq!(der_to_concat(&[], FIELD_LEN), Err(TranscodeError::MissingSequence));
    assert_eq!(
        der_to_concat(&[0x31, 0x06, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00], FIELD_LEN),
        Err(TranscodeError::MissingSequence)
    );
    assert_eq!(der_to_concat(&[0x30], FIELD_LEN), Err(TranscodeError::Truncated));
    assert_eq!(
        der_to_concat(&[0x30, 0x06, 0x02, 0x01, 0x00], FIELD_LEN),
        Err(TranscodeError::Truncated)
    );
    assert_eq!(
        der_to_concat(&[0x30, 0x06, 0x04, 0x01, 0x00, 0x02, 0x01, 0x00], FIELD_LEN),
        Err(TranscodeError::MissingInteger(2))
    );
    assert_eq!(
        der_to_concat(&[0x30, 0x06, 0x02, 0x09, 0x00, 0x02, 0x01, 0x00], FIELD_LEN),
        Err(TranscodeError::LengthMismatch)
    );
    assert_eq!(
        der_to_concat(&[0x30, 0x85, 0x00, 0x00, 0x00, 0x00, 0x06], FIELD_LEN),
        Err(TranscodeError::UnsupportedLength)
    );
}

#[test]
fn test_der_lengths_must_line_up() {
    let der = concat_to_der(&concat_of(0x11, 0x22), FIELD_LEN).unwrap();

    // Bytes after the SEQUENCE.
    let mut trailing = der.clone();
    trailing.push(0x00);
    assert_eq!(
        der_to_concat(&trailing, FIELD_LEN),
        Err(TranscodeError::LengthMismatch)
    );

    // The SEQUENCE claims more content than its two INTEGERs use.
    let mut padded = der.clone();
    padded[1] += 2;
    padded.extend_from_slice(&[0x05, 0x00]);
    assert_eq!(
        der_to_concat(&padded, FIELD_LEN),
        Err(TranscodeError::LengthMismatch)
    );

    // A shortened SEQUENCE leaves the last byte of s outside it.
    let mut short = der.clone();
    short[1] -= 1;
    assert_eq!(
        der_to_concat(&short, FIELD_LEN),
        Err(TranscodeError::LengthMismatch)
    );
}

#[test]
fn test_zero_field_len_is_rejected() {
    let der = concat_to_der(&concat_of(0x01, 0x02), FIELD_LEN).unwrap();
    assert_eq!(
        der_to_concat(&der, 0),
        Err(TranscodeError::InvalidLength {
            expected: 0,
            actual: der.len()
        })
    );
    assert!(concat_to_der(&[], 0).is_err());
}

#[test]
fn test_signer_output() {
    let identity = crate::test_setup::p256_identity();
    let der = crate::crypto::Signer::sign(&identity.signer, b"This is the content.").unwrap();
    let concat = der_to_concat(&der, FIELD_LEN).unwrap();
    assert_eq!(concat.len(), 64);
    assert_eq!(concat_to_der(&concat, FIELD_LEN).unwrap(), der);
}

proptest! {
    #[test]
    fn test_round_trip(concat in proptest::collection::vec(any::<u8>(), 64)) {
        let der = concat_to_der(&concat, FIELD_LEN).unwrap();
        prop_assert_eq!(der_to_concat(&der, FIELD_LEN).unwrap(), concat);
    }

    #[test]
    fn test_der_parser_does_not_panic(
        der in proptest::collection::vec(any::<u8>(), 0..80),
        field_len in 0usize..40,
    ) {
        let _ = der_to_concat(&der, field_len);
    }
}
