//! The two CBOR maps a token carries: COSE headers and the CWT claims set holding the health
//! certificate.

use std::collections::BTreeMap;

use cbor::CborType;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::util::{as_i64, as_map, as_text, cbor_int, get_map_value, get_text_value};
use crate::HcertError;

pub const COSE_HEADER_ALG: i64 = 1;
pub const COSE_HEADER_KID: i64 = 4;

pub const CLAIM_ISS: i64 = 1;
pub const CLAIM_EXP: i64 = 4;
pub const CLAIM_IAT: i64 = 6;
pub const CLAIM_HCERT: i64 = -260;
/// Key of the certificate body inside the `hcert` claim.
pub const HCERT_BODY: i64 = 1;

/// A COSE header map. `alg` and `kid` are typed; any other entry is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    pub alg: Option<i64>,
    pub kid: Option<Vec<u8>>,
    pub other: BTreeMap<CborType, CborType>,
}

impl Header {
    pub fn protected(alg: i64) -> Header {
        Header {
            alg: Some(alg),
            ..Header::default()
        }
    }

    pub fn unprotected(kid: Vec<u8>) -> Header {
        Header {
            kid: Some(kid),
            ..Header::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.alg.is_none() && self.kid.is_none() && self.other.is_empty()
    }

    pub fn to_cbor(&self) -> CborType {
        let mut map = self.other.clone();
        if let Some(alg) = self.alg {
            map.insert(cbor_int(COSE_HEADER_ALG), cbor_int(alg));
        }
        if let Some(ref kid) = self.kid {
            map.insert(cbor_int(COSE_HEADER_KID), CborType::Bytes(kid.clone()));
        }
        CborType::Map(map)
    }

    pub fn from_map(map: &BTreeMap<CborType, CborType>) -> Result<Header, HcertError> {
        let mut other = map.clone();
        let alg = match other.remove(&cbor_int(COSE_HEADER_ALG)) {
            Some(value) => Some(as_i64(&value).ok_or_else(|| {
                HcertError::HeaderDecode("alg value is not an integer".to_string())
            })?),
            None => None,
        };
        let kid = match other.remove(&cbor_int(COSE_HEADER_KID)) {
            Some(CborType::Bytes(kid)) => Some(kid),
            Some(_) => {
                return Err(HcertError::HeaderDecode(
                    "kid value is not a byte string".to_string(),
                ))
            }
            None => None,
        };
        Ok(Header { alg, kid, other })
    }

    pub fn from_cbor(value: &CborType) -> Result<Header, HcertError> {
        let map = as_map(value)
            .ok_or_else(|| HcertError::HeaderDecode("header is not a map".to_string()))?;
        Header::from_map(map)
    }
}

/// The CWT claims set of a health certificate.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims {
    pub issuer: String,
    pub issued_at: i64,
    pub expires_at: i64,
    /// The certificate body, stored under `hcert[1]`.
    pub certificate: CborType,
}

impl Claims {
    pub fn to_cbor(&self) -> CborType {
        let mut hcert = BTreeMap::new();
        hcert.insert(cbor_int(HCERT_BODY), self.certificate.clone());

        let mut map = BTreeMap::new();
        map.insert(cbor_int(CLAIM_ISS), CborType::String(self.issuer.clone()));
        map.insert(cbor_int(CLAIM_IAT), cbor_int(self.issued_at));
        map.insert(cbor_int(CLAIM_EXP), cbor_int(self.expires_at));
        map.insert(cbor_int(CLAIM_HCERT), CborType::Map(hcert));
        CborType::Map(map)
    }

    pub fn from_cbor(value: &CborType) -> Result<Claims, HcertError> {
        let map = as_map(value)
            .ok_or_else(|| HcertError::PayloadDecode("claims are not a map".to_string()))?;
        let issuer = get_map_value(map, CLAIM_ISS)
            .and_then(as_text)
            .ok_or_else(|| HcertError::PayloadDecode("missing or invalid iss".to_string()))?
            .to_string();
        let issued_at = get_map_value(map, CLAIM_IAT)
            .and_then(as_i64)
            .ok_or_else(|| HcertError::PayloadDecode("missing or invalid iat".to_string()))?;
        let expires_at = get_map_value(map, CLAIM_EXP)
            .and_then(as_i64)
            .ok_or_else(|| HcertError::PayloadDecode("missing or invalid exp".to_string()))?;
        let certificate = get_map_value(map, CLAIM_HCERT)
            .and_then(as_map)
            .and_then(|hcert| get_map_value(hcert, HCERT_BODY))
            .ok_or_else(|| HcertError::PayloadDecode("missing hcert body".to_string()))?
            .clone();
        Ok(Claims {
            issuer,
            issued_at,
            expires_at,
            certificate,
        })
    }

    /// Whether `now` lies within `[iat, exp]`, bounds included.
    pub fn is_active_at(&self, now: i64) -> bool {
        self.issued_at <= now && now <= self.expires_at
    }

    /// The `nam` record of the certificate body.
    pub fn names(&self) -> Result<Names, HcertError> {
        let nam = self
            .body_field("nam")?
            .and_then(as_map)
            .ok_or_else(|| HcertError::PayloadDecode("missing nam record".to_string()))?;
        let field = |key: &str| -> Result<Option<String>, HcertError> {
            match get_text_value(nam, key) {
                None | Some(CborType::Null) => Ok(None),
                Some(value) => as_text(value).map(|s| Some(s.to_string())).ok_or_else(|| {
                    HcertError::PayloadDecode(format!("nam.{} is not a string", key))
                }),
            }
        };
        Ok(Names {
            family_name: field("fn")?,
            family_name_transliterated: field("fnt")?,
            given_name: field("gn")?,
            given_name_transliterated: field("gnt")?,
        })
    }

    /// The `dob` field of the certificate body.
    pub fn date_of_birth(&self) -> Result<NaiveDate, HcertError> {
        let dob = self
            .body_field("dob")?
            .and_then(as_text)
            .ok_or_else(|| HcertError::PayloadDecode("missing dob".to_string()))?;
        parse_date(dob)
            .ok_or_else(|| HcertError::PayloadDecode(format!("invalid dob {:?}", dob)))
    }

    fn body_field(&self, key: &str) -> Result<Option<&CborType>, HcertError> {
        let body = as_map(&self.certificate).ok_or_else(|| {
            HcertError::PayloadDecode("certificate body is not a map".to_string())
        })?;
        Ok(get_text_value(body, key))
    }
}

/// Accepts `yyyy-MM-dd`, optionally followed by a time part.
fn parse_date(text: &str) -> Option<NaiveDate> {
    let date = text.get(..10)?;
    if text.len() > 10 && !text[10..].starts_with('T') {
        return None;
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Person name: surname(s) and given name(s), plain and transliterated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Names {
    #[serde(rename = "fn", skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(rename = "fnt", skip_serializing_if = "Option::is_none")]
    pub family_name_transliterated: Option<String>,
    #[serde(rename = "gn", skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(rename = "gnt", skip_serializing_if = "Option::is_none")]
    pub given_name_transliterated: Option<String>,
}
