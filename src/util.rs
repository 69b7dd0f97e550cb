use std::collections::BTreeMap;

use cbor::CborType;
use serde_json::{Map, Number, Value};

use crate::HcertError;

/// Build the CBOR representation of an integer map label or value.
pub fn cbor_int(value: i64) -> CborType {
    if value < 0 {
        CborType::SignedInteger(value)
    } else {
        CborType::Integer(value as u64)
    }
}

/// Read a CBOR integer as `i64`, if it is one and fits.
pub fn as_i64(value: &CborType) -> Option<i64> {
    match *value {
        CborType::Integer(v) if v <= i64::MAX as u64 => Some(v as i64),
        CborType::SignedInteger(v) => Some(v),
        _ => None,
    }
}

pub fn get_map_value<'a>(map: &'a BTreeMap<CborType, CborType>, key: i64) -> Option<&'a CborType> {
    map.get(&cbor_int(key))
}

pub fn get_text_value<'a>(
    map: &'a BTreeMap<CborType, CborType>,
    key: &str,
) -> Option<&'a CborType> {
    map.get(&CborType::String(key.to_string()))
}

pub fn as_map(value: &CborType) -> Option<&BTreeMap<CborType, CborType>> {
    match *value {
        CborType::Map(ref map) => Some(map),
        _ => None,
    }
}

pub fn as_text(value: &CborType) -> Option<&str> {
    match *value {
        CborType::String(ref s) => Some(s),
        _ => None,
    }
}

/// Map a JSON document onto CBOR. Objects become maps with text keys.
///
/// Only the data model of the clinical payload is supported: no floating point or boolean
/// values.
pub fn json_to_cbor(value: &Value) -> Result<CborType, HcertError> {
    match *value {
        Value::Null => Ok(CborType::Null),
        Value::String(ref s) => Ok(CborType::String(s.clone())),
        Value::Number(ref n) => {
            if let Some(u) = n.as_u64() {
                Ok(CborType::Integer(u))
            } else if let Some(i) = n.as_i64() {
                Ok(CborType::SignedInteger(i))
            } else {
                Err(HcertError::PayloadFormat(format!(
                    "floating point value {} is not supported",
                    n
                )))
            }
        }
        Value::Bool(b) => Err(HcertError::PayloadFormat(format!(
            "boolean value {} is not supported",
            b
        ))),
        Value::Array(ref items) => items
            .iter()
            .map(json_to_cbor)
            .collect::<Result<Vec<_>, _>>()
            .map(CborType::Array),
        Value::Object(ref fields) => {
            let mut map = BTreeMap::new();
            for (key, field) in fields {
                map.insert(CborType::String(key.clone()), json_to_cbor(field)?);
            }
            Ok(CborType::Map(map))
        }
    }
}

/// Render CBOR as JSON for display. Byte strings become lowercase hex, non-text map keys are
/// rendered through their integer value.
pub fn cbor_to_json(value: &CborType) -> Value {
    match *value {
        CborType::Integer(v) => Value::Number(Number::from(v)),
        CborType::SignedInteger(v) => Value::Number(Number::from(v)),
        CborType::Bytes(ref b) => Value::String(hex::encode(b)),
        CborType::String(ref s) => Value::String(s.clone()),
        CborType::Array(ref items) => Value::Array(items.iter().map(cbor_to_json).collect()),
        CborType::Map(ref map) => {
            let mut fields = Map::new();
            for (key, field) in map {
                let key = match as_text(key) {
                    Some(text) => text.to_string(),
                    None => match as_i64(key) {
                        Some(i) => i.to_string(),
                        None => cbor_to_json(key).to_string(),
                    },
                };
                fields.insert(key, cbor_to_json(field));
            }
            Value::Object(fields)
        }
        CborType::Tag(tag, ref inner) => {
            let mut fields = Map::new();
            fields.insert("tag".to_string(), Value::Number(Number::from(tag)));
            fields.insert("value".to_string(), cbor_to_json(inner));
            Value::Object(fields)
        }
        _ => Value::Null,
    }
}
