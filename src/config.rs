//! Encoder and validator settings.
//!
//! Both configurations deserialize from JSON with every field optional; missing fields take the
//! defaults below.

use serde::{Deserialize, Serialize};

use crate::HcertError;

/// Context prefix of version 1 health certificates.
pub const HC1: &str = "HC1";
/// Context prefix of version 2 health certificates.
pub const HC2: &str = "HC2";
/// Issuer written into `iss` unless configured otherwise.
pub const DEFAULT_ISSUER: &str = "BG";
/// Upper bound for the inflated envelope. Barcodes carry a few kilobytes at most.
pub const DEFAULT_MAX_INFLATED_LEN: usize = 64 * 1024;

/// Framing of the DEFLATE stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Raw DEFLATE (RFC 1951) without wrapping headers.
    #[default]
    Raw,
    /// DEFLATE wrapped in a zlib header and Adler-32 trailer (RFC 1950).
    Zlib,
}

/// What the validator does after a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop at the first failure.
    #[default]
    ShortCircuit,
    /// Keep going after a failed signature or validity check and report every error, together
    /// with whatever payload fields could be decoded. For diagnostic tooling.
    ContinueAndReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncoderConfig {
    pub issuer: String,
    pub version_prefix: String,
    pub compression: Compression,
}

impl Default for EncoderConfig {
    fn default() -> EncoderConfig {
        EncoderConfig {
            issuer: DEFAULT_ISSUER.to_string(),
            version_prefix: HC1.to_string(),
            compression: Compression::default(),
        }
    }
}

impl EncoderConfig {
    pub fn from_json(json: &str) -> Result<EncoderConfig, HcertError> {
        let config: EncoderConfig =
            serde_json::from_str(json).map_err(|e| HcertError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HcertError> {
        validate_prefix(&self.version_prefix)?;
        if self.issuer.is_empty() {
            return Err(HcertError::InvalidConfig("issuer must not be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidatorConfig {
    pub version_prefix: String,
    pub compression: Compression,
    pub failure_policy: FailurePolicy,
    /// Reject tokens whose `[iat, exp]` window does not contain the validation time.
    pub check_validity_window: bool,
    pub max_inflated_len: usize,
}

impl Default for ValidatorConfig {
    fn default() -> ValidatorConfig {
        ValidatorConfig {
            version_prefix: HC1.to_string(),
            compression: Compression::default(),
            failure_policy: FailurePolicy::default(),
            check_validity_window: true,
            max_inflated_len: DEFAULT_MAX_INFLATED_LEN,
        }
    }
}

impl ValidatorConfig {
    pub fn from_json(json: &str) -> Result<ValidatorConfig, HcertError> {
        let config: ValidatorConfig =
            serde_json::from_str(json).map_err(|e| HcertError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HcertError> {
        validate_prefix(&self.version_prefix)?;
        if self.max_inflated_len == 0 {
            return Err(HcertError::InvalidConfig(
                "max_inflated_len must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_prefix(prefix: &str) -> Result<(), HcertError> {
    if prefix.chars().count() != 3 || prefix.contains(':') {
        return Err(HcertError::InvalidConfig(format!(
            "version prefix must be 3 characters, got {:?}",
            prefix
        )));
    }
    Ok(())
}
