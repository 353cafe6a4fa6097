//! Callback envelope parsing
//!
//! Encrypted callbacks arrive wrapped in an outer XML or JSON structure
//! whose only relevant field is the ciphertext. The parser is selected by
//! the tenant's configured data format; parsing always precedes any
//! decryption attempt.

use crate::config::DataFormat;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("invalid XML envelope: {0}")]
    Xml(String),
    #[error("invalid JSON envelope: {0}")]
    Json(String),
    #[error("data format {0:?} does not carry an encrypted envelope")]
    UnsupportedFormat(DataFormat),
}

/// Outer envelope of an encrypted callback.
///
/// XML: `<xml><Encrypt><![CDATA[...]]></Encrypt></xml>`
/// JSON: `{"Encrypt": "..."}`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EncryptedEnvelope {
    pub encrypt: String,
}

/// Parse a callback body into an envelope per the tenant's data format
pub fn parse(format: DataFormat, body: &[u8]) -> Result<EncryptedEnvelope, EnvelopeError> {
    match format {
        DataFormat::Xml => {
            let text =
                std::str::from_utf8(body).map_err(|e| EnvelopeError::Xml(e.to_string()))?;
            quick_xml::de::from_str(text).map_err(|e| EnvelopeError::Xml(e.to_string()))
        }
        DataFormat::Json => {
            serde_json::from_slice(body).map_err(|e| EnvelopeError::Json(e.to_string()))
        }
        DataFormat::Raw => Err(EnvelopeError::UnsupportedFormat(format)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_xml_envelope() {
        let body = b"<xml><Encrypt><![CDATA[c2VhbGVk]]></Encrypt></xml>";
        let envelope = parse(DataFormat::Xml, body).unwrap();
        assert_eq!(envelope.encrypt, "c2VhbGVk");
    }

    #[test]
    fn test_parse_xml_without_cdata() {
        let body = b"<xml><Encrypt>c2VhbGVk</Encrypt></xml>";
        let envelope = parse(DataFormat::Xml, body).unwrap();
        assert_eq!(envelope.encrypt, "c2VhbGVk");
    }

    #[test]
    fn test_parse_json_envelope() {
        let body = br#"{"Encrypt": "c2VhbGVk"}"#;
        let envelope = parse(DataFormat::Json, body).unwrap();
        assert_eq!(envelope.encrypt, "c2VhbGVk");
    }

    #[test]
    fn test_parse_rejects_malformed_bodies() {
        assert!(matches!(
            parse(DataFormat::Xml, b"not xml at all"),
            Err(EnvelopeError::Xml(_))
        ));
        assert!(matches!(
            parse(DataFormat::Json, b"{\"Encrypt\": 42}"),
            Err(EnvelopeError::Json(_))
        ));
        assert!(matches!(
            parse(DataFormat::Json, b"{}"),
            Err(EnvelopeError::Json(_))
        ));
    }

    #[test]
    fn test_raw_format_has_no_envelope() {
        assert!(matches!(
            parse(DataFormat::Raw, b"anything"),
            Err(EnvelopeError::UnsupportedFormat(DataFormat::Raw))
        ));
    }
}
