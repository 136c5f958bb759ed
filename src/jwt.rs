//! Compact JWS handling: splitting, segment decoding, and claim extraction.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Split a compact JWS into its three base64url segments.
///
/// Signing inputs in this crate are always `header.payload`; detached
/// payloads are not supported, so all three segments must be non-empty.
pub fn split_compact(token: &[u8]) -> Result<(&str, &str, &str)> {
    let token = std::str::from_utf8(token)
        .map_err(|_| Error::MalformedToken("token is not valid UTF-8".into()))?;

    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(hdr), Some(payload), Some(sig), None)
            if !hdr.is_empty() && !payload.is_empty() && !sig.is_empty() =>
        {
            Ok((hdr, payload, sig))
        }
        _ => Err(Error::MalformedToken(
            "expected three non-empty dot-separated segments".into(),
        )),
    }
}

/// Decode a base64url (no padding) segment to raw bytes.
pub fn decode_segment(segment: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| Error::MalformedToken(format!("invalid base64url segment: {e}")))
}

/// Encode raw bytes as a base64url (no padding) segment.
pub fn encode_segment(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode and JSON-parse a base64url segment.
pub fn parse_segment<T: DeserializeOwned>(segment: &str) -> Result<T> {
    let bytes = decode_segment(segment)?;
    serde_json::from_slice(&bytes).map_err(|e| Error::MalformedToken(format!("invalid JSON segment: {e}")))
}

/// Extract a claim from the payload of a compact JWS as a string.
///
/// Fails if the claim is missing or not a string, except for `aud`, which
/// is also accepted as a JSON array of strings and canonicalized to a
/// comma-joined string.
pub fn extract_claim(token: &[u8], name: &str) -> Result<String> {
    let (_, payload_b64, _) = split_compact(token)?;
    let payload: serde_json::Map<String, Value> = parse_segment(payload_b64)?;

    let value = payload
        .get(name)
        .ok_or_else(|| Error::MalformedToken(format!("claim '{name}' missing from payload")))?;

    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Array(items) if name == "aud" => {
            let mut joined = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => joined.push(s.as_str()),
                    _ => {
                        return Err(Error::MalformedToken(
                            "claim 'aud' array contains a non-string entry".into(),
                        ))
                    }
                }
            }
            Ok(joined.join(","))
        }
        _ => Err(Error::MalformedToken(format!(
            "expected claim '{name}' to be a string"
        ))),
    }
}

/// Audience claim, which OIDC allows as a string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    /// Canonical form used for comparisons: the comma-join of all entries.
    pub fn canonical(&self) -> String {
        match self {
            Audience::Single(s) => s.clone(),
            Audience::Multiple(v) => v.join(","),
        }
    }

    pub fn contains(&self, value: &str) -> bool {
        match self {
            Audience::Single(s) => s == value,
            Audience::Multiple(v) => v.iter().any(|s| s == value),
        }
    }
}

/// Standard OIDC ID token claims used by this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Audience,
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
}

impl OidcClaims {
    /// Parse claims from the payload of a compact JWS (without validation).
    pub fn from_token(token: &[u8]) -> Result<Self> {
        let (_, payload_b64, _) = split_compact(token)?;
        parse_segment(payload_b64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with_payload(payload: &str) -> Vec<u8> {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(payload);
        format!("{header}.{payload}.c2ln").into_bytes()
    }

    #[test]
    fn test_split_compact() {
        let token = token_with_payload(r#"{"sub":"u1"}"#);
        let (hdr, payload, sig) = split_compact(&token).unwrap();
        assert!(!hdr.is_empty());
        assert!(!payload.is_empty());
        assert_eq!(sig, "c2ln");
    }

    #[test]
    fn test_split_rejects_wrong_segment_count() {
        assert!(matches!(
            split_compact(b"only.two"),
            Err(Error::MalformedToken(_))
        ));
        assert!(matches!(
            split_compact(b"a.b.c.d"),
            Err(Error::MalformedToken(_))
        ));
        assert!(matches!(
            split_compact(b"a..c"),
            Err(Error::MalformedToken(_))
        ));
    }

    #[test]
    fn test_extract_string_claim() {
        let token = token_with_payload(r#"{"iss":"https://op.example","sub":"u1"}"#);
        assert_eq!(extract_claim(&token, "iss").unwrap(), "https://op.example");
    }

    #[test]
    fn test_extract_missing_claim() {
        let token = token_with_payload(r#"{"sub":"u1"}"#);
        assert!(matches!(
            extract_claim(&token, "nonce"),
            Err(Error::MalformedToken(_))
        ));
    }

    #[test]
    fn test_extract_aud_string_and_array() {
        let token = token_with_payload(r#"{"aud":"client-1"}"#);
        assert_eq!(extract_claim(&token, "aud").unwrap(), "client-1");

        let token = token_with_payload(r#"{"aud":["client-1","client-2"]}"#);
        assert_eq!(extract_claim(&token, "aud").unwrap(), "client-1,client-2");
    }

    #[test]
    fn test_extract_non_string_claim_rejected() {
        let token = token_with_payload(r#"{"exp":12345}"#);
        assert!(matches!(
            extract_claim(&token, "exp"),
            Err(Error::MalformedToken(_))
        ));
    }

    #[test]
    fn test_oidc_claims_audience_forms() {
        let token = token_with_payload(
            r#"{"iss":"https://op.example","sub":"u1","aud":["a","b"],"exp":9999999999,"iat":1}"#,
        );
        let claims = OidcClaims::from_token(&token).unwrap();
        assert_eq!(claims.aud.canonical(), "a,b");
        assert!(claims.aud.contains("b"));
        assert!(!claims.aud.contains("c"));
    }

    #[test]
    fn test_parse_segment_rejects_padding() {
        // URL_SAFE_NO_PAD rejects '=' padding outright
        assert!(decode_segment("eyJh=").is_err());
    }
}
