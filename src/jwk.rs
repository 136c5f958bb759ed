//! JSON Web Key types: the user's public key, OP keys, and JWKS documents.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use p256::ecdsa::VerifyingKey;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A public JSON Web Key, tagged by key type.
///
/// EC keys are P-256 (the client key algorithm shipped with this crate);
/// RSA keys are what OPs publish for RS256 ID token signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    #[serde(rename = "EC")]
    Ec { crv: String, x: String, y: String },
    #[serde(rename = "RSA")]
    Rsa { n: String, e: String },
}

impl Jwk {
    /// Build an EC JWK from a P-256 verifying key.
    pub fn from_p256(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        // SAFETY: Uncompressed points always have x,y coordinates
        let x = URL_SAFE_NO_PAD.encode(point.x().expect("uncompressed point has x"));
        let y = URL_SAFE_NO_PAD.encode(point.y().expect("uncompressed point has y"));
        Jwk::Ec {
            crv: "P-256".to_string(),
            x,
            y,
        }
    }

    /// Build an RSA JWK from an RSA public key.
    pub fn from_rsa(key: &RsaPublicKey) -> Self {
        use rsa::traits::PublicKeyParts;
        Jwk::Rsa {
            n: URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
        }
    }

    /// Convert to a P-256 verifying key.
    pub fn to_p256(&self) -> Result<VerifyingKey> {
        match self {
            Jwk::Ec { crv, x, y } => {
                if crv != "P-256" {
                    return Err(Error::UnsupportedAlgorithm(format!("EC curve {crv}")));
                }
                let x = decode_coordinate(x)?;
                let y = decode_coordinate(y)?;

                // Uncompressed SEC1 point: 0x04 || x || y
                let mut point = Vec::with_capacity(1 + x.len() + y.len());
                point.push(0x04);
                point.extend_from_slice(&x);
                point.extend_from_slice(&y);

                VerifyingKey::from_sec1_bytes(&point)
                    .map_err(|_| Error::MalformedToken("invalid P-256 public key".into()))
            }
            Jwk::Rsa { .. } => Err(Error::UnsupportedAlgorithm(
                "expected EC JWK, got RSA".into(),
            )),
        }
    }

    /// Convert to an RSA public key.
    pub fn to_rsa(&self) -> Result<RsaPublicKey> {
        match self {
            Jwk::Rsa { n, e } => {
                let n = BigUint::from_bytes_be(&decode_coordinate(n)?);
                let e = BigUint::from_bytes_be(&decode_coordinate(e)?);
                RsaPublicKey::new(n, e)
                    .map_err(|_| Error::MalformedToken("invalid RSA public key".into()))
            }
            Jwk::Ec { .. } => Err(Error::UnsupportedAlgorithm(
                "expected RSA JWK, got EC".into(),
            )),
        }
    }
}

fn decode_coordinate(value: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| Error::MalformedToken("invalid base64url in JWK member".into()))
}

/// One entry of a JWKS document: key material plus its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub public_use: Option<String>,
    #[serde(flatten)]
    pub key: Jwk,
}

/// A JWKS document as published at an issuer's `jwks_uri`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<JwkEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::SigningKey;
    use p256::elliptic_curve::rand_core::OsRng;

    #[test]
    fn test_ec_jwk_roundtrip() {
        let signing_key = SigningKey::random(&mut OsRng);
        let jwk = Jwk::from_p256(signing_key.verifying_key());

        let recovered = jwk.to_p256().unwrap();
        assert_eq!(&recovered, signing_key.verifying_key());
    }

    #[test]
    fn test_ec_jwk_serde() {
        let signing_key = SigningKey::random(&mut OsRng);
        let jwk = Jwk::from_p256(signing_key.verifying_key());

        let json = serde_json::to_string(&jwk).unwrap();
        assert!(json.contains(r#""kty":"EC""#));
        assert!(json.contains(r#""crv":"P-256""#));

        let parsed: Jwk = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, jwk);
    }

    #[test]
    fn test_rsa_jwk_roundtrip() {
        let key = rsa::RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 2048).unwrap();
        let public = key.to_public_key();
        let jwk = Jwk::from_rsa(&public);

        let recovered = jwk.to_rsa().unwrap();
        assert_eq!(recovered, public);
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let signing_key = SigningKey::random(&mut OsRng);
        let jwk = Jwk::from_p256(signing_key.verifying_key());
        assert!(matches!(
            jwk.to_rsa(),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_jwks_document_parse() {
        let doc = r#"{"keys":[{"kid":"k1","alg":"RS256","use":"sig","kty":"RSA","n":"AQAB","e":"AQAB"}]}"#;
        let set: JwkSet = serde_json::from_str(doc).unwrap();
        assert_eq!(set.keys.len(), 1);
        assert_eq!(set.keys[0].kid.as_deref(), Some("k1"));
        assert!(matches!(set.keys[0].key, Jwk::Rsa { .. }));
    }
}
