//! JWK Thumbprint computation (RFC 7638).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};

use crate::jwk::Jwk;

/// Compute the RFC 7638 thumbprint of a public JWK.
///
/// The thumbprint is SHA-256 over the canonical JSON containing only the
/// required members, in lexicographic order: `{crv,kty,x,y}` for EC keys,
/// `{e,kty,n}` for RSA keys.
pub fn compute_thumbprint(jwk: &Jwk) -> String {
    let canonical = match jwk {
        Jwk::Ec { crv, x, y } => {
            format!(r#"{{"crv":"{crv}","kty":"EC","x":"{x}","y":"{y}"}}"#)
        }
        Jwk::Rsa { n, e } => {
            format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#)
        }
    };

    let hash = Sha256::digest(canonical.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::SigningKey;
    use p256::elliptic_curve::rand_core::OsRng;

    #[test]
    fn test_thumbprint_is_deterministic() {
        let key = SigningKey::random(&mut OsRng);
        let jwk = Jwk::from_p256(key.verifying_key());

        assert_eq!(compute_thumbprint(&jwk), compute_thumbprint(&jwk));
    }

    #[test]
    fn test_thumbprint_format() {
        let key = SigningKey::random(&mut OsRng);
        let thumb = compute_thumbprint(&Jwk::from_p256(key.verifying_key()));

        // SHA-256 = 32 bytes = 43 base64url chars (no padding)
        assert_eq!(thumb.len(), 43);
        assert!(thumb
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_different_keys_different_thumbprints() {
        let key1 = SigningKey::random(&mut OsRng);
        let key2 = SigningKey::random(&mut OsRng);

        assert_ne!(
            compute_thumbprint(&Jwk::from_p256(key1.verifying_key())),
            compute_thumbprint(&Jwk::from_p256(key2.verifying_key()))
        );
    }

    #[test]
    fn test_rfc7638_vector() {
        // Test vector from RFC 7638 section 3.1
        let jwk = Jwk::Rsa {
            n: "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw".to_string(),
            e: "AQAB".to_string(),
        };

        assert_eq!(
            compute_thumbprint(&jwk),
            "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs"
        );
    }
}
