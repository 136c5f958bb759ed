//! Signer trait and the shipped ECDSA implementation.

use p256::ecdsa::signature::{Signer as _, Verifier as _};
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::rand_core::OsRng;

use crate::error::{Error, Result};
use crate::jwk::Jwk;

/// JWS signature algorithms this crate deals in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Es256,
    Rs256,
    Gq256,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Es256 => "ES256",
            Algorithm::Rs256 => "RS256",
            Algorithm::Gq256 => "GQ256",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ES256" => Ok(Algorithm::Es256),
            "RS256" => Ok(Algorithm::Rs256),
            "GQ256" => Ok(Algorithm::Gq256),
            other => Err(Error::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// The client's key pair, behind a signing capability.
///
/// The private key is owned by the implementation and never exposed;
/// everything else in the crate works with the public JWK. Implementations
/// may back this with keychains or hardware tokens.
pub trait Signer: Send + Sync {
    /// The JWS algorithm this key signs with.
    fn algorithm(&self) -> Algorithm;

    /// The public half as a JWK.
    fn public_jwk(&self) -> Jwk;

    /// Sign a raw message (the `header.payload` signing input).
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Software ES256 signer holding a P-256 key in memory.
pub struct EcdsaSigner {
    signing_key: SigningKey,
}

impl EcdsaSigner {
    /// Generate a signer with a fresh random key pair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Wrap an existing P-256 signing key.
    pub fn from_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    pub fn verifying_key(&self) -> &p256::ecdsa::VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl Signer for EcdsaSigner {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Es256
    }

    fn public_jwk(&self) -> Jwk {
        Jwk::from_p256(self.signing_key.verifying_key())
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let signature: p256::ecdsa::Signature = self.signing_key.sign(message);
        Ok(signature.to_bytes().to_vec())
    }
}

/// Verify a JWS signature under a public JWK for the given algorithm.
///
/// Returns `Ok(false)` for signatures that fail cryptographically or do not
/// parse; errors are reserved for unusable keys and unsupported algorithms.
pub fn verify_signature(jwk: &Jwk, alg: Algorithm, message: &[u8], signature: &[u8]) -> Result<bool> {
    match alg {
        Algorithm::Es256 => {
            let key = jwk.to_p256()?;
            let Ok(sig) = p256::ecdsa::Signature::from_slice(signature) else {
                return Ok(false);
            };
            Ok(key.verify(message, &sig).is_ok())
        }
        Algorithm::Rs256 => {
            use rsa::signature::Verifier as _;
            let key = rsa::pkcs1v15::VerifyingKey::<rsa::sha2::Sha256>::new(jwk.to_rsa()?);
            let Ok(sig) = rsa::pkcs1v15::Signature::try_from(signature) else {
                return Ok(false);
            };
            Ok(key.verify(message, &sig).is_ok())
        }
        // GQ proofs verify through the gq module, not a JWK
        Algorithm::Gq256 => Err(Error::UnsupportedAlgorithm("GQ256".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_roundtrip() {
        for alg in [Algorithm::Es256, Algorithm::Rs256, Algorithm::Gq256] {
            assert_eq!(alg.as_str().parse::<Algorithm>().unwrap(), alg);
        }
        assert!(matches!(
            "HS256".parse::<Algorithm>(),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = EcdsaSigner::generate();
        let message = b"header.payload";
        let sig = signer.sign(message).unwrap();

        assert!(verify_signature(&signer.public_jwk(), Algorithm::Es256, message, &sig).unwrap());
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let signer = EcdsaSigner::generate();
        let message = b"header.payload";
        let mut sig = signer.sign(message).unwrap();
        sig[0] ^= 0x01;

        assert!(!verify_signature(&signer.public_jwk(), Algorithm::Es256, message, &sig).unwrap());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let signer = EcdsaSigner::generate();
        let other = EcdsaSigner::generate();
        let message = b"header.payload";
        let sig = signer.sign(message).unwrap();

        assert!(!verify_signature(&other.public_jwk(), Algorithm::Es256, message, &sig).unwrap());
    }

    #[test]
    fn test_garbage_signature_bytes() {
        let signer = EcdsaSigner::generate();
        assert!(!verify_signature(&signer.public_jwk(), Algorithm::Es256, b"m", b"junk").unwrap());
    }

    #[test]
    fn test_signer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EcdsaSigner>();
    }
}
