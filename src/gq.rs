//! GQ256: Guillou–Quisquater proof of knowledge of an RSA signature.
//!
//! The transform replaces the RS256 signature on a compact JWT with a
//! non-interactive proof that the signer knew a valid signature, without
//! revealing the signature itself. The OP's RSA public key still
//! authenticates the token; the raw signature can no longer be replayed
//! as an ordinary OIDC ID token.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::sha2::{Digest, Sha256};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::jwt;

/// Challenge length in bits.
pub const SECURITY_PARAMETER: usize = 256;

/// The only supported RSA public exponent.
const RSA_EXPONENT: u64 = 65537;

/// Wire form of a GQ256 signature section: the original protected header
/// (needed to re-derive the challenge) plus the proof pair.
#[derive(Debug, Serialize, Deserialize)]
struct GqProof {
    orig_hdr: String,
    #[serde(rename = "R")]
    r: String,
    #[serde(rename = "S")]
    s: String,
}

/// GQ256 signer and verifier bound to one RSA public key.
pub struct GqSignerVerifier {
    n: BigUint,
    v: BigUint,
    n_bytes: usize,
}

impl GqSignerVerifier {
    /// Bind to an RSA public key. The exponent must be 65537.
    pub fn new(key: &RsaPublicKey) -> Result<Self> {
        let v = key.e().clone();
        if v != BigUint::from(RSA_EXPONENT) {
            return Err(Error::UnsupportedAlgorithm(format!("RSA exponent {v}")));
        }
        let n = key.n().clone();
        let n_bytes = (n.bits() + 7) / 8;
        Ok(Self { n, v, n_bytes })
    }

    /// Replace the RS256 signature of `jwt` with a GQ proof.
    ///
    /// The output is a compact JWT with the same payload, `alg` rewritten
    /// to `GQ256`, and the original protected header preserved inside the
    /// signature section. The RSA signature must verify under this key;
    /// proofs over invalid signatures would be unverifiable anyway.
    pub fn sign_jwt(&self, token: &[u8]) -> Result<Vec<u8>> {
        let (header_b64, payload_b64, signature_b64) = jwt::split_compact(token)?;

        let header: serde_json::Map<String, Value> = jwt::parse_segment(header_b64)?;
        match header.get("alg") {
            Some(Value::String(alg)) if alg == "RS256" => {}
            Some(Value::String(alg)) => {
                return Err(Error::UnsupportedAlgorithm(alg.clone()));
            }
            _ => return Err(Error::MalformedToken("token header missing 'alg'".into())),
        }

        let q = BigUint::from_bytes_be(&jwt::decode_segment(signature_b64)?);
        let x = self.message_representative(header_b64, payload_b64)?;
        if q.modpow(&self.v, &self.n) != x {
            return Err(Error::SignatureInvalidOp);
        }

        let secret = self.random_below_modulus();
        let commitment = secret.modpow(&self.v, &self.n);
        let challenge = self.challenge(&commitment, &x);
        let response = (&secret * q.modpow(&challenge, &self.n)) % &self.n;

        let mut new_header: BTreeMap<String, Value> = header.into_iter().collect();
        new_header.insert("alg".into(), Value::String("GQ256".into()));
        let new_header_bytes = serde_json::to_vec(&new_header)
            .map_err(|e| Error::Internal(format!("failed to serialize GQ header: {e}")))?;
        let new_header_b64 = URL_SAFE_NO_PAD.encode(new_header_bytes);

        let proof = GqProof {
            orig_hdr: header_b64.to_string(),
            r: URL_SAFE_NO_PAD.encode(commitment.to_bytes_be()),
            s: URL_SAFE_NO_PAD.encode(response.to_bytes_be()),
        };
        let proof_bytes = serde_json::to_vec(&proof)
            .map_err(|e| Error::Internal(format!("failed to serialize GQ proof: {e}")))?;
        let proof_b64 = URL_SAFE_NO_PAD.encode(proof_bytes);

        Ok(format!("{new_header_b64}.{payload_b64}.{proof_b64}").into_bytes())
    }

    /// Verify the GQ proof carried by a GQ256 compact JWT.
    pub fn verify_jwt(&self, token: &[u8]) -> Result<()> {
        let (header_b64, payload_b64, signature_b64) = jwt::split_compact(token)?;

        let header: serde_json::Map<String, Value> = jwt::parse_segment(header_b64)?;
        match header.get("alg") {
            Some(Value::String(alg)) if alg == "GQ256" => {}
            Some(Value::String(alg)) => {
                return Err(Error::UnsupportedAlgorithm(alg.clone()));
            }
            _ => return Err(Error::MalformedToken("token header missing 'alg'".into())),
        }

        let proof: GqProof = jwt::parse_segment(signature_b64)?;

        let orig_header: serde_json::Map<String, Value> = jwt::parse_segment(&proof.orig_hdr)?;
        match orig_header.get("alg") {
            Some(Value::String(alg)) if alg == "RS256" => {}
            Some(Value::String(alg)) => {
                return Err(Error::UnsupportedAlgorithm(alg.clone()));
            }
            _ => {
                return Err(Error::MalformedToken(
                    "original token header missing 'alg'".into(),
                ))
            }
        }

        let x = self.message_representative(&proof.orig_hdr, payload_b64)?;

        let commitment = BigUint::from_bytes_be(&jwt::decode_segment(&proof.r)?);
        let response = BigUint::from_bytes_be(&jwt::decode_segment(&proof.s)?);
        if commitment == BigUint::from(0u32) || commitment >= self.n || response >= self.n {
            return Err(Error::MalformedToken("GQ proof values out of range".into()));
        }

        let challenge = self.challenge(&commitment, &x);
        let lhs = response.modpow(&self.v, &self.n);
        let rhs = (&commitment * x.modpow(&challenge, &self.n)) % &self.n;
        if lhs != rhs {
            return Err(Error::SignatureInvalidOp);
        }

        Ok(())
    }

    /// The EMSA-PKCS1-v1_5 representative of the signing input, as an
    /// integer modulo n.
    fn message_representative(&self, header_b64: &str, payload_b64: &str) -> Result<BigUint> {
        let digest = Sha256::digest(format!("{header_b64}.{payload_b64}").as_bytes());
        Ok(BigUint::from_bytes_be(&emsa_pkcs1_v15_sha256(
            &digest,
            self.n_bytes,
        )?))
    }

    /// Fiat–Shamir challenge: SHA-256 over the canonical n-length
    /// encodings of the commitment and the message representative.
    fn challenge(&self, commitment: &BigUint, x: &BigUint) -> BigUint {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes(commitment));
        hasher.update(self.canonical_bytes(x));
        BigUint::from_bytes_be(&hasher.finalize())
    }

    fn canonical_bytes(&self, value: &BigUint) -> Vec<u8> {
        let bytes = value.to_bytes_be();
        let mut out = vec![0u8; self.n_bytes - bytes.len()];
        out.extend_from_slice(&bytes);
        out
    }

    fn random_below_modulus(&self) -> BigUint {
        let mut buf = vec![0u8; self.n_bytes];
        loop {
            OsRng.fill_bytes(&mut buf);
            let candidate = BigUint::from_bytes_be(&buf);
            if candidate > BigUint::from(0u32) && candidate < self.n {
                return candidate;
            }
        }
    }
}

/// Recover the original (pre-transform) base64url protected header from a
/// GQ256 compact JWT.
pub fn original_jwt_headers(token: &[u8]) -> Result<String> {
    let (_, _, signature_b64) = jwt::split_compact(token)?;
    let proof: GqProof = jwt::parse_segment(signature_b64)?;
    Ok(proof.orig_hdr)
}

/// EMSA-PKCS1-v1_5 encoding of a SHA-256 digest (RFC 8017 section 9.2).
fn emsa_pkcs1_v15_sha256(digest: &[u8], em_len: usize) -> Result<Vec<u8>> {
    // DER DigestInfo prefix for SHA-256
    const DIGEST_INFO: [u8; 19] = [
        0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
        0x05, 0x00, 0x04, 0x20,
    ];

    let t_len = DIGEST_INFO.len() + digest.len();
    if em_len < t_len + 11 {
        return Err(Error::Internal(
            "RSA modulus too small for SHA-256 padding".into(),
        ));
    }

    let mut em = Vec::with_capacity(em_len);
    em.push(0x00);
    em.push(0x01);
    em.resize(em_len - t_len - 1, 0xff);
    em.push(0x00);
    em.extend_from_slice(&DIGEST_INFO);
    em.extend_from_slice(digest);
    Ok(em)
}
