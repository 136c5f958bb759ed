//! Client Instance Claims: the protected header binding the user's key
//! into the OP's identity token.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::crypto::{Algorithm, Signer};
use crate::error::{Error, Result};
use crate::jwk::Jwk;
use crate::jwt;

/// Claim names owned by the protocol; extra claims may not shadow them.
const RESERVED_CLAIMS: [&str; 3] = ["alg", "upk", "rz"];

/// Length in bytes of the `rz` random salt.
const RZ_LENGTH: usize = 32;

/// Client Instance Claims.
///
/// Hashing the canonical serialization of these claims yields the
/// commitment placed in the ID token's commitment claim, so any change to
/// a member (including the salt) produces a different identity binding.
#[derive(Debug, Clone, PartialEq)]
pub struct CicClaims {
    alg: Algorithm,
    upk: Jwk,
    rz: String,
    extra: BTreeMap<String, Value>,
}

impl CicClaims {
    /// Build claims for a user public key, with a fresh random salt.
    ///
    /// `extra` entries become additional protected-header claims; the
    /// reserved names `alg`, `upk` and `rz` are rejected.
    pub fn new(upk: Jwk, alg: Algorithm, extra: BTreeMap<String, Value>) -> Result<Self> {
        for reserved in RESERVED_CLAIMS {
            if extra.contains_key(reserved) {
                return Err(Error::Internal(format!(
                    "extra claim '{reserved}' collides with a reserved CIC claim"
                )));
            }
        }

        let mut salt = [0u8; RZ_LENGTH];
        OsRng.fill_bytes(&mut salt);

        Ok(Self {
            alg,
            upk,
            rz: URL_SAFE_NO_PAD.encode(salt),
            extra,
        })
    }

    /// Reconstruct claims from a parsed CIC protected header.
    pub(crate) fn from_header(mut header: serde_json::Map<String, Value>) -> Result<Self> {
        let alg = match header.remove("alg") {
            Some(Value::String(s)) => s.parse()?,
            _ => return Err(Error::MalformedToken("CIC header missing 'alg'".into())),
        };
        let upk = match header.remove("upk") {
            Some(value) => serde_json::from_value(value)
                .map_err(|_| Error::MalformedToken("CIC header 'upk' is not a valid JWK".into()))?,
            None => return Err(Error::MalformedToken("CIC header missing 'upk'".into())),
        };
        let rz = match header.remove("rz") {
            Some(Value::String(s)) => s,
            _ => return Err(Error::MalformedToken("CIC header missing 'rz'".into())),
        };

        Ok(Self {
            alg,
            upk,
            rz,
            extra: header.into_iter().collect(),
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.alg
    }

    pub fn public_key(&self) -> &Jwk {
        &self.upk
    }

    pub fn rz(&self) -> &str {
        &self.rz
    }

    pub fn extra_claims(&self) -> &BTreeMap<String, Value> {
        &self.extra
    }

    /// The full protected header, keyed in canonical (lexicographic) order.
    pub fn header(&self) -> Result<BTreeMap<String, Value>> {
        let mut header = self.extra.clone();
        header.insert("alg".into(), Value::String(self.alg.as_str().into()));
        header.insert(
            "upk".into(),
            serde_json::to_value(&self.upk)
                .map_err(|e| Error::Internal(format!("failed to serialize upk: {e}")))?,
        );
        header.insert("rz".into(), Value::String(self.rz.clone()));
        Ok(header)
    }

    /// The commitment: base64url(SHA-256(canonical header JSON)).
    pub fn hash(&self) -> Result<String> {
        let canonical = serde_json::to_vec(&self.header()?)
            .map_err(|e| Error::Internal(format!("failed to serialize CIC header: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(canonical)))
    }

    /// Sign over the payload of the given ID token, producing the compact
    /// JWS `b64(cic_hdr).b64(payload).b64(sig)`.
    ///
    /// The payload segment of the ID token is reused verbatim so the CIC
    /// section and the OP section of a PK Token stay byte-identical.
    pub fn sign(&self, signer: &dyn Signer, id_token: &[u8]) -> Result<Vec<u8>> {
        if signer.algorithm() != self.alg {
            return Err(Error::Internal(format!(
                "signer algorithm {} does not match declared CIC algorithm {}",
                signer.algorithm(),
                self.alg
            )));
        }

        let (_, payload_b64, _) = jwt::split_compact(id_token)?;

        let header = serde_json::to_vec(&self.header()?)
            .map_err(|e| Error::Internal(format!("failed to serialize CIC header: {e}")))?;
        let header_b64 = URL_SAFE_NO_PAD.encode(header);

        let signing_input = format!("{header_b64}.{payload_b64}");
        let signature = signer.sign(signing_input.as_bytes())?;

        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)).into_bytes())
    }
}
