//! The PK Token: a three-signature credential over a shared payload.
//!
//! The OP section carries the identity assertion (RS256 or GQ256), the CIC
//! section carries the client's signature under the user key embedded in
//! its header, and the optional cosigner section carries an MFA
//! attestation. All three sections share one payload: the ID token payload.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::cic::CicClaims;
use crate::crypto::{self, thumbprint::compute_thumbprint, Algorithm};
use crate::error::{Error, Result};
use crate::jwk::Jwk;
use crate::jwt;

/// The three signature sections of a PK Token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Op,
    Cic,
    Cos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    protected: String,
    signature: String,
}

/// A PK Token.
///
/// Immutable after construction except for [`PkToken::add_jkt_header`] and
/// [`PkToken::attach_cosigner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkToken {
    payload: String,
    op: Section,
    cic: Section,
    cos: Option<Section>,
}

#[derive(Serialize, Deserialize)]
struct WireSection {
    protected: String,
    payload: String,
    signature: String,
}

#[derive(Serialize, Deserialize)]
struct WireToken {
    op: WireSection,
    cic: WireSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cos: Option<WireSection>,
}

impl PkToken {
    /// Combine an ID token and a CIC compact JWS into a PK Token.
    ///
    /// The payload segments of the two inputs must be byte-identical.
    pub fn new(id_token: &[u8], cic_jws: &[u8]) -> Result<Self> {
        let (op_header, op_payload, op_signature) = jwt::split_compact(id_token)?;
        let (cic_header, cic_payload, cic_signature) = jwt::split_compact(cic_jws)?;

        if op_payload != cic_payload {
            return Err(Error::MalformedToken(
                "ID token and CIC payloads differ".into(),
            ));
        }

        // both protected headers must be JSON objects
        let _: serde_json::Map<String, Value> = jwt::parse_segment(op_header)?;
        let _: serde_json::Map<String, Value> = jwt::parse_segment(cic_header)?;

        Ok(Self {
            payload: op_payload.to_string(),
            op: Section {
                protected: op_header.to_string(),
                signature: op_signature.to_string(),
            },
            cic: Section {
                protected: cic_header.to_string(),
                signature: cic_signature.to_string(),
            },
            cos: None,
        })
    }

    /// Parse a PK Token from its JSON wire form.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::MalformedToken(e.to_string()))
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Internal(format!("serialization failed: {e}")))
    }

    /// The shared payload, as its base64url segment.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// The compact JWS view `protected.payload.signature` of one section.
    pub fn compact(&self, kind: SectionKind) -> Result<Vec<u8>> {
        let section = match kind {
            SectionKind::Op => &self.op,
            SectionKind::Cic => &self.cic,
            SectionKind::Cos => self
                .cos
                .as_ref()
                .ok_or_else(|| Error::Internal("PK Token has no cosigner section".into()))?,
        };
        Ok(format!("{}.{}.{}", section.protected, self.payload, section.signature).into_bytes())
    }

    /// The `alg` declared in the OP protected header.
    pub fn provider_algorithm(&self) -> Result<Algorithm> {
        let header = self.op_header()?;
        match header.get("alg") {
            Some(Value::String(alg)) => alg.parse(),
            _ => Err(Error::MalformedToken("OP header missing 'alg'".into())),
        }
    }

    /// The parsed OP protected header.
    pub fn op_header(&self) -> Result<serde_json::Map<String, Value>> {
        jwt::parse_segment(&self.op.protected)
    }

    /// The Client Instance Claims parsed from the CIC protected header.
    pub fn get_cic_values(&self) -> Result<CicClaims> {
        CicClaims::from_header(jwt::parse_segment(&self.cic.protected)?)
    }

    /// Merge the RFC 7638 thumbprint of the OP's public key into the OP
    /// protected header as `jkt`. Idempotent.
    pub fn add_jkt_header(&mut self, op_jwk: &Jwk) -> Result<()> {
        let thumbprint = compute_thumbprint(op_jwk);

        let mut header = self.op_header()?;
        if header.get("jkt") == Some(&Value::String(thumbprint.clone())) {
            return Ok(());
        }
        header.insert("jkt".into(), Value::String(thumbprint));

        let canonical: BTreeMap<String, Value> = header.into_iter().collect();
        let bytes = serde_json::to_vec(&canonical)
            .map_err(|e| Error::Internal(format!("failed to serialize OP header: {e}")))?;
        self.op.protected = URL_SAFE_NO_PAD.encode(bytes);
        Ok(())
    }

    /// The OP protected header segment the OP actually signed: the current
    /// segment with the client-added `jkt` member removed.
    ///
    /// Requires the OP to serialize its headers with sorted members and no
    /// whitespace, which holds for standard OP header sets and for every
    /// header this crate produces.
    pub(crate) fn op_verification_header(&self) -> Result<String> {
        let mut header = self.op_header()?;
        if header.remove("jkt").is_none() {
            return Ok(self.op.protected.clone());
        }

        let canonical: BTreeMap<String, Value> = header.into_iter().collect();
        let bytes = serde_json::to_vec(&canonical)
            .map_err(|e| Error::Internal(format!("failed to serialize OP header: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Attach a cosigner compact JWS as the third signature.
    ///
    /// Rejects a second attachment and any JWS whose payload is not
    /// byte-identical to the PK Token payload.
    pub fn attach_cosigner(&mut self, cos_jws: &[u8]) -> Result<()> {
        if self.cos.is_some() {
            return Err(Error::Internal("cosigner section already attached".into()));
        }

        let (header, payload, signature) = jwt::split_compact(cos_jws)?;
        if payload != self.payload {
            return Err(Error::MalformedToken(
                "cosigner payload differs from PK Token payload".into(),
            ));
        }
        let _: serde_json::Map<String, Value> = jwt::parse_segment(header)?;

        self.cos = Some(Section {
            protected: header.to_string(),
            signature: signature.to_string(),
        });
        Ok(())
    }

    /// The cosigner protected header segment, if a cosigner section exists.
    pub fn cos_protected(&self) -> Option<&str> {
        self.cos.as_ref().map(|s| s.protected.as_str())
    }

    /// Whether a cosigner section is attached.
    pub fn has_cosigner(&self) -> bool {
        self.cos.is_some()
    }

    /// Hash commitment to the pre-cosignature state: base64url SHA-256 of
    /// the canonical wire form of the OP and CIC sections.
    ///
    /// The cosigner section is always excluded, so the hash is stable
    /// across cosigning and can be matched against the cosigner header's
    /// `nonce`.
    pub fn hash(&self) -> Result<String> {
        let wire = WireToken {
            op: WireSection {
                protected: self.op.protected.clone(),
                payload: self.payload.clone(),
                signature: self.op.signature.clone(),
            },
            cic: WireSection {
                protected: self.cic.protected.clone(),
                payload: self.payload.clone(),
                signature: self.cic.signature.clone(),
            },
            cos: None,
        };
        let canonical = serde_json::to_vec(&wire)
            .map_err(|e| Error::Internal(format!("serialization failed: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(canonical)))
    }

    /// Verify the CIC signature under the public key embedded in the CIC
    /// header (invariant I2).
    pub fn verify_cic_sig(&self) -> Result<()> {
        let cic = self.get_cic_values()?;
        let message = format!("{}.{}", self.cic.protected, self.payload);
        let signature = jwt::decode_segment(&self.cic.signature)?;

        if !crypto::verify_signature(
            cic.public_key(),
            cic.algorithm(),
            message.as_bytes(),
            &signature,
        )? {
            return Err(Error::SignatureInvalidCic);
        }
        Ok(())
    }
}

impl Serialize for PkToken {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let wire = WireToken {
            op: WireSection {
                protected: self.op.protected.clone(),
                payload: self.payload.clone(),
                signature: self.op.signature.clone(),
            },
            cic: WireSection {
                protected: self.cic.protected.clone(),
                payload: self.payload.clone(),
                signature: self.cic.signature.clone(),
            },
            cos: self.cos.as_ref().map(|section| WireSection {
                protected: section.protected.clone(),
                payload: self.payload.clone(),
                signature: section.signature.clone(),
            }),
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PkToken {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = WireToken::deserialize(deserializer)?;

        if wire.op.payload != wire.cic.payload {
            return Err(serde::de::Error::custom(
                "op and cic payloads are not identical",
            ));
        }
        if let Some(cos) = &wire.cos {
            if cos.payload != wire.op.payload {
                return Err(serde::de::Error::custom(
                    "cos payload is not identical to op payload",
                ));
            }
        }

        Ok(PkToken {
            payload: wire.op.payload,
            op: Section {
                protected: wire.op.protected,
                signature: wire.op.signature,
            },
            cic: Section {
                protected: wire.cic.protected,
                signature: wire.cic.signature,
            },
            cos: wire.cos.map(|section| Section {
                protected: section.protected,
                signature: section.signature,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cic::CicClaims;
    use crate::crypto::EcdsaSigner;
    use crate::crypto::signer::Signer;
    use std::collections::BTreeMap;

    fn test_id_token(payload: &str) -> Vec<u8> {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","kid":"k1","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(payload);
        format!("{header}.{payload}.b3BzaWc").into_bytes()
    }

    fn test_token() -> (PkToken, EcdsaSigner) {
        let signer = EcdsaSigner::generate();
        let cic =
            CicClaims::new(signer.public_jwk(), Algorithm::Es256, BTreeMap::new()).unwrap();
        let id_token = test_id_token(r#"{"iss":"https://op.example","sub":"u1"}"#);
        let cic_jws = cic.sign(&signer, &id_token).unwrap();
        (PkToken::new(&id_token, &cic_jws).unwrap(), signer)
    }

    fn test_cosigner_jws(token: &PkToken) -> Vec<u8> {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"ES256","iss":"https://cos.example"}"#);
        format!("{header}.{}.Y29zc2ln", token.payload()).into_bytes()
    }

    #[test]
    fn test_new_rejects_payload_mismatch() {
        let signer = EcdsaSigner::generate();
        let cic =
            CicClaims::new(signer.public_jwk(), Algorithm::Es256, BTreeMap::new()).unwrap();
        let id_token = test_id_token(r#"{"iss":"https://op.example","sub":"u1"}"#);
        let other = test_id_token(r#"{"iss":"https://op.example","sub":"u2"}"#);
        let cic_jws = cic.sign(&signer, &other).unwrap();

        assert!(matches!(
            PkToken::new(&id_token, &cic_jws),
            Err(Error::MalformedToken(_))
        ));
    }

    #[test]
    fn test_serialization_roundtrip_is_exact() {
        let (mut token, _) = test_token();
        token.attach_cosigner(&test_cosigner_jws(&token)).unwrap();

        let encoded = token.to_json().unwrap();
        let decoded = PkToken::parse(&encoded).unwrap();

        assert_eq!(decoded, token);
        assert_eq!(decoded.to_json().unwrap(), encoded);
    }

    #[test]
    fn test_parse_rejects_divergent_payloads() {
        let (token, _) = test_token();
        let mut value: serde_json::Value =
            serde_json::from_slice(&token.to_json().unwrap()).unwrap();
        value["cic"]["payload"] = serde_json::Value::String("eyJmb3JnZWQiOjF9".into());

        let result = PkToken::parse(&serde_json::to_vec(&value).unwrap());
        assert!(matches!(result, Err(Error::MalformedToken(_))));
    }

    #[test]
    fn test_provider_algorithm() {
        let (token, _) = test_token();
        assert_eq!(token.provider_algorithm().unwrap(), Algorithm::Rs256);
    }

    #[test]
    fn test_compact_view() {
        let (token, _) = test_token();
        let compact = token.compact(SectionKind::Op).unwrap();
        let (_, payload, sig) = jwt::split_compact(&compact).unwrap();
        assert_eq!(payload, token.payload());
        assert_eq!(sig, "b3BzaWc");

        assert!(token.compact(SectionKind::Cos).is_err());
    }

    #[test]
    fn test_add_jkt_header_is_idempotent() {
        let (mut token, _) = test_token();
        let op_jwk = Jwk::Rsa {
            n: "AQAB".into(),
            e: "AQAB".into(),
        };

        token.add_jkt_header(&op_jwk).unwrap();
        let once = token.clone();
        token.add_jkt_header(&op_jwk).unwrap();

        assert_eq!(token, once);
        assert_eq!(
            token.op_header().unwrap()["jkt"],
            Value::String(compute_thumbprint(&op_jwk))
        );
    }

    #[test]
    fn test_op_verification_header_strips_jkt() {
        let (mut token, _) = test_token();
        let original = token.op_verification_header().unwrap();

        let op_jwk = Jwk::Rsa {
            n: "AQAB".into(),
            e: "AQAB".into(),
        };
        token.add_jkt_header(&op_jwk).unwrap();

        assert_eq!(token.op_verification_header().unwrap(), original);
    }

    #[test]
    fn test_attach_cosigner_once_only() {
        let (mut token, _) = test_token();
        let cos_jws = test_cosigner_jws(&token);

        token.attach_cosigner(&cos_jws).unwrap();
        assert!(token.has_cosigner());
        assert!(matches!(
            token.attach_cosigner(&cos_jws),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_attach_cosigner_rejects_foreign_payload() {
        let (mut token, _) = test_token();
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"ES256"}"#);
        let foreign = format!("{header}.eyJmb3JnZWQiOjF9.Y29zc2ln");

        assert!(matches!(
            token.attach_cosigner(foreign.as_bytes()),
            Err(Error::MalformedToken(_))
        ));
    }

    #[test]
    fn test_hash_excludes_cosigner_section() {
        let (mut token, _) = test_token();
        let before = token.hash().unwrap();

        token.attach_cosigner(&test_cosigner_jws(&token)).unwrap();
        assert_eq!(token.hash().unwrap(), before);
    }

    #[test]
    fn test_verify_cic_sig() {
        let (token, _) = test_token();
        token.verify_cic_sig().unwrap();
    }

    #[test]
    fn test_verify_cic_sig_detects_tampering() {
        let (token, _) = test_token();
        let mut value: serde_json::Value =
            serde_json::from_slice(&token.to_json().unwrap()).unwrap();

        // flip one character of the CIC signature
        let sig = value["cic"]["signature"].as_str().unwrap();
        let mut flipped = sig.to_string();
        let replacement = if flipped.starts_with('A') { "B" } else { "A" };
        flipped.replace_range(0..1, replacement);
        value["cic"]["signature"] = serde_json::Value::String(flipped);

        let tampered = PkToken::parse(&serde_json::to_vec(&value).unwrap()).unwrap();
        assert!(matches!(
            tampered.verify_cic_sig(),
            Err(Error::SignatureInvalidCic)
        ));
    }

    #[test]
    fn test_get_cic_values() {
        let (token, signer) = test_token();
        let cic = token.get_cic_values().unwrap();
        assert_eq!(cic.algorithm(), Algorithm::Es256);
        assert_eq!(cic.public_key(), &signer.public_jwk());
    }
}
