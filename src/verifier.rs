//! The PK Token validation pipeline.
//!
//! One pipeline serves both the client's post-authentication self-check
//! and standalone verification by relying parties. Every step must pass;
//! there is no partial acceptance.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cosigner::{CosignerHeader, COSIGNER_TYP};
use crate::crypto::{self, Algorithm};
use crate::error::{Error, Result};
use crate::gq::{self, GqSignerVerifier};
use crate::jwt;
use crate::pktoken::{PkToken, SectionKind};
use crate::provider::KeySource;

/// Clock skew tolerance in seconds for cosigner time checks.
const CLOCK_SKEW_TOLERANCE: i64 = 60;

/// Optional checks appended to the core pipeline.
#[derive(Debug, Clone)]
pub enum Check {
    /// Reject tokens whose OP signature is not a GQ proof.
    GqOnly,
    /// Reject tokens whose issuer is not in the list.
    AllowedIssuers(Vec<String>),
}

/// Verifies the OP section: issuer, signature (RS256 or GQ256), and the
/// commitment binding between the ID token and the CIC.
pub struct ProviderVerifier {
    issuer: String,
    commitment_claim: String,
    keys: Arc<dyn KeySource>,
}

impl ProviderVerifier {
    pub fn new(issuer: &str, commitment_claim: &str, keys: Arc<dyn KeySource>) -> Self {
        Self {
            issuer: issuer.to_string(),
            commitment_claim: commitment_claim.to_string(),
            keys,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    async fn verify(&self, cancel: &CancellationToken, token: &PkToken) -> Result<()> {
        let op_compact = token.compact(SectionKind::Op)?;

        let issuer = jwt::extract_claim(&op_compact, "iss")?;
        if issuer != self.issuer {
            return Err(Error::IssuerMismatch {
                expected: self.issuer.clone(),
                actual: issuer,
            });
        }

        match token.provider_algorithm()? {
            Algorithm::Gq256 => {
                let orig_header_b64 = gq::original_jwt_headers(&op_compact)?;
                let orig_header: serde_json::Map<String, Value> =
                    jwt::parse_segment(&orig_header_b64)?;
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

                let kid = match orig_header.get("kid") {
                    Some(Value::String(kid)) => kid.clone(),
                    _ => {
                        return Err(Error::MalformedToken(
                            "original token header missing 'kid'".into(),
                        ))
                    }
                };

                let key = self.keys.fetch_key(cancel, &kid).await?;
                GqSignerVerifier::new(&key.to_rsa()?)?.verify_jwt(&op_compact)?;
            }
            Algorithm::Rs256 => {
                let header = token.op_header()?;
                let kid = match header.get("kid") {
                    Some(Value::String(kid)) => kid.clone(),
                    _ => return Err(Error::MalformedToken("OP header missing 'kid'".into())),
                };

                let key = self.keys.fetch_key(cancel, &kid).await?;
                let message = format!(
                    "{}.{}",
                    token.op_verification_header()?,
                    token.payload()
                );
                let (_, _, signature_b64) = jwt::split_compact(&op_compact)?;
                let signature = jwt::decode_segment(signature_b64)?;

                if !crypto::verify_signature(
                    &key,
                    Algorithm::Rs256,
                    message.as_bytes(),
                    &signature,
                )? {
                    return Err(Error::SignatureInvalidOp);
                }
            }
            other => return Err(Error::UnsupportedAlgorithm(other.to_string())),
        }

        // The commitment claim must equal the hash of the CIC header.
        let commitment = token.get_cic_values()?.hash()?;
        let claim = jwt::extract_claim(&op_compact, &self.commitment_claim)?;
        if claim != commitment {
            return Err(Error::CommitmentMismatch);
        }

        Ok(())
    }
}

/// Verifies a cosigner section under the cosigner's advertised keys.
pub struct CosignerVerifier {
    issuer: String,
    keys: Arc<dyn KeySource>,
}

impl CosignerVerifier {
    pub fn new(issuer: &str, keys: Arc<dyn KeySource>) -> Self {
        Self {
            issuer: issuer.to_string(),
            keys,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    async fn verify(&self, cancel: &CancellationToken, token: &PkToken) -> Result<()> {
        let Some(protected) = token.cos_protected() else {
            return Err(Error::Internal("PK Token has no cosigner section".into()));
        };
        let header: CosignerHeader = jwt::parse_segment(protected)?;

        if header.typ != COSIGNER_TYP {
            return Err(Error::MalformedToken(format!(
                "cosigner header typ '{}', expected '{COSIGNER_TYP}'",
                header.typ
            )));
        }

        let alg: Algorithm = header.alg.parse()?;
        let key = self.keys.fetch_key(cancel, &header.kid).await?;

        let compact = token.compact(SectionKind::Cos)?;
        let (header_b64, payload_b64, signature_b64) = jwt::split_compact(&compact)?;
        let message = format!("{header_b64}.{payload_b64}");
        let signature = jwt::decode_segment(signature_b64)?;

        if !crypto::verify_signature(&key, alg, message.as_bytes(), &signature)? {
            return Err(Error::SignatureInvalidCos);
        }

        // The nonce must commit to the token as the cosigner saw it.
        if header.nonce != token.hash()? {
            warn!(issuer = %self.issuer, "cosigner nonce does not commit to this PK Token");
            return Err(Error::SignatureInvalidCos);
        }

        let now = Utc::now().timestamp();
        if header.exp + CLOCK_SKEW_TOLERANCE < now {
            warn!(issuer = %self.issuer, exp = header.exp, "cosignature expired");
            return Err(Error::SignatureInvalidCos);
        }

        Ok(())
    }
}

/// The full pipeline: provider section, CIC section, optional cosigner
/// section, then any extra checks, in that order.
pub struct Verifier {
    provider: ProviderVerifier,
    cosigners: Vec<CosignerVerifier>,
}

impl Verifier {
    pub fn new(provider: ProviderVerifier) -> Self {
        Self {
            provider,
            cosigners: Vec::new(),
        }
    }

    /// Accept cosignatures from this cosigner. May be called repeatedly.
    pub fn with_cosigner(mut self, cosigner: CosignerVerifier) -> Self {
        self.cosigners.push(cosigner);
        self
    }

    pub async fn verify(
        &self,
        cancel: &CancellationToken,
        token: &PkToken,
        checks: &[Check],
    ) -> Result<()> {
        // Payload equality across sections is enforced structurally by
        // PkToken construction and parsing.
        self.provider.verify(cancel, token).await?;
        token.verify_cic_sig()?;

        if let Some(protected) = token.cos_protected() {
            let header: CosignerHeader = jwt::parse_segment(protected)?;
            let cosigner = self
                .cosigners
                .iter()
                .find(|c| c.issuer == header.iss)
                .ok_or(Error::SignatureInvalidCos)?;
            cosigner.verify(cancel, token).await?;
        }

        for check in checks {
            self.apply_check(token, check)?;
        }
        Ok(())
    }

    fn apply_check(&self, token: &PkToken, check: &Check) -> Result<()> {
        match check {
            Check::GqOnly => {
                let alg = token.provider_algorithm()?;
                if alg != Algorithm::Gq256 {
                    return Err(Error::UnsupportedAlgorithm(alg.to_string()));
                }
                Ok(())
            }
            Check::AllowedIssuers(issuers) => {
                let op_compact = token.compact(SectionKind::Op)?;
                let issuer = jwt::extract_claim(&op_compact, "iss")?;
                if !issuers.contains(&issuer) {
                    return Err(Error::IssuerMismatch {
                        expected: issuers.join(", "),
                        actual: issuer,
                    });
                }
                Ok(())
            }
        }
    }
}
