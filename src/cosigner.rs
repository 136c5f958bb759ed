//! MFA cosigner client.
//!
//! Presents a verified PK Token to a cosigner, hands the authentication
//! URI to the user-agent through the provider's HTTP session hook, and
//! attaches the returned cosignature as the token's third signature. The
//! HTTP callback plumbing (local listener, redirect handling) belongs to
//! the caller; this module only consumes its channels.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::jwt;
use crate::pktoken::PkToken;

/// The `typ` value of a cosigner protected header.
pub const COSIGNER_TYP: &str = "COS";

/// Cosigner protected header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosignerHeader {
    pub alg: String,
    pub iss: String,
    pub kid: String,
    /// Expiry of the cosignature, unix seconds.
    pub exp: i64,
    pub iat: i64,
    /// Free-form description of the authentication event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa: Option<serde_json::Value>,
    /// Commitment to the PK Token as presented for cosigning.
    pub nonce: String,
    pub typ: String,
}

/// Caller-provided callback plumbing for one cosigning round.
pub struct CosignerSession {
    /// Where the cosigner should redirect the user-agent after MFA.
    pub redirect_uri: String,
    /// Delivers the short-lived authorization code from that redirect.
    pub authcode: oneshot::Receiver<String>,
}

#[derive(Serialize)]
struct InitRequest<'a> {
    pkt: &'a PkToken,
    ruri: &'a str,
    nonce: &'a str,
    session_id: &'a str,
}

#[derive(Deserialize)]
struct InitResponse {
    auth_uri: String,
}

/// Client for one MFA cosigner service.
pub struct CosignerProvider {
    issuer: String,
    init_path: String,
    redeem_path: String,
    http: reqwest::Client,
}

impl CosignerProvider {
    pub fn new(issuer: &str) -> Self {
        Self {
            issuer: issuer.trim_end_matches('/').to_string(),
            init_path: "/mfa-auth-init".to_string(),
            redeem_path: "/sign".to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Run the cosigning round and return the cosigned PK Token.
    ///
    /// `auth_uri` is the sender half of the channel registered with the
    /// provider's HTTP session hook: the URI pushed into it becomes the
    /// final redirect of the OIDC callback response.
    pub async fn request_token(
        &self,
        cancel: &CancellationToken,
        token: PkToken,
        session: CosignerSession,
        auth_uri: mpsc::Sender<String>,
    ) -> Result<PkToken> {
        let mut nonce_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = URL_SAFE_NO_PAD.encode(nonce_bytes);
        let session_id = Uuid::new_v4().to_string();

        tracing::debug!(issuer = %self.issuer, session_id = %session_id, "initiating cosigner round");

        let init_url = format!("{}{}", self.issuer, self.init_path);
        let request = InitRequest {
            pkt: &token,
            ruri: &session.redirect_uri,
            nonce: &nonce,
            session_id: &session_id,
        };
        let init: InitResponse = {
            let post = async {
                let response = self.http.post(&init_url).json(&request).send().await?;
                if !response.status().is_success() {
                    return Err(Error::Network(format!(
                        "HTTP {} from cosigner init endpoint",
                        response.status()
                    )));
                }
                response.json().await.map_err(Error::from)
            };
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = post => result?,
            }
        };

        auth_uri
            .send(init.auth_uri)
            .await
            .map_err(|_| Error::Internal("redirect channel closed before hand-off".into()))?;

        let code = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            code = session.authcode => code.map_err(|_| {
                Error::Network("authorization code channel closed before redeem".into())
            })?,
        };

        let redeem_url = format!("{}{}", self.issuer, self.redeem_path);
        let cos_jws = {
            let get = async {
                let response = self
                    .http
                    .get(&redeem_url)
                    .query(&[("authcode", code.as_str())])
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(Error::Network(format!(
                        "HTTP {} from cosigner redeem endpoint",
                        response.status()
                    )));
                }
                response.bytes().await.map_err(Error::from)
            };
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = get => result?,
            }
        };

        self.check_and_attach(token, &cos_jws)
    }

    /// Validate a cosigner JWS against the presented PK Token and attach
    /// it. The cosigner must have signed exactly this token: the payload
    /// must match and the header nonce must commit to the token's
    /// pre-cosignature hash.
    pub fn check_and_attach(&self, mut token: PkToken, cos_jws: &[u8]) -> Result<PkToken> {
        let (header_b64, payload_b64, _) = jwt::split_compact(cos_jws)?;
        if payload_b64 != token.payload() {
            return Err(Error::SignatureInvalidCos);
        }

        let header: CosignerHeader = jwt::parse_segment(header_b64)?;
        if header.typ != COSIGNER_TYP {
            return Err(Error::MalformedToken(format!(
                "cosigner header typ '{}', expected '{COSIGNER_TYP}'",
                header.typ
            )));
        }
        if header.iss != self.issuer {
            return Err(Error::IssuerMismatch {
                expected: self.issuer.clone(),
                actual: header.iss,
            });
        }
        if header.nonce != token.hash()? {
            return Err(Error::SignatureInvalidCos);
        }

        token.attach_cosigner(cos_jws)?;
        Ok(token)
    }
}
