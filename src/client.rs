//! The OpenPubkey client: runs the full authentication flow.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cic::CicClaims;
use crate::cosigner::{CosignerProvider, CosignerSession};
use crate::crypto::{Algorithm, EcdsaSigner, Signer};
use crate::error::{Error, Result};
use crate::gq::GqSignerVerifier;
use crate::jwt;
use crate::pktoken::PkToken;
use crate::provider::{IdToken, KeySource, OpenIdProvider, RemoteKeySource};
use crate::verifier::{Check, CosignerVerifier, ProviderVerifier, Verifier};

/// Per-authentication options.
#[derive(Default)]
pub struct AuthOptions {
    /// Additional claims folded into the CIC protected header, and thereby
    /// into the commitment placed in the ID token.
    pub extra_claims: BTreeMap<String, Value>,
    /// Callback plumbing for the cosigning round. Required when the client
    /// was built with a cosigner provider.
    pub cosigner_session: Option<CosignerSession>,
}

impl AuthOptions {
    pub fn with_extra_claim(mut self, key: &str, value: &str) -> Self {
        self.extra_claims
            .insert(key.to_string(), Value::String(value.to_string()));
        self
    }

    pub fn with_cosigner_session(mut self, session: CosignerSession) -> Self {
        self.cosigner_session = Some(session);
        self
    }
}

/// Builder for [`OpkClient`].
pub struct OpkClientBuilder {
    op: Arc<dyn OpenIdProvider>,
    signer: Option<Arc<dyn Signer>>,
    sign_gq: bool,
    cosigner: Option<(CosignerProvider, Arc<dyn KeySource>)>,
    key_source: Option<Arc<dyn KeySource>>,
    extra_checks: Vec<Check>,
}

impl OpkClientBuilder {
    /// Bring your own key pair instead of a generated ES256 one.
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Replace the OP's RSA signature with a GQ proof after issuance.
    pub fn with_sign_gq(mut self, sign_gq: bool) -> Self {
        self.sign_gq = sign_gq;
        self
    }

    /// Get the PK Token cosigned after authentication. `keys` resolves the
    /// cosigner's advertised verification keys.
    pub fn with_cosigner_provider(
        mut self,
        provider: CosignerProvider,
        keys: Arc<dyn KeySource>,
    ) -> Self {
        self.cosigner = Some((provider, keys));
        self
    }

    /// Override the OP key source (tests, pre-distributed keys).
    pub fn with_key_source(mut self, keys: Arc<dyn KeySource>) -> Self {
        self.key_source = Some(keys);
        self
    }

    /// Append an extra check to every verification this client performs.
    pub fn with_extra_check(mut self, check: Check) -> Self {
        self.extra_checks.push(check);
        self
    }

    pub fn build(self) -> OpkClient {
        let signer = self
            .signer
            .unwrap_or_else(|| Arc::new(EcdsaSigner::generate()));

        let key_source = self.key_source.unwrap_or_else(|| {
            Arc::new(RemoteKeySource::new(self.op.issuer()).require_alg("RS256"))
        });

        let mut verifier = Verifier::new(ProviderVerifier::new(
            self.op.issuer(),
            self.op.commitment_claim(),
            key_source.clone(),
        ));
        if let Some((provider, keys)) = &self.cosigner {
            verifier = verifier.with_cosigner(CosignerVerifier::new(provider.issuer(), keys.clone()));
        }

        OpkClient {
            op: self.op,
            signer,
            sign_gq: self.sign_gq,
            cosigner: self.cosigner.map(|(provider, _)| provider),
            key_source,
            verifier,
            extra_checks: self.extra_checks,
        }
    }
}

/// A client for one OpenID Provider and one user key pair.
pub struct OpkClient {
    op: Arc<dyn OpenIdProvider>,
    signer: Arc<dyn Signer>,
    sign_gq: bool,
    cosigner: Option<CosignerProvider>,
    key_source: Arc<dyn KeySource>,
    verifier: Verifier,
    extra_checks: Vec<Check>,
}

impl OpkClient {
    pub fn builder(op: Arc<dyn OpenIdProvider>) -> OpkClientBuilder {
        OpkClientBuilder {
            op,
            signer: None,
            sign_gq: false,
            cosigner: None,
            key_source: None,
            extra_checks: Vec::new(),
        }
    }

    /// Authenticate against the OP and produce a verified PK Token,
    /// cosigned when a cosigner provider is configured.
    pub async fn auth(
        &self,
        cancel: &CancellationToken,
        options: AuthOptions,
    ) -> Result<PkToken> {
        let AuthOptions {
            extra_claims,
            cosigner_session,
        } = options;

        let cic = CicClaims::new(self.signer.public_jwk(), self.signer.algorithm(), extra_claims)?;
        let commitment = cic.hash()?;

        // The browser hook must be in place before the OIDC round starts,
        // and a provider without it cannot serve a cosigner flow.
        let mut cosign = None;
        if let Some(provider) = &self.cosigner {
            let session = cosigner_session.ok_or_else(|| {
                Error::Internal("cosigner configured but no cosigner session supplied".into())
            })?;
            let (auth_uri_tx, auth_uri_rx) = mpsc::channel(1);
            self.op.hook_http_session(auth_uri_rx)?;
            cosign = Some((provider, session, auth_uri_tx));
        }

        debug!(issuer = self.op.issuer(), "requesting ID token");
        let mut id_token = self.op.request_tokens(cancel, &commitment).await?;

        let cic_jws = cic.sign(self.signer.as_ref(), id_token.as_bytes())?;

        let kid = {
            let (header_b64, _, _) = jwt::split_compact(id_token.as_bytes())?;
            let header: serde_json::Map<String, Value> = jwt::parse_segment(header_b64)?;
            match header.get("kid") {
                Some(Value::String(kid)) => kid.clone(),
                _ => return Err(Error::MalformedToken("ID token header missing 'kid'".into())),
            }
        };
        let op_key = self.key_source.fetch_key(cancel, &kid).await?;

        let mut checks = self.extra_checks.clone();
        if self.sign_gq {
            debug!("replacing OP signature with GQ proof");
            let gq = GqSignerVerifier::new(&op_key.to_rsa()?)?;
            let transformed = gq.sign_jwt(id_token.as_bytes())?;
            // replacing the buffer zeroizes the RS256-signed original
            id_token = IdToken::new(transformed);
            checks.push(Check::GqOnly);
        }

        let mut token = PkToken::new(id_token.as_bytes(), &cic_jws)?;
        drop(id_token);

        token.add_jkt_header(&op_key)?;

        self.verifier.verify(cancel, &token, &checks).await?;

        match cosign {
            Some((provider, session, auth_uri_tx)) => {
                provider
                    .request_token(cancel, token, session, auth_uri_tx)
                    .await
            }
            None => Ok(token),
        }
    }

    pub fn op(&self) -> &dyn OpenIdProvider {
        self.op.as_ref()
    }

    pub fn signer(&self) -> &dyn Signer {
        self.signer.as_ref()
    }

    pub fn algorithm(&self) -> Algorithm {
        self.signer.algorithm()
    }

    pub fn sign_gq(&self) -> bool {
        self.sign_gq
    }
}
