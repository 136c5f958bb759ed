//! # openpubkey
//!
//! Client-side implementation of the PK Token protocol: a composite
//! credential that cryptographically binds a client-generated key pair to
//! an identity asserted by an OpenID Provider (OP).
//!
//! A PK Token carries three signatures over one shared payload (the OP's
//! ID token payload):
//!
//! - the **OP signature**: the provider's RS256 signature, or a GQ256
//!   proof of knowledge of it that hides the raw signature bytes;
//! - the **CIC signature**: the client's signature under the user key
//!   embedded in the Client Instance Claims header, which the OP committed
//!   to through the ID token's nonce (or audience) claim;
//! - optionally a **cosigner signature** attesting to an out-of-band MFA
//!   event.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use openpubkey::{AuthOptions, OpkClient};
//! use tokio_util::sync::CancellationToken;
//!
//! let client = OpkClient::builder(Arc::new(my_provider))
//!     .with_sign_gq(true)
//!     .build();
//!
//! let cancel = CancellationToken::new();
//! let options = AuthOptions::default().with_extra_claim("k", "v");
//! let pk_token = client.auth(&cancel, options).await?;
//!
//! // the token is already verified; serialize it for downstream parties
//! let wire = pk_token.to_json()?;
//! # Ok::<(), openpubkey::Error>(())
//! ```
//!
//! ## Security notes
//!
//! - ID token bytes live in a zeroizing buffer from OP response until
//!   consumed into the PK Token, and are wiped on every exit path.
//! - The GQ transform means a PK Token is not a replayable OIDC ID token:
//!   the OP's signature bytes never leave the client.
//! - A cosignature commits to the exact PK Token it was issued for;
//!   transplanting it onto another token fails verification.

pub mod cic;
pub mod client;
pub mod cosigner;
pub mod crypto;
pub mod error;
pub mod gq;
pub mod jwk;
pub mod jwt;
pub mod pktoken;
pub mod provider;
pub mod verifier;

pub use cic::CicClaims;
pub use client::{AuthOptions, OpkClient, OpkClientBuilder};
pub use cosigner::{CosignerHeader, CosignerProvider, CosignerSession};
pub use crypto::{Algorithm, EcdsaSigner, Signer};
pub use error::{Error, Result};
pub use gq::GqSignerVerifier;
pub use jwk::{Jwk, JwkEntry, JwkSet};
pub use pktoken::{PkToken, SectionKind};
pub use provider::{
    IdToken, JwksCache, KeySource, OpenIdProvider, RemoteKeySource, StaticKeySource,
};
pub use verifier::{Check, CosignerVerifier, ProviderVerifier, Verifier};
