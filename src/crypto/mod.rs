//! Client key handling: signing, verification, thumbprints.

pub mod signer;
pub mod thumbprint;

pub use signer::{verify_signature, Algorithm, EcdsaSigner, Signer};
pub use thumbprint::compute_thumbprint;
