//! Bearer token validation for Axum services that trust an Entra style identity authority.
//!
//! The [`Validator`] resolves signing keys from remote JWKS endpoints, verifies the token,
//! checks its claims and required scope, and yields the caller's principal id.
//! [`request_gate`] wires it in front of a router.

mod axum;
mod claims;
mod config;
mod remote;
mod resolver;
mod token;
mod validator;
mod verify;

pub use crate::axum::{attach_principal, read_principal, request_gate, AuthError, Principal};
pub use crate::claims::{
    AuthorizationChecker, ClaimsValidator, PrincipalExtractor, CLOCK_SKEW_SECS, PRINCIPAL_CLAIM,
};
pub use crate::config::{Authority, MultiTenantMarker, ValidatorConfig, DEFAULT_AUTHORITY_BASE};
pub use crate::remote::{
    HttpKeySetFetcher, KeySetCache, KeySetCacheConfig, KeySetCacheConfigBuilder, KeySetFetcher,
};
pub use crate::resolver::{KeyResolver, ResolvedKey};
pub use crate::token::{bearer_token, UnverifiedHeader};
pub use crate::validator::{redact_tag, Validator, HEALTH_PATH};
pub use crate::verify::{AllowedAlgorithm, SignatureVerifier, VerifiedToken};

/// Infrastructure errors: configuration problems and key-set transport failures.
///
/// These never reach a client directly; the pipeline folds them into an [`AuthError`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error("key set unavailable: {0}")]
    KeySetUnavailable(String),
}
