use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::claims::{AuthorizationChecker, ClaimsValidator, PrincipalExtractor};
use crate::config::ValidatorConfig;
use crate::remote::{KeySetCache, KeySetCacheConfig};
use crate::resolver::KeyResolver;
use crate::token::{bearer_token, UnverifiedHeader};
use crate::verify::SignatureVerifier;
use crate::{AuthError, Error};

/// Requests to this path are never authenticated.
pub const HEALTH_PATH: &str = "/health";

/// Stable, non-reversible tag for correlating sensitive values in logs.
///
/// First 8 bytes of the SHA-256 digest, hex encoded.
pub fn redact_tag(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    Sha256::digest(value.as_bytes())[..8]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

struct Inner {
    config: ValidatorConfig,
    resolver: KeyResolver,
    verifier: SignatureVerifier,
    claims: ClaimsValidator,
    authorization: AuthorizationChecker,
}

/// Validates bearer tokens and yields the caller's principal id.
///
/// Cheap to clone; clones share the key-set cache.
#[derive(Clone)]
pub struct Validator {
    inner: Arc<Inner>,
}

impl Validator {
    /// Creates a validator that fetches key sets over HTTPS.
    pub fn new(config: ValidatorConfig) -> Result<Self, Error> {
        let cache = KeySetCache::http(KeySetCacheConfig::default())?;
        Ok(Self::with_cache(config, Arc::new(cache)))
    }

    /// Creates a validator on top of an existing key-set cache.
    pub fn with_cache(config: ValidatorConfig, cache: Arc<KeySetCache>) -> Self {
        let endpoints = config.key_set_endpoints();
        tracing::info!(
            authority = %config.authority(),
            multi_tenant = config.authority().is_multi_tenant(),
            audiences = config.expected_audiences().len(),
            endpoints = endpoints.len(),
            require_auth = config.require_auth(),
            "Initialized token validator"
        );

        let inner = Inner {
            resolver: KeyResolver::new(cache, endpoints),
            verifier: SignatureVerifier::new(),
            claims: ClaimsValidator::new(&config),
            authorization: AuthorizationChecker::new(config.required_scope()),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.inner.config
    }

    /// Runs the whole pipeline on an `Authorization` header value.
    pub async fn authorize(&self, authorization: Option<&str>) -> Result<String, AuthError> {
        let now = jsonwebtoken::get_current_timestamp() as i64;
        self.authorize_at(authorization, now).await
    }

    /// [`Validator::authorize`] with an explicit current unix time.
    pub async fn authorize_at(
        &self,
        authorization: Option<&str>,
        now: i64,
    ) -> Result<String, AuthError> {
        let inner = &self.inner;

        let Some(token) = authorization.and_then(bearer_token) else {
            tracing::debug!("Missing bearer token");
            return Err(AuthError::NoCredential);
        };

        let header = UnverifiedHeader::read(token).inspect_err(|_| {
            tracing::debug!("Failed to parse token header");
        })?;

        let alg = SignatureVerifier::check_algorithm(&header.alg).inspect_err(|_| {
            tracing::debug!("Unexpected token alg (expected RS256)");
        })?;

        let key = inner.resolver.resolve(&header.kid).await?;
        let token = inner.verifier.verify(token, &key, alg)?;

        inner.claims.validate(&token, now)?;
        inner.authorization.check(&token)?;
        PrincipalExtractor::extract(&token)
    }
}
