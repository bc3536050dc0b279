use std::sync::Arc;

use jsonwebtoken::jwk::{Jwk, PublicKeyUse};
use jsonwebtoken::DecodingKey;

use crate::remote::KeySetCache;
use crate::{redact_tag, AuthError};

/// A public key found under a registered endpoint and cleared for signature checks.
///
/// Only [`KeyResolver::resolve`] produces one.
pub struct ResolvedKey {
    key: DecodingKey,
}

impl ResolvedKey {
    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

/// A declared `use` must be absent, empty, or `sig`.
fn usable_for_signing(jwk: &Jwk) -> bool {
    match &jwk.common.public_key_use {
        None | Some(PublicKeyUse::Signature) => true,
        Some(PublicKeyUse::Other(usage)) => usage.is_empty(),
        Some(PublicKeyUse::Encryption) => false,
    }
}

/// Maps a key id to a public key by searching the registered endpoints in order.
pub struct KeyResolver {
    cache: Arc<KeySetCache>,
    endpoints: Vec<String>,
}

impl KeyResolver {
    /// `endpoints` is searched front to back; put the primary first.
    pub fn new(cache: Arc<KeySetCache>, endpoints: Vec<String>) -> Self {
        Self { cache, endpoints }
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Returns the first key matching `kid`.
    ///
    /// An endpoint whose fetch fails is skipped like one without the key.
    pub async fn resolve(&self, kid: &str) -> Result<ResolvedKey, AuthError> {
        if kid.is_empty() {
            tracing::debug!("Missing kid in token header");
            return Err(AuthError::KeyNotFound);
        }

        let kid_tag = redact_tag(kid);
        for endpoint in &self.endpoints {
            let Ok(key_set) = self.cache.get(endpoint).await else {
                continue;
            };

            let Some(jwk) = key_set.find(kid) else {
                tracing::debug!(kid_tag = %kid_tag, endpoint = %endpoint, "No matching JWKS key");
                continue;
            };

            if !usable_for_signing(jwk) {
                tracing::warn!(kid_tag = %kid_tag, "JWKS key has unexpected usage");
                return Err(AuthError::KeyNotUsableForSigning);
            }

            let key = DecodingKey::from_jwk(jwk).map_err(|err| {
                tracing::warn!(kid_tag = %kid_tag, error = %err, "Failed to extract public key");
                AuthError::KeyNotUsableForSigning
            })?;

            tracing::debug!(kid_tag = %kid_tag, "Matching JWKS key found");
            return Ok(ResolvedKey { key });
        }

        tracing::debug!(kid_tag = %kid_tag, "No matching JWKS key in any endpoint");
        Err(AuthError::KeyNotFound)
    }
}
