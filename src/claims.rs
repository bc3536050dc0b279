use serde_json::Value;

use crate::config::ValidatorConfig;
use crate::verify::VerifiedToken;
use crate::AuthError;

/// Tolerance applied to `exp` and `nbf` for clock drift between issuer and validator.
pub const CLOCK_SKEW_SECS: i64 = 2 * 60;

/// Claim holding the immutable per-account subject id.
pub const PRINCIPAL_CLAIM: &str = "oid";

const ISSUER_SUFFIX: &str = "/v2.0";

#[derive(Debug, Clone)]
enum IssuerRule {
    Exact(String),
    /// Multi-tenant tokens carry the caller's tenant id, never the marker,
    /// so only the shape `<base>/<anything>/v2.0` is checked.
    Structural { prefix: String },
}

/// Audience, issuer and time checks on a verified token.
#[derive(Debug, Clone)]
pub struct ClaimsValidator {
    audiences: Vec<String>,
    issuer: IssuerRule,
}

impl ClaimsValidator {
    pub fn new(config: &ValidatorConfig) -> Self {
        let issuer = if config.authority().is_multi_tenant() {
            IssuerRule::Structural {
                prefix: format!("{}/", config.authority_base()),
            }
        } else {
            IssuerRule::Exact(config.expected_issuer())
        };

        Self {
            audiences: config.expected_audiences().to_vec(),
            issuer,
        }
    }

    /// `now` is the current unix time in seconds.
    pub fn validate(&self, token: &VerifiedToken, now: i64) -> Result<(), AuthError> {
        if !self.audience_matches(token) {
            tracing::debug!("Token audience mismatch");
            return Err(AuthError::ClaimsInvalid);
        }
        if !self.issuer_matches(token) {
            tracing::debug!("Token issuer mismatch");
            return Err(AuthError::ClaimsInvalid);
        }
        if !Self::within_validity(token, now) {
            tracing::debug!(now, "Token outside its validity window");
            return Err(AuthError::ClaimsInvalid);
        }
        Ok(())
    }

    fn audience_matches(&self, token: &VerifiedToken) -> bool {
        token
            .audiences()
            .iter()
            .any(|aud| self.audiences.iter().any(|expected| expected == aud))
    }

    fn issuer_matches(&self, token: &VerifiedToken) -> bool {
        let Some(issuer) = token.issuer() else {
            return false;
        };
        match &self.issuer {
            IssuerRule::Exact(expected) => issuer == expected,
            IssuerRule::Structural { prefix } => {
                issuer.len() > prefix.len() + ISSUER_SUFFIX.len()
                    && issuer.starts_with(prefix.as_str())
                    && issuer.ends_with(ISSUER_SUFFIX)
            }
        }
    }

    fn within_validity(token: &VerifiedToken, now: i64) -> bool {
        let Some(exp) = token.expiration() else {
            return false;
        };
        if now > exp.saturating_add(CLOCK_SKEW_SECS) {
            return false;
        }
        match token.not_before() {
            Some(nbf) => now >= nbf.saturating_sub(CLOCK_SKEW_SECS),
            None => true,
        }
    }
}

/// Enforces the configured scope through either `scp` or `roles`.
#[derive(Debug, Clone)]
pub struct AuthorizationChecker {
    required_scope: String,
}

impl AuthorizationChecker {
    pub fn new(required_scope: impl Into<String>) -> Self {
        Self {
            required_scope: required_scope.into(),
        }
    }

    pub fn check(&self, token: &VerifiedToken) -> Result<(), AuthError> {
        if self.required_scope.is_empty() {
            return Ok(());
        }

        let required = self.required_scope.as_str();
        let in_scopes = token
            .claim("scp")
            .and_then(Value::as_str)
            .is_some_and(|scp| scp.split_whitespace().any(|s| s == required));
        let in_roles = token
            .claim("roles")
            .and_then(Value::as_array)
            .is_some_and(|roles| roles.iter().any(|r| r.as_str() == Some(required)));

        if in_scopes || in_roles {
            Ok(())
        } else {
            // never log the token's scp/roles values
            tracing::debug!(required, "Scope or role missing");
            Err(AuthError::AuthorizationDenied)
        }
    }
}

/// Reads the principal id from the [`PRINCIPAL_CLAIM`] claim.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrincipalExtractor;

impl PrincipalExtractor {
    pub fn extract(token: &VerifiedToken) -> Result<String, AuthError> {
        match token.claim(PRINCIPAL_CLAIM).and_then(Value::as_str) {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => {
                tracing::debug!("Missing oid claim");
                Err(AuthError::PrincipalMissing)
            }
        }
    }
}
