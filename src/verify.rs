use jsonwebtoken::{Algorithm, Validation};
use serde_json::{Map, Value};

use crate::resolver::ResolvedKey;
use crate::AuthError;

/// An algorithm that passed the allow-list. RS256 is the only one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowedAlgorithm(Algorithm);

/// Claims of a token whose signature has been checked against a resolved key.
///
/// Nothing in here has been validated beyond the signature.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    claims: Map<String, Value>,
}

fn numeric_date(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|secs| secs as i64))
}

impl VerifiedToken {
    #[cfg(test)]
    pub(crate) fn from_claims(claims: Value) -> Self {
        match claims {
            Value::Object(claims) => Self { claims },
            _ => Self { claims: Map::new() },
        }
    }

    pub fn issuer(&self) -> Option<&str> {
        self.claims.get("iss").and_then(Value::as_str)
    }

    /// `aud` as a list, whether the token carries one string or an array.
    pub fn audiences(&self) -> Vec<&str> {
        match self.claims.get("aud") {
            Some(Value::String(aud)) => vec![aud.as_str()],
            Some(Value::Array(auds)) => auds.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn expiration(&self) -> Option<i64> {
        self.claims.get("exp").and_then(numeric_date)
    }

    pub fn not_before(&self) -> Option<i64> {
        self.claims.get("nbf").and_then(numeric_date)
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }
}

/// Checks token signatures. Claims are left to [`crate::ClaimsValidator`].
#[derive(Debug, Clone, Default)]
pub struct SignatureVerifier;

impl SignatureVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Rejects every algorithm but RS256, before any key is looked up.
    pub fn check_algorithm(alg: &str) -> Result<AllowedAlgorithm, AuthError> {
        match alg {
            "RS256" => Ok(AllowedAlgorithm(Algorithm::RS256)),
            _ => Err(AuthError::UnsupportedAlgorithm),
        }
    }

    pub fn verify(
        &self,
        token: &str,
        key: &ResolvedKey,
        alg: AllowedAlgorithm,
    ) -> Result<VerifiedToken, AuthError> {
        let mut validation = Validation::new(alg.0);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let token_data = jsonwebtoken::decode::<Map<String, Value>>(
            token,
            key.decoding_key(),
            &validation,
        )
        .map_err(|err| {
            tracing::debug!(error = %err, "Token signature verification failed");
            AuthError::SignatureInvalid
        })?;

        Ok(VerifiedToken {
            claims: token_data.claims,
        })
    }
}
