use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::{Map, Value};

use crate::AuthError;

/// Pulls the credential out of an `Authorization: Bearer <token>` header value.
///
/// The value must be exactly two space-separated parts with a case-insensitive
/// `Bearer` scheme. Any other shape yields `None`.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, credential) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let credential = credential.trim();
    if credential.is_empty() || credential.contains(char::is_whitespace) {
        return None;
    }

    Some(credential)
}

/// The algorithm and key id a token claims for itself. Nothing here is trusted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnverifiedHeader {
    pub alg: String,
    pub kid: String,
}

impl UnverifiedHeader {
    /// Decodes the first segment of a compact token without checking anything.
    ///
    /// Missing or non-string `alg`/`kid` values come back empty.
    pub fn read(token: &str) -> Result<Self, AuthError> {
        let mut segments = token.split('.');
        let header = segments.next().unwrap_or_default();
        if segments.next().is_none() {
            return Err(AuthError::MalformedToken);
        }

        let decoded = URL_SAFE_NO_PAD
            .decode(header)
            .map_err(|_| AuthError::MalformedToken)?;
        let fields: Map<String, Value> =
            serde_json::from_slice(&decoded).map_err(|_| AuthError::MalformedToken)?;

        let field = |name: &str| {
            fields
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Ok(Self {
            alg: field("alg"),
            kid: field("kid"),
        })
    }
}
