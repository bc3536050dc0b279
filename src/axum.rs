use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, Extensions, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::validator::HEALTH_PATH;
use crate::Validator;

/// Why a request was rejected.
///
/// Every variant renders as `401 Unauthorized` except [`AuthError::AuthorizationDenied`],
/// which renders as `403 Forbidden`. The body never says more than that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No `Authorization: Bearer <token>` header
    #[error("No credential")]
    NoCredential,

    /// The token header segment is not base64url JSON
    #[error("Malformed token")]
    MalformedToken,

    /// The token claims an algorithm other than RS256
    #[error("Unsupported algorithm")]
    UnsupportedAlgorithm,

    /// No registered key set holds the token's key id
    #[error("Key not found")]
    KeyNotFound,

    /// The matching key is not published for signing
    #[error("Key not usable for signing")]
    KeyNotUsableForSigning,

    #[error("Invalid signature")]
    SignatureInvalid,

    /// Audience, issuer, or validity window check failed
    #[error("Invalid claims")]
    ClaimsInvalid,

    /// The token is valid but lacks the required scope or role
    #[error("Authorization denied")]
    AuthorizationDenied,

    #[error("Missing principal")]
    PrincipalMissing,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::AuthorizationDenied => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let msg = match status {
            StatusCode::FORBIDDEN => "Forbidden",
            _ => "Unauthorized",
        };

        (status, Json(json!({ "errors": [{ "message": msg }] }))).into_response()
    }
}

/// Private extension slot, so nothing outside this crate can set or spoof the principal.
#[derive(Debug, Clone)]
struct PrincipalSlot(Arc<str>);

/// Stores the authenticated principal id on a request.
pub fn attach_principal(extensions: &mut Extensions, principal_id: impl Into<String>) {
    let id: String = principal_id.into();
    extensions.insert(PrincipalSlot(Arc::from(id)));
}

/// The authenticated principal id, or `""` when the request carries none.
pub fn read_principal(extensions: &Extensions) -> &str {
    extensions
        .get::<PrincipalSlot>()
        .map(|slot| &*slot.0)
        .unwrap_or_default()
}

/// Extractor for the principal attached by [`request_gate`].
///
/// ```ignore
/// async fn handler(Principal(user_id): Principal) -> String {
///     user_id
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

impl<S> axum::extract::FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        match read_principal(&parts.extensions) {
            "" => Err(AuthError::NoCredential),
            id => Ok(Principal(id.to_string())),
        }
    }
}

fn should_skip(validator: &Validator, req: &Request) -> bool {
    !validator.config().require_auth()
        || req.method() == Method::OPTIONS
        || req.uri().path() == HEALTH_PATH
}

/// Middleware that authenticates every request before it reaches the router.
///
/// Health checks, CORS preflights and validators with authentication disabled
/// pass straight through without a principal.
///
/// ```ignore
/// let app = Router::new()
///     .route("/query", post(handler))
///     .layer(axum::middleware::from_fn_with_state(validator, request_gate));
/// ```
pub async fn request_gate(
    State(validator): State<Validator>,
    mut req: Request,
    next: Next,
) -> Response {
    if should_skip(&validator, &req) {
        return next.run(req).await;
    }

    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    match validator.authorize(authorization.as_deref()).await {
        Ok(principal_id) => {
            attach_principal(req.extensions_mut(), principal_id);
            next.run(req).await
        }
        Err(err) => {
            tracing::debug!(error = %err, path = req.uri().path(), "Rejected request");
            err.into_response()
        }
    }
}
