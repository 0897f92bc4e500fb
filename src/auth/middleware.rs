use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRequest, FromRequestParts, Request},
    http::{HeaderValue, StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::helpers::extract_bearer_token;
use super::signature::SignedHeaders;
use super::strategy::{AppSignature, AuthRequest, AuthStrategy, OperatorSession, VerifiedApp};
use crate::server::AppState;
use crate::types::Operator;

/// Extractor that requires a valid operator session.
pub struct RequireSession {
    pub operator: Operator,
    /// Raw bearer token, forwarded when calling sibling services.
    pub token: String,
}

/// A JSON body whose HMAC signature, freshness and nonce were verified.
pub struct SignedJson<T> {
    pub app: VerifiedApp,
    pub payload: T,
}

/// Structural checks on a signed body, run before any signature work.
pub trait SignedPayload {
    fn validate(&self) -> Result<(), String>;
}

#[derive(Debug)]
pub enum AuthError {
    MissingAuth,
    InvalidScheme,
    InvalidToken,
    TokenExpired,
    StaleRequest,
    UnknownApplication,
    BadSignature,
    ReplayedNonce,
    InvalidBody(String),
    InternalError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required".into()),
            AuthError::InvalidScheme => {
                (StatusCode::UNAUTHORIZED, "Invalid authorization scheme".into())
            }
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token".into()),
            AuthError::TokenExpired => (StatusCode::UNAUTHORIZED, "Token expired".into()),
            AuthError::StaleRequest => (StatusCode::UNAUTHORIZED, "Request expired".into()),
            AuthError::UnknownApplication => {
                (StatusCode::UNAUTHORIZED, "Unknown application".into())
            }
            AuthError::BadSignature => (StatusCode::UNAUTHORIZED, "Invalid signature".into()),
            AuthError::ReplayedNonce => (StatusCode::UNAUTHORIZED, "Nonce already used".into()),
            AuthError::InvalidBody(message) => (StatusCode::BAD_REQUEST, message),
            AuthError::InternalError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = json!({ "data": null, "error": message });

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                "WWW-Authenticate",
                HeaderValue::from_static("Bearer realm=\"openone\""),
            );
        }

        response
    }
}

impl FromRequestParts<Arc<AppState>> for RequireSession {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let request = AuthRequest {
            headers: &parts.headers,
            body: &[],
        };
        let operator = OperatorSession.authenticate(state, &request)?;

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| extract_bearer_token(Some(h)).ok().flatten())
            .unwrap_or_default();

        Ok(RequireSession { operator, token })
    }
}

impl<T> FromRequest<Arc<AppState>> for SignedJson<T>
where
    T: DeserializeOwned + SignedPayload + Send,
{
    type Rejection = AuthError;

    async fn from_request(req: Request, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let headers = req.headers().clone();
        if SignedHeaders::from_headers(&headers).is_none() {
            return Err(AuthError::MissingAuth);
        }

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| AuthError::InvalidBody(e.body_text()))?;

        let payload: T = serde_json::from_slice(&body)
            .map_err(|e| AuthError::InvalidBody(format!("Invalid JSON body: {e}")))?;
        payload.validate().map_err(AuthError::InvalidBody)?;

        let request = AuthRequest {
            headers: &headers,
            body: &body,
        };
        let app = AppSignature.authenticate(state, &request)?;

        Ok(SignedJson { app, payload })
    }
}
