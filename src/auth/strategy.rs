use axum::http::{HeaderMap, header::AUTHORIZATION};
use chrono::Utc;

use super::helpers::{SessionValidationError, extract_bearer_token, validate_session};
use super::middleware::AuthError;
use super::signature::{self, FRESHNESS_WINDOW_MS, SignedHeaders};
use crate::server::AppState;
use crate::types::Operator;

/// The parts of an inbound request an authentication strategy may inspect.
pub struct AuthRequest<'a> {
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
}

/// One trust model. Human control-plane calls and signed machine calls
/// authenticate through different implementations of this trait.
pub trait AuthStrategy {
    type Identity;

    fn authenticate(
        &self,
        state: &AppState,
        request: &AuthRequest<'_>,
    ) -> Result<Self::Identity, AuthError>;
}

/// Bearer session tokens issued to operators.
pub struct OperatorSession;

impl AuthStrategy for OperatorSession {
    type Identity = Operator;

    fn authenticate(
        &self,
        state: &AppState,
        request: &AuthRequest<'_>,
    ) -> Result<Operator, AuthError> {
        let auth_header = request
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        let raw_token = extract_bearer_token(auth_header)
            .map_err(AuthError::from)?
            .ok_or(AuthError::MissingAuth)?;

        let validated = validate_session(state.store.as_ref(), &raw_token)?;
        Ok(validated.operator)
    }
}

/// An application whose request signature, freshness and nonce were verified.
#[derive(Debug, Clone)]
pub struct VerifiedApp {
    pub key: String,
}

/// HMAC-signed requests from applications holding a shared secret.
pub struct AppSignature;

impl AuthStrategy for AppSignature {
    type Identity = VerifiedApp;

    fn authenticate(
        &self,
        state: &AppState,
        request: &AuthRequest<'_>,
    ) -> Result<VerifiedApp, AuthError> {
        let signed = SignedHeaders::from_headers(request.headers).ok_or(AuthError::MissingAuth)?;
        let now_ms = Utc::now().timestamp_millis();

        let time_ms =
            signature::parse_fresh_time(&signed.time, now_ms).ok_or(AuthError::StaleRequest)?;

        let application = state
            .store
            .get_application(&signed.app_key)
            .map_err(|_| AuthError::InternalError)?
            .ok_or(AuthError::UnknownApplication)?;

        if !signature::verify(
            &application.secret,
            &signed.time,
            &signed.nonce,
            request.body,
            &signed.signature,
        ) {
            tracing::warn!("Rejected signature from application {}", signed.app_key);
            return Err(AuthError::BadSignature);
        }

        let fresh = state
            .store
            .record_nonce(
                &signed.app_key,
                &signed.nonce,
                time_ms.saturating_add(FRESHNESS_WINDOW_MS),
                now_ms,
            )
            .map_err(|_| AuthError::InternalError)?;
        if !fresh {
            tracing::warn!("Replayed nonce from application {}", signed.app_key);
            return Err(AuthError::ReplayedNonce);
        }

        Ok(VerifiedApp {
            key: application.key,
        })
    }
}

impl From<SessionValidationError> for AuthError {
    fn from(e: SessionValidationError) -> Self {
        match e {
            SessionValidationError::InvalidScheme => AuthError::InvalidScheme,
            SessionValidationError::InvalidToken => AuthError::InvalidToken,
            SessionValidationError::TokenExpired => AuthError::TokenExpired,
            SessionValidationError::InternalError => AuthError::InternalError,
        }
    }
}
