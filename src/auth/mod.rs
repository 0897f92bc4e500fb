mod helpers;
mod middleware;
pub mod signature;
mod strategy;
mod token;

pub use helpers::{SessionValidationError, ValidatedSession, extract_bearer_token, validate_session};
pub use middleware::{AuthError, RequireSession, SignedJson, SignedPayload};
pub use strategy::{AppSignature, AuthRequest, AuthStrategy, OperatorSession, VerifiedApp};
pub use token::{TokenGenerator, generate_application_secret, parse_token};
