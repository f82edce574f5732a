use std::fmt;

use crate::gateway::GatewayError;

pub type AuthResult<T> = Result<T, AuthError>;

/// Errors surfaced by the sign-in flow.
///
/// The first four variants are local precondition failures and are returned
/// synchronously, before any collaborator is touched. `Network` and `Storage`
/// wrap opaque collaborator messages and arrive through the request trackers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    InvalidPhoneNumber(String),
    AlreadyInProgress(&'static str),
    NoActiveVerification,
    CooldownActive { remaining_seconds: u64 },
    Network(String),
    Storage(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidPhoneNumber(raw) => write!(f, "Invalid phone number: {raw}"),
            AuthError::AlreadyInProgress(operation) => {
                write!(f, "{operation} is already in progress")
            }
            AuthError::NoActiveVerification => {
                write!(f, "No verification code was requested for this session")
            }
            AuthError::CooldownActive { remaining_seconds } => {
                write!(f, "Code re-request available in {remaining_seconds}s")
            }
            AuthError::Network(message) => write!(f, "Network error: {message}"),
            AuthError::Storage(message) => write!(f, "Storage error: {message}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<GatewayError> for AuthError {
    fn from(error: GatewayError) -> Self {
        AuthError::Network(error.to_string())
    }
}
