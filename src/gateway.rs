use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Opaque transport failure. The core never inspects the message; it is
/// carried through to the caller as [`crate::error::AuthError::Network`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayError {
    message: String,
}

impl GatewayError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for GatewayError {}

/// Successful code-confirmation payload.
///
/// `created_at` is the backend-issued token timestamp in seconds since the
/// Unix epoch and is persisted verbatim. `invitation` is an opaque payload
/// some deployments attach to first sign-ins; the core stores it untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmCodeResponse {
    pub token: String,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invitation: Option<serde_json::Value>,
}

/// Transport seam for the two verification endpoints.
///
/// Implementations receive phone numbers already normalized to E.164 and are
/// expected to perform exactly one attempt per call; retry policy belongs to
/// the caller.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait AuthGateway: Send + Sync {
    /// Asks the backend to send a one-time code to `phone`.
    async fn post_code_request(&self, phone: &str) -> GatewayResult<()>;

    /// Exchanges `phone` plus the received `code` for a session token.
    async fn post_code_confirm(&self, phone: &str, code: &str)
        -> GatewayResult<ConfirmCodeResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_payload_tolerates_missing_optional_fields() {
        let parsed: ConfirmCodeResponse =
            serde_json::from_str(r#"{"token":"tok-1","created_at":1714564800}"#).unwrap();
        assert_eq!(parsed.token, "tok-1");
        assert_eq!(parsed.created_at, 1714564800);
        assert_eq!(parsed.user_uuid, None);
        assert_eq!(parsed.invitation, None);
    }

    #[test]
    fn optional_fields_are_omitted_when_absent() {
        let response = ConfirmCodeResponse {
            token: "tok-2".into(),
            created_at: 1714564800,
            user_uuid: None,
            invitation: None,
        };
        let encoded = serde_json::to_string(&response).unwrap();
        assert_eq!(encoded, r#"{"token":"tok-2","created_at":1714564800}"#);
    }
}
