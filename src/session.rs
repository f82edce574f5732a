use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::error::{AuthError, AuthResult};
use crate::flow::{AuthFlow, AuthPhase, PhaseSubscription, SessionConfig};
use crate::gateway::AuthGateway;
use crate::phone::{self, PhoneNumber, Region, ValidationError};
use crate::store::{CredentialStore, MemoryStorage, SessionToken, StorageBackend};
use crate::tracker::{RequestState, StateStream};

/// Length of the one-time code the backend sends out.
pub const VERIFICATION_CODE_LENGTH: usize = 6;

/// Validates a verification-code input field: exactly six digits.
///
/// # Examples
///
/// ```
/// use phone_auth_core::session::validate_code;
///
/// assert!(validate_code("123456").is_none());
/// assert!(validate_code("12345").is_some());
/// assert!(validate_code("12345a").is_some());
/// ```
pub fn validate_code(value: &str) -> Option<ValidationError> {
    let well_formed = value.chars().count() == VERIFICATION_CODE_LENGTH
        && value.chars().all(|ch| ch.is_ascii_digit());
    if well_formed {
        None
    } else {
        Some(ValidationError {
            value: value.to_string(),
        })
    }
}

/// Screen-facing entry point for phone sign-in.
///
/// Wraps the flow state machine with the session's region: free-form phone
/// input is normalized here, so everything past this boundary works with
/// E.164 values only.
pub struct AuthSession {
    flow: Arc<AuthFlow>,
    region: Region,
}

impl AuthSession {
    pub fn builder(gateway: Arc<dyn AuthGateway>) -> SessionBuilder {
        SessionBuilder::new(gateway)
    }

    pub fn region(&self) -> Region {
        self.region
    }

    /// Normalizes free-form input against the session region.
    pub fn normalize(&self, raw: &str) -> PhoneNumber {
        PhoneNumber::normalize(raw, self.region)
    }

    pub fn validate_phone(&self, value: &str) -> Option<ValidationError> {
        phone::validate_phone(value, self.region)
    }

    pub fn validate_code(&self, value: &str) -> Option<ValidationError> {
        validate_code(value)
    }

    /// Normalizes `raw_phone` and asks the backend to send a code to it.
    pub fn request_code(&self, raw_phone: &str) -> AuthResult<StateStream> {
        let number = self.normalize(raw_phone);
        self.flow.request_code(&number)
    }

    /// Sends the received code for verification.
    pub fn confirm_code(&self, code: &str) -> AuthResult<StateStream> {
        self.flow.confirm_code(code)
    }

    pub fn phase(&self) -> AuthPhase {
        self.flow.phase()
    }

    pub fn can_rerequest(&self) -> bool {
        self.flow.can_rerequest()
    }

    pub fn remaining_cooldown_seconds(&self) -> u64 {
        self.flow.remaining_cooldown_seconds()
    }

    pub fn request_code_state(&self) -> RequestState {
        self.flow.request_code_state()
    }

    pub fn confirm_code_state(&self) -> RequestState {
        self.flow.confirm_code_state()
    }

    pub fn request_code_error(&self) -> Option<AuthError> {
        self.flow.request_code_error()
    }

    pub fn confirm_code_error(&self) -> Option<AuthError> {
        self.flow.confirm_code_error()
    }

    pub fn observe_request_code(&self) -> StateStream {
        self.flow.observe_request_code()
    }

    pub fn observe_confirm_code(&self) -> StateStream {
        self.flow.observe_confirm_code()
    }

    pub fn on_phase_change<F>(&self, listener: F) -> PhaseSubscription
    where
        F: Fn(AuthPhase) + Send + Sync + 'static,
    {
        self.flow.on_phase_change(listener)
    }

    /// Abandons the current attempt; see [`AuthFlow::reset`].
    pub fn reset(&self) {
        self.flow.reset();
    }

    pub async fn has_session(&self) -> AuthResult<bool> {
        self.flow.has_session().await
    }

    pub async fn session_token(&self) -> AuthResult<Option<SessionToken>> {
        self.flow.session_token().await
    }

    /// Clears the persisted token and resets the flow. The flow is reset
    /// even when clearing fails; the storage error is still reported.
    pub async fn logout(&self) -> AuthResult<()> {
        let cleared = self.flow.clear_session().await;
        self.flow.reset();
        cleared
    }
}

/// Builder wiring the session's collaborators, with in-memory storage and
/// the system clock as defaults.
pub struct SessionBuilder {
    gateway: Arc<dyn AuthGateway>,
    storage: Option<Arc<dyn StorageBackend>>,
    clock: Option<Arc<dyn Clock>>,
    region: Region,
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new(gateway: Arc<dyn AuthGateway>) -> Self {
        Self {
            gateway,
            storage: None,
            clock: None,
            region: Region::DEFAULT,
            config: SessionConfig::default(),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> AuthSession {
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let flow = AuthFlow::new(
            self.gateway,
            CredentialStore::new(storage),
            clock,
            self.config,
        );
        AuthSession {
            flow,
            region: self.region,
        }
    }
}
