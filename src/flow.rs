use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::error::{AuthError, AuthResult};
use crate::gateway::{AuthGateway, GatewayResult};
use crate::logger::Logger;
use crate::platform;
use crate::store::{CredentialStore, SessionToken};
use crate::tracker::{RequestState, RequestTracker, StateStream, LOADING_DELAY};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("phone-auth/flow"));

/// Default wait before the same phone number may ask for another code.
pub const RESEND_COOLDOWN_SECONDS: u64 = 60;

/// Policy knobs for the sign-in flow. Values are configuration, not derived
/// state; the flow reads them but never changes them.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Length of the re-request cooldown started by each successful code
    /// request.
    pub resend_cooldown: Duration,
    /// Flicker-suppression delay for both trackers.
    pub loading_delay: Duration,
    /// When set, `request_code` during a live cooldown fails with
    /// [`AuthError::CooldownActive`] instead of leaving enforcement to the
    /// caller.
    pub enforce_cooldown: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            resend_cooldown: Duration::from_secs(RESEND_COOLDOWN_SECONDS),
            loading_delay: LOADING_DELAY,
            enforce_cooldown: false,
        }
    }
}

/// Settled progress of the sign-in attempt.
///
/// The phase moves when a response is applied, not when a request is issued;
/// in-flight status lives in the per-operation [`RequestState`]s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthPhase {
    Idle,
    CodeRequested,
    CodeRequestFailed,
    CodeConfirmed,
}

/// Outcome of the most recently issued code request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    Pending,
    Succeeded,
    Failed,
}

/// The one code request the flow currently cares about. Responses carrying
/// any other `request_id` are stale and get dropped.
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub phone: crate::phone::PhoneNumber,
    pub issued_at: DateTime<Utc>,
    pub request_id: u64,
    pub outcome: RequestOutcome,
}

/// Re-request cooldown as a pure function of wall-clock time.
///
/// Nothing counts down: the remaining time is derived from `started_at` on
/// every read, so the window survives screen re-entry and process restarts
/// without bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownWindow {
    started_at: DateTime<Utc>,
    duration: Duration,
}

impl CooldownWindow {
    pub fn new(started_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            started_at,
            duration,
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Whole seconds left, clamped to `[0, duration]`. A `now` before
    /// `started_at` (clock adjustment) reads as the full window.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        let elapsed = now.signed_duration_since(self.started_at).num_seconds();
        let total = self.duration.as_secs();
        if elapsed <= 0 {
            return total;
        }
        total.saturating_sub(elapsed as u64)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining_seconds(now) == 0
    }
}

pub type PhaseListener = Arc<dyn Fn(AuthPhase) + Send + Sync>;

/// Registration handle for a phase listener; dropping it unsubscribes.
pub struct PhaseSubscription {
    cleanup: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl PhaseSubscription {
    fn new<F>(cleanup: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cleanup: Some(Box::new(cleanup)),
        }
    }
}

impl Drop for PhaseSubscription {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

struct FlowState {
    phase: AuthPhase,
    current: Option<VerificationRequest>,
    cooldown: Option<CooldownWindow>,
    confirm_attempt: Option<u64>,
}

impl Default for FlowState {
    fn default() -> Self {
        Self {
            phase: AuthPhase::Idle,
            current: None,
            cooldown: None,
            confirm_attempt: None,
        }
    }
}

/// State machine for the phone sign-in attempt.
///
/// Owns the current [`VerificationRequest`], the [`CooldownWindow`] and the
/// persisted token (through [`CredentialStore`]), and drives the gateway on
/// detached tasks. The state mutex is never held across an await; trackers
/// are always locked from under it (flow before tracker), never the other
/// way around.
pub struct AuthFlow {
    gateway: Arc<dyn AuthGateway>,
    store: CredentialStore,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    state: Mutex<FlowState>,
    request_tracker: RequestTracker,
    confirm_tracker: RequestTracker,
    next_request_id: AtomicU64,
    listeners: Arc<Mutex<Vec<(u64, PhaseListener)>>>,
    next_listener_id: AtomicU64,
}

impl AuthFlow {
    pub fn new(
        gateway: Arc<dyn AuthGateway>,
        store: CredentialStore,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            request_tracker: RequestTracker::new("request-code", config.loading_delay),
            confirm_tracker: RequestTracker::new("confirm-code", config.loading_delay),
            gateway,
            store,
            clock,
            config,
            state: Mutex::new(FlowState::default()),
            next_request_id: AtomicU64::new(1),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(1),
        })
    }

    pub fn phase(&self) -> AuthPhase {
        self.state.lock().unwrap().phase
    }

    /// Snapshot of the request the flow is currently tracking.
    pub fn current_request(&self) -> Option<VerificationRequest> {
        self.state.lock().unwrap().current.clone()
    }

    pub fn cooldown(&self) -> Option<CooldownWindow> {
        self.state.lock().unwrap().cooldown
    }

    pub fn request_code_state(&self) -> RequestState {
        self.request_tracker.state()
    }

    pub fn confirm_code_state(&self) -> RequestState {
        self.confirm_tracker.state()
    }

    pub fn request_code_error(&self) -> Option<AuthError> {
        self.request_tracker.error()
    }

    pub fn confirm_code_error(&self) -> Option<AuthError> {
        self.confirm_tracker.error()
    }

    /// Re-subscribes to the code-request lifecycle (screen re-entry).
    pub fn observe_request_code(&self) -> StateStream {
        self.request_tracker.subscribe()
    }

    /// Re-subscribes to the code-confirmation lifecycle.
    pub fn observe_confirm_code(&self) -> StateStream {
        self.confirm_tracker.subscribe()
    }

    /// True when no cooldown window exists or the window has expired.
    pub fn can_rerequest(&self) -> bool {
        let now = self.clock.now();
        match self.state.lock().unwrap().cooldown {
            None => true,
            Some(window) => window.is_expired(now),
        }
    }

    /// Seconds left on the cooldown, recomputed from the clock on every call.
    pub fn remaining_cooldown_seconds(&self) -> u64 {
        let now = self.clock.now();
        self.state
            .lock()
            .unwrap()
            .cooldown
            .map_or(0, |window| window.remaining_seconds(now))
    }

    /// Registers a listener invoked after every phase transition.
    pub fn on_phase_change<F>(&self, listener: F) -> PhaseSubscription
    where
        F: Fn(AuthPhase) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .unwrap()
            .push((id, Arc::new(listener)));

        let listeners = Arc::downgrade(&self.listeners);
        PhaseSubscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                if let Ok(mut guard) = listeners.lock() {
                    guard.retain(|(listener_id, _)| *listener_id != id);
                }
            }
        })
    }

    /// Issues a code request for an already-normalized phone number.
    ///
    /// An in-flight request is superseded: its tracker attempt is abandoned
    /// and its eventual response becomes stale. Whether a live cooldown
    /// blocks the call depends on [`SessionConfig::enforce_cooldown`].
    pub fn request_code(
        self: &Arc<Self>,
        phone: &crate::phone::PhoneNumber,
    ) -> AuthResult<StateStream> {
        let e164 = match phone.e164() {
            Some(e164) => e164.to_string(),
            None => return Err(AuthError::InvalidPhoneNumber(phone.raw().to_string())),
        };

        let now = self.clock.now();
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let stream;
        {
            let mut state = self.state.lock().unwrap();
            if self.config.enforce_cooldown {
                if let Some(window) = &state.cooldown {
                    let remaining = window.remaining_seconds(now);
                    if remaining > 0 {
                        return Err(AuthError::CooldownActive {
                            remaining_seconds: remaining,
                        });
                    }
                }
            }

            if let Some(previous) = &state.current {
                if previous.outcome == RequestOutcome::Pending {
                    LOGGER.debug(format!(
                        "Superseding code request {} with request {request_id}",
                        previous.request_id
                    ));
                }
            }
            self.request_tracker.abandon();
            state.current = Some(VerificationRequest {
                phone: phone.clone(),
                issued_at: now,
                request_id,
                outcome: RequestOutcome::Pending,
            });
            self.request_tracker.begin()?;
            stream = self.request_tracker.subscribe();
        }

        let flow = Arc::clone(self);
        platform::spawn_detached(async move {
            flow.drive_code_request(request_id, e164).await;
        });
        Ok(stream)
    }

    /// Sends the received code for verification.
    ///
    /// Requires a successfully requested code (`CodeRequested`); a second
    /// confirmation while one is in flight is rejected.
    pub fn confirm_code(self: &Arc<Self>, code: &str) -> AuthResult<StateStream> {
        let attempt_id;
        let phone;
        let stream;
        {
            let mut state = self.state.lock().unwrap();
            if state.phase != AuthPhase::CodeRequested {
                return Err(AuthError::NoActiveVerification);
            }
            phone = match state
                .current
                .as_ref()
                .and_then(|request| request.phone.e164())
            {
                Some(e164) => e164.to_string(),
                None => return Err(AuthError::NoActiveVerification),
            };
            self.confirm_tracker.begin()?;
            attempt_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
            state.confirm_attempt = Some(attempt_id);
            stream = self.confirm_tracker.subscribe();
        }

        let flow = Arc::clone(self);
        let code = code.to_string();
        platform::spawn_detached(async move {
            flow.drive_code_confirm(attempt_id, phone, code).await;
        });
        Ok(stream)
    }

    /// Returns the flow to `Idle`: drops the tracked request, the cooldown
    /// and both tracker attempts. Responses still in flight become no-ops.
    pub fn reset(&self) {
        let phase_change = {
            let mut state = self.state.lock().unwrap();
            state.current = None;
            state.cooldown = None;
            state.confirm_attempt = None;
            self.request_tracker.abandon();
            self.confirm_tracker.abandon();
            set_phase(&mut state, AuthPhase::Idle)
        };
        if let Some(phase) = phase_change {
            self.notify_phase(phase);
        }
        LOGGER.debug("Authentication flow reset");
    }

    pub async fn session_token(&self) -> AuthResult<Option<SessionToken>> {
        self.store.get().await
    }

    pub async fn has_session(&self) -> AuthResult<bool> {
        Ok(self.store.get().await?.is_some())
    }

    /// Removes the persisted token. The flow is the only writer of the
    /// credential store, so logout goes through here.
    pub async fn clear_session(&self) -> AuthResult<()> {
        self.store.clear().await
    }

    async fn drive_code_request(&self, request_id: u64, phone: String) {
        LOGGER.debug(format!("Sending code request {request_id}"));
        let result = self.gateway.post_code_request(&phone).await;
        self.apply_code_request_outcome(request_id, result);
    }

    fn apply_code_request_outcome(&self, request_id: u64, result: GatewayResult<()>) {
        let phase_change = {
            let mut state = self.state.lock().unwrap();
            let is_current = state
                .current
                .as_ref()
                .map(|request| request.request_id == request_id)
                .unwrap_or(false);
            if !is_current {
                LOGGER.debug(format!(
                    "Dropping response for superseded code request {request_id}"
                ));
                return;
            }

            match result {
                Ok(()) => {
                    if let Some(current) = state.current.as_mut() {
                        current.outcome = RequestOutcome::Succeeded;
                    }
                    state.cooldown = Some(CooldownWindow::new(
                        self.clock.now(),
                        self.config.resend_cooldown,
                    ));
                    self.request_tracker.complete(Ok(()));
                    set_phase(&mut state, AuthPhase::CodeRequested)
                }
                Err(err) => {
                    if let Some(current) = state.current.as_mut() {
                        current.outcome = RequestOutcome::Failed;
                    }
                    let error = AuthError::from(err);
                    LOGGER.error(format!("Code request {request_id} failed: {error}"));
                    // No new cooldown; a window from an earlier success stays.
                    self.request_tracker.complete(Err(error));
                    set_phase(&mut state, AuthPhase::CodeRequestFailed)
                }
            }
        };
        if let Some(phase) = phase_change {
            self.notify_phase(phase);
        }
    }

    async fn drive_code_confirm(&self, attempt_id: u64, phone: String, code: String) {
        LOGGER.debug(format!("Sending confirm attempt {attempt_id}"));
        let result = self.gateway.post_code_confirm(&phone, &code).await;

        let response = match result {
            Err(err) => {
                let mut state = self.state.lock().unwrap();
                if state.confirm_attempt != Some(attempt_id) {
                    LOGGER.debug(format!(
                        "Dropping response for stale confirm attempt {attempt_id}"
                    ));
                    return;
                }
                state.confirm_attempt = None;
                let error = AuthError::from(err);
                LOGGER.error(format!("Code confirmation failed: {error}"));
                // Phase and cooldown are untouched so the user can retype the
                // code or wait out the window and resend.
                self.confirm_tracker.complete(Err(error));
                return;
            }
            Ok(response) => response,
        };

        if !self.confirm_attempt_current(attempt_id) {
            LOGGER.debug(format!(
                "Dropping response for stale confirm attempt {attempt_id}"
            ));
            return;
        }

        let token = SessionToken::from_confirmation(response);
        // What the slot held before this attempt; a raced reset hands it back.
        let displaced = match self.store.get().await {
            Ok(existing) => existing,
            Err(error) => {
                LOGGER.debug(format!("Could not snapshot the stored token: {error}"));
                None
            }
        };
        if let Err(error) = self.store.set(&token).await {
            let mut state = self.state.lock().unwrap();
            if state.confirm_attempt != Some(attempt_id) {
                return;
            }
            state.confirm_attempt = None;
            LOGGER.warn(format!("Could not persist session token: {error}"));
            self.confirm_tracker.complete(Err(error));
            return;
        }

        // Staleness is decided in a plain block; the guard must be gone
        // before the rollback below awaits.
        let stale;
        let mut phase_change = None;
        {
            let mut state = self.state.lock().unwrap();
            stale = state.confirm_attempt != Some(attempt_id);
            if !stale {
                state.confirm_attempt = None;
                self.confirm_tracker.complete(Ok(()));
                phase_change = set_phase(&mut state, AuthPhase::CodeConfirmed);
            }
        }
        if stale {
            // Reset raced the write. The slot goes back to its previous
            // holder unless a later attempt already owns it.
            LOGGER.debug(format!(
                "Dropping response for stale confirm attempt {attempt_id}"
            ));
            if let Err(error) = self.store.restore(&token, displaced.as_ref()).await {
                LOGGER.warn(format!(
                    "Could not roll back an abandoned confirmation: {error}"
                ));
            }
            return;
        }
        LOGGER.info("Phone sign-in confirmed");
        if let Some(phase) = phase_change {
            self.notify_phase(phase);
        }
    }

    fn confirm_attempt_current(&self, attempt_id: u64) -> bool {
        self.state.lock().unwrap().confirm_attempt == Some(attempt_id)
    }

    fn notify_phase(&self, phase: AuthPhase) {
        let listeners = self
            .listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect::<Vec<_>>();
        for listener in listeners {
            listener(phase);
        }
    }
}

fn set_phase(state: &mut FlowState, phase: AuthPhase) -> Option<AuthPhase> {
    if state.phase == phase {
        None
    } else {
        state.phase = phase;
        Some(phase)
    }
}
