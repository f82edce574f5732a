use std::pin::Pin;
use std::sync::{Arc, LazyLock, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{select, Either};
use futures::Stream;

use crate::error::{AuthError, AuthResult};
use crate::logger::Logger;
use crate::platform;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("phone-auth/tracker"));

/// How long a request may stay unresolved before observers see `Loading`.
/// Requests that settle faster never flash a spinner.
pub const LOADING_DELAY: Duration = Duration::from_millis(250);

/// Lifecycle of one asynchronous operation as observed by the UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    NotStarted,
    Loading,
    Succeeded,
    Failed,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Succeeded | RequestState::Failed)
    }
}

/// Observable state feed for a single subscriber.
///
/// The current state is delivered first, then every transition. A newer call
/// to [`RequestTracker::subscribe`] closes this stream.
pub struct StateStream {
    receiver: async_channel::Receiver<RequestState>,
}

impl StateStream {
    /// Waits for the next emission; `None` once the stream is replaced.
    pub async fn next(&self) -> Option<RequestState> {
        self.receiver.recv().await.ok()
    }

    /// Returns an already-queued emission without waiting.
    pub fn try_next(&self) -> Option<RequestState> {
        self.receiver.try_recv().ok()
    }

    /// Skips forward to the next `Succeeded` or `Failed` emission.
    pub async fn wait_terminal(&self) -> Option<RequestState> {
        loop {
            match self.receiver.recv().await {
                Ok(state) if state.is_terminal() => return Some(state),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }
}

impl Stream for StateStream {
    type Item = RequestState;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

struct TrackerInner {
    state: RequestState,
    in_flight: bool,
    attempt: u64,
    error: Option<AuthError>,
    delay_cancel: Option<async_channel::Sender<()>>,
    subscriber: Option<async_channel::Sender<RequestState>>,
}

/// Tracks one logical operation (e.g. "request-code") across attempts.
///
/// At most one attempt is in flight at a time; `begin` on a busy tracker
/// fails with [`AuthError::AlreadyInProgress`]. Each attempt arms a delay
/// timer on a detached task; settling or abandoning the attempt cancels the
/// timer through a channel, so a fast response never surfaces `Loading`.
pub struct RequestTracker {
    label: &'static str,
    loading_delay: Duration,
    inner: Arc<Mutex<TrackerInner>>,
}

impl RequestTracker {
    pub fn new(label: &'static str, loading_delay: Duration) -> Self {
        Self {
            label,
            loading_delay,
            inner: Arc::new(Mutex::new(TrackerInner {
                state: RequestState::NotStarted,
                in_flight: false,
                attempt: 0,
                error: None,
                delay_cancel: None,
                subscriber: None,
            })),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn state(&self) -> RequestState {
        self.inner.lock().unwrap().state
    }

    /// Error recorded by the most recent `Failed` transition, until the next
    /// attempt clears it.
    pub fn error(&self) -> Option<AuthError> {
        self.inner.lock().unwrap().error.clone()
    }

    /// Starts a new attempt and arms the flicker-suppression timer.
    pub fn begin(&self) -> AuthResult<()> {
        let (cancel_tx, cancel_rx) = async_channel::bounded::<()>(1);
        let attempt;
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.in_flight {
                return Err(AuthError::AlreadyInProgress(self.label));
            }
            inner.in_flight = true;
            inner.error = None;
            inner.attempt += 1;
            attempt = inner.attempt;
            inner.delay_cancel = Some(cancel_tx);
            set_state(&mut inner, RequestState::NotStarted);
        }

        LOGGER.debug(format!("{} attempt {attempt} started", self.label));

        let weak = Arc::downgrade(&self.inner);
        let delay = self.loading_delay;
        platform::spawn_detached(async move {
            let timer = Box::pin(platform::sleep(delay));
            let cancelled = Box::pin(cancel_rx.recv());
            if let Either::Left(_) = select(timer, cancelled).await {
                surface_loading(&weak, attempt);
            }
        });

        Ok(())
    }

    /// Settles the in-flight attempt. Does nothing when no attempt is active,
    /// so completions for abandoned attempts are harmless.
    pub fn complete(&self, outcome: Result<(), AuthError>) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.in_flight {
            return;
        }
        if let Some(cancel) = inner.delay_cancel.take() {
            let _ = cancel.try_send(());
        }
        inner.in_flight = false;
        match outcome {
            Ok(()) => set_state(&mut inner, RequestState::Succeeded),
            Err(error) => {
                inner.error = Some(error);
                set_state(&mut inner, RequestState::Failed);
            }
        }
    }

    /// Cancels the attempt (if any) and resets observers to `NotStarted`.
    pub fn abandon(&self) {
        let was_active;
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(cancel) = inner.delay_cancel.take() {
                let _ = cancel.try_send(());
            }
            was_active = inner.in_flight || inner.state != RequestState::NotStarted;
            inner.in_flight = false;
            inner.error = None;
            if was_active {
                set_state(&mut inner, RequestState::NotStarted);
            }
        }
        if was_active {
            LOGGER.debug(format!("{} attempt abandoned", self.label));
        }
    }

    /// Replaces the current subscriber. The stream is seeded with the state
    /// at subscription time.
    pub fn subscribe(&self) -> StateStream {
        let (sender, receiver) = async_channel::unbounded();
        let mut inner = self.inner.lock().unwrap();
        let _ = sender.try_send(inner.state);
        inner.subscriber = Some(sender);
        StateStream { receiver }
    }
}

fn set_state(inner: &mut TrackerInner, state: RequestState) {
    inner.state = state;
    if let Some(subscriber) = &inner.subscriber {
        if subscriber.try_send(state).is_err() {
            inner.subscriber = None;
        }
    }
}

// The attempt guard covers the settle-then-restart race: a timer armed for
// attempt N must not mark attempt N+1 as loading.
fn surface_loading(weak: &Weak<Mutex<TrackerInner>>, attempt: u64) {
    if let Some(inner) = weak.upgrade() {
        let mut inner = inner.lock().unwrap();
        if inner.in_flight && inner.attempt == attempt && inner.state == RequestState::NotStarted {
            set_state(&mut inner, RequestState::Loading);
        }
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;

    fn drain(stream: &StateStream) -> Vec<RequestState> {
        let mut seen = Vec::new();
        while let Some(state) = stream.try_next() {
            seen.push(state);
        }
        seen
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn fast_completion_never_surfaces_loading() {
        let tracker = RequestTracker::new("request-code", LOADING_DELAY);
        let stream = tracker.subscribe();

        tracker.begin().unwrap();
        tracker.complete(Ok(()));
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(tracker.state(), RequestState::Succeeded);
        let seen = drain(&stream);
        assert!(!seen.contains(&RequestState::Loading), "saw {seen:?}");
        assert_eq!(seen.last(), Some(&RequestState::Succeeded));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn slow_completion_surfaces_loading_after_the_delay() {
        let tracker = RequestTracker::new("request-code", LOADING_DELAY);
        let stream = tracker.subscribe();

        tracker.begin().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(tracker.state(), RequestState::Loading);

        tracker.complete(Ok(()));
        let seen = drain(&stream);
        assert_eq!(
            seen,
            [
                RequestState::NotStarted,
                RequestState::NotStarted,
                RequestState::Loading,
                RequestState::Succeeded,
            ]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn begin_rejects_a_second_attempt() {
        let tracker = RequestTracker::new("confirm-code", LOADING_DELAY);
        tracker.begin().unwrap();

        assert_eq!(
            tracker.begin(),
            Err(AuthError::AlreadyInProgress("confirm-code"))
        );

        tracker.complete(Ok(()));
        assert!(tracker.begin().is_ok());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn abandon_cancels_the_armed_timer() {
        let tracker = RequestTracker::new("request-code", LOADING_DELAY);
        let stream = tracker.subscribe();

        tracker.begin().unwrap();
        tracker.abandon();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(tracker.state(), RequestState::NotStarted);
        let seen = drain(&stream);
        assert!(!seen.contains(&RequestState::Loading), "saw {seen:?}");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failure_records_the_error_until_the_next_attempt() {
        let tracker = RequestTracker::new("confirm-code", LOADING_DELAY);

        tracker.begin().unwrap();
        tracker.complete(Err(AuthError::Network("boom".into())));
        assert_eq!(tracker.state(), RequestState::Failed);
        assert_eq!(tracker.error(), Some(AuthError::Network("boom".into())));

        tracker.begin().unwrap();
        assert_eq!(tracker.error(), None);
        assert_eq!(tracker.state(), RequestState::NotStarted);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stale_completion_is_ignored() {
        let tracker = RequestTracker::new("request-code", LOADING_DELAY);
        tracker.complete(Ok(()));
        assert_eq!(tracker.state(), RequestState::NotStarted);

        tracker.begin().unwrap();
        tracker.abandon();
        tracker.complete(Err(AuthError::Network("late".into())));
        assert_eq!(tracker.state(), RequestState::NotStarted);
        assert_eq!(tracker.error(), None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn new_subscription_replaces_the_previous_one() {
        let tracker = RequestTracker::new("request-code", LOADING_DELAY);
        let first = tracker.subscribe();
        assert_eq!(first.next().await, Some(RequestState::NotStarted));

        let second = tracker.subscribe();
        tracker.begin().unwrap();
        tracker.complete(Ok(()));

        // The replaced stream ends once drained.
        assert_eq!(first.next().await, None);
        assert_eq!(second.next().await, Some(RequestState::NotStarted));
        assert_eq!(second.wait_terminal().await, Some(RequestState::Succeeded));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn wait_terminal_skips_intermediate_states() {
        let tracker = RequestTracker::new("request-code", LOADING_DELAY);
        let stream = tracker.subscribe();

        tracker.begin().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        tracker.complete(Err(AuthError::Network("offline".into())));

        assert_eq!(stream.wait_terminal().await, Some(RequestState::Failed));
    }
}
