use std::future::Future;
use std::time::Duration;

/// Spawns a background task on the ambient executor.
#[cfg(target_arch = "wasm32")]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    wasm_bindgen_futures::spawn_local(future);
}

/// Spawns a background task on the current tokio runtime, falling back to a
/// lazily built single-threaded runtime outside of one.
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    use std::sync::LazyLock;
    use tokio::runtime::{Builder, Handle, Runtime};

    static FALLBACK_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
        Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build fallback tokio runtime")
    });

    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future);
    } else {
        let _ = FALLBACK_RUNTIME.spawn(future);
    }
}

/// Waits for the given duration in a platform-compatible way.
pub async fn sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }

    sleep_impl(duration).await;
}

#[cfg(target_arch = "wasm32")]
async fn sleep_impl(duration: Duration) {
    gloo_timers::future::sleep(duration).await;
}

#[cfg(not(target_arch = "wasm32"))]
async fn sleep_impl(duration: Duration) {
    tokio::time::sleep(duration).await;
}
