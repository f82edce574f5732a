use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use async_lock::Mutex as AsyncMutex;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};
use crate::gateway::ConfirmCodeResponse;
use crate::logger::Logger;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("phone-auth/store"));

const TOKEN_KEY: &str = "token";

/// Persisted session credentials.
///
/// `created_at` is the backend-issued timestamp (seconds since the Unix
/// epoch), stored verbatim so the server stays the authority on token age.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionToken {
    pub token: String,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invitation: Option<serde_json::Value>,
}

impl SessionToken {
    /// Converts a confirmation payload into the persisted model.
    pub fn from_confirmation(response: ConfirmCodeResponse) -> Self {
        Self {
            token: response.token,
            created_at: response.created_at,
            user_uuid: response.user_uuid,
            invitation: response.invitation,
        }
    }
}

/// Keyed string storage the host platform provides.
///
/// Implementations plug in device storage (files, keychains, browser
/// storage). Absent keys read as `None`; failures map to
/// [`AuthError::Storage`].
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait StorageBackend: Send + Sync {
    async fn read(&self, key: &str) -> AuthResult<Option<String>>;
    async fn write(&self, key: &str, value: &str) -> AuthResult<()>;
    async fn remove(&self, key: &str) -> AuthResult<()>;
}

/// Owns the persisted [`SessionToken`].
///
/// All operations serialize through one async mutex, so readers never
/// observe a torn write and back-to-back writes land in call order.
pub struct CredentialStore {
    backend: Arc<dyn StorageBackend>,
    guard: AsyncMutex<()>,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            guard: AsyncMutex::new(()),
        }
    }

    /// Reads the stored token. `Ok(None)` when nothing was persisted yet.
    pub async fn get(&self) -> AuthResult<Option<SessionToken>> {
        let _guard = self.guard.lock().await;
        match self.backend.read(TOKEN_KEY).await? {
            None => Ok(None),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(token) => Ok(Some(token)),
                Err(err) => {
                    LOGGER.warn(format!("Stored session token is unreadable: {err}"));
                    Err(AuthError::Storage(format!(
                        "Failed to parse stored session token: {err}"
                    )))
                }
            },
        }
    }

    pub async fn set(&self, token: &SessionToken) -> AuthResult<()> {
        let serialized = serde_json::to_string(token).map_err(|err| {
            AuthError::Storage(format!("Failed to serialize session token: {err}"))
        })?;
        let _guard = self.guard.lock().await;
        self.backend.write(TOKEN_KEY, &serialized).await?;
        LOGGER.debug("Session token persisted");
        Ok(())
    }

    pub async fn clear(&self) -> AuthResult<()> {
        let _guard = self.guard.lock().await;
        self.backend.remove(TOKEN_KEY).await?;
        LOGGER.debug("Session token cleared");
        Ok(())
    }

    /// Rolls back a write that turned out to belong to an abandoned
    /// confirmation.
    ///
    /// `previous` goes back in (or the slot is cleared when there was
    /// nothing before it) only while the slot still holds `written`;
    /// anything a later attempt stored stays. Check and write share one
    /// guard acquisition.
    pub async fn restore(
        &self,
        written: &SessionToken,
        previous: Option<&SessionToken>,
    ) -> AuthResult<()> {
        let _guard = self.guard.lock().await;
        let current = self
            .backend
            .read(TOKEN_KEY)
            .await?
            .and_then(|raw| serde_json::from_str::<SessionToken>(&raw).ok());
        if current.as_ref() != Some(written) {
            return Ok(());
        }
        match previous {
            Some(token) => {
                let serialized = serde_json::to_string(token).map_err(|err| {
                    AuthError::Storage(format!("Failed to serialize session token: {err}"))
                })?;
                self.backend.write(TOKEN_KEY, &serialized).await?;
                LOGGER.debug("Displaced session token put back");
            }
            None => {
                self.backend.remove(TOKEN_KEY).await?;
                LOGGER.debug("Abandoned session token cleared");
            }
        }
        Ok(())
    }
}

/// Process-local backend for tests and previews.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl StorageBackend for MemoryStorage {
    async fn read(&self, key: &str) -> AuthResult<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> AuthResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> AuthResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
mod file;

#[cfg(not(target_arch = "wasm32"))]
pub use file::FileStorage;

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;

    fn sample_token() -> SessionToken {
        SessionToken {
            token: "tok-123".into(),
            created_at: 1714564800,
            user_uuid: Some("uuid-1".into()),
            invitation: None,
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn get_before_any_write_is_none() {
        let store = CredentialStore::new(Arc::new(MemoryStorage::new()));
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn set_get_clear_round_trip() {
        let store = CredentialStore::new(Arc::new(MemoryStorage::new()));
        let token = sample_token();

        store.set(&token).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(token));

        store.clear().await.unwrap();
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unreadable_payload_surfaces_a_storage_error() {
        let backend = Arc::new(MemoryStorage::new());
        backend.write(TOKEN_KEY, "not json").await.unwrap();

        let store = CredentialStore::new(backend);
        match store.get().await {
            Err(AuthError::Storage(_)) => {}
            other => panic!("expected a storage error, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn restore_puts_the_displaced_token_back() {
        let store = CredentialStore::new(Arc::new(MemoryStorage::new()));
        let prior = sample_token();
        store.set(&prior).await.unwrap();

        let abandoned = SessionToken {
            token: "tok-abandoned".into(),
            created_at: 1714568400,
            user_uuid: None,
            invitation: None,
        };
        store.set(&abandoned).await.unwrap();

        store.restore(&abandoned, Some(&prior)).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(prior));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn restore_without_a_predecessor_clears_the_slot() {
        let store = CredentialStore::new(Arc::new(MemoryStorage::new()));
        let abandoned = sample_token();
        store.set(&abandoned).await.unwrap();

        store.restore(&abandoned, None).await.unwrap();
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn restore_leaves_a_later_write_alone() {
        let store = CredentialStore::new(Arc::new(MemoryStorage::new()));
        let abandoned = sample_token();
        store.set(&abandoned).await.unwrap();

        let newer = SessionToken {
            token: "tok-newer".into(),
            created_at: 1714572000,
            user_uuid: None,
            invitation: None,
        };
        store.set(&newer).await.unwrap();

        store.restore(&abandoned, Some(&sample_token())).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(newer));
    }

    #[test]
    fn confirmation_payload_maps_onto_the_token_model() {
        let token = SessionToken::from_confirmation(ConfirmCodeResponse {
            token: "tok-9".into(),
            created_at: 42,
            user_uuid: None,
            invitation: Some(serde_json::json!([{ "salon": "downtown" }])),
        });
        assert_eq!(token.token, "tok-9");
        assert_eq!(token.created_at, 42);
        assert!(token.invitation.is_some());
    }
}
