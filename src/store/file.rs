use std::collections::HashMap;
use std::fs::{remove_file, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AuthError, AuthResult};
use crate::store::StorageBackend;

/// Backend keeping all keys in a single JSON map file.
///
/// Suited to desktop hosts and local tooling. Parent directories are created
/// on first write; removing the last key removes the file.
#[derive(Clone)]
pub struct FileStorage {
    path: Arc<PathBuf>,
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage").field("path", &self.path).finish()
    }
}

impl FileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: Arc::new(path.as_ref().to_path_buf()),
        }
    }

    fn load_map(&self) -> AuthResult<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let mut file = File::open(&*self.path)
            .map_err(|err| AuthError::Storage(format!("Failed to open session store: {err}")))?;
        let mut buffer = String::new();
        file.read_to_string(&mut buffer)
            .map_err(|err| AuthError::Storage(format!("Failed to read session store: {err}")))?;

        if buffer.is_empty() {
            return Ok(HashMap::new());
        }

        serde_json::from_str(&buffer)
            .map_err(|err| AuthError::Storage(format!("Failed to parse session store: {err}")))
    }

    fn save_map(&self, map: &HashMap<String, String>) -> AuthResult<()> {
        let serialized = serde_json::to_string(map)
            .map_err(|err| AuthError::Storage(format!("Failed to serialize session store: {err}")))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                AuthError::Storage(format!("Failed to create session store directory: {err}"))
            })?;
        }
        let mut file = File::create(&*self.path)
            .map_err(|err| AuthError::Storage(format!("Failed to create session store: {err}")))?;
        file.write_all(serialized.as_bytes())
            .map_err(|err| AuthError::Storage(format!("Failed to write session store: {err}")))
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn read(&self, key: &str) -> AuthResult<Option<String>> {
        Ok(self.load_map()?.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> AuthResult<()> {
        let mut map = self.load_map()?;
        map.insert(key.to_string(), value.to_string());
        self.save_map(&map)
    }

    async fn remove(&self, key: &str) -> AuthResult<()> {
        let mut map = self.load_map()?;
        if map.remove(key).is_none() {
            return Ok(());
        }
        if map.is_empty() {
            if self.path.exists() {
                remove_file(&*self.path).map_err(|err| {
                    AuthError::Storage(format!("Failed to remove session store: {err}"))
                })?;
            }
            return Ok(());
        }
        self.save_map(&map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CredentialStore, SessionToken};

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "phone-auth-test-{}-{}.json",
            name,
            std::process::id()
        ));
        path
    }

    #[tokio::test(flavor = "current_thread")]
    async fn round_trips_a_token_through_the_file() {
        let path = temp_path("roundtrip");
        let store = CredentialStore::new(Arc::new(FileStorage::new(&path)));
        let token = SessionToken {
            token: "tok-file".into(),
            created_at: 1714564800,
            user_uuid: Some("uuid-7".into()),
            invitation: None,
        };

        store.set(&token).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(token));

        store.clear().await.unwrap();
        assert_eq!(store.get().await.unwrap(), None);
        assert!(!path.exists(), "empty store should remove its file");

        let _ = remove_file(path);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_file_reads_as_empty() {
        let storage = FileStorage::new(temp_path("missing"));
        assert_eq!(storage.read("token").await.unwrap(), None);
        storage.remove("token").await.unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unrelated_keys_survive_a_remove() {
        let path = temp_path("unrelated");
        let storage = FileStorage::new(&path);

        storage.write("token", "{}").await.unwrap();
        storage.write("country", "US").await.unwrap();
        storage.remove("token").await.unwrap();

        assert_eq!(storage.read("token").await.unwrap(), None);
        assert_eq!(
            storage.read("country").await.unwrap(),
            Some("US".to_string())
        );

        let _ = remove_file(path);
    }
}
