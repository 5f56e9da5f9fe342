//! Envelope-encrypted key/value store.
//!
//! The byte backend is injected and untrusted: values are sealed with the
//! store's [`EnvelopeKey`] before they reach it and opened after they come
//! back, so the backend only ever holds ciphertext. Keys stay plaintext
//! (they are namespaced identifiers, not secrets).

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use ink_crypto::EnvelopeKey;

use crate::error::StoreError;

/// Raw byte storage the encrypted store writes through to.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get_raw(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, StoreError>;
    async fn set_raw(
        &self,
        key: &str,
        value: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;
    async fn remove_raw(&self, key: &str, cancel: &CancellationToken) -> Result<(), StoreError>;
    async fn clear_raw(&self, cancel: &CancellationToken) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: KvBackend + ?Sized> KvBackend for std::sync::Arc<T> {
    async fn get_raw(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get_raw(key, cancel).await
    }

    async fn set_raw(
        &self,
        key: &str,
        value: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        (**self).set_raw(key, value, cancel).await
    }

    async fn remove_raw(&self, key: &str, cancel: &CancellationToken) -> Result<(), StoreError> {
        (**self).remove_raw(key, cancel).await
    }

    async fn clear_raw(&self, cancel: &CancellationToken) -> Result<(), StoreError> {
        (**self).clear_raw(cancel).await
    }
}

/// In-memory backend; the default for tests and ephemeral profiles.
#[derive(Default)]
pub struct MemoryKvBackend {
    entries: parking_lot::Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKvBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for MemoryKvBackend {
    async fn get_raw(
        &self,
        key: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set_raw(
        &self,
        key: &str,
        value: Vec<u8>,
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_raw(&self, key: &str, _cancel: &CancellationToken) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn clear_raw(&self, _cancel: &CancellationToken) -> Result<(), StoreError> {
        self.entries.lock().clear();
        Ok(())
    }
}

/// Typed store over an encrypted byte backend. Values are serialized to
/// JSON, sealed, and only then handed to the backend.
pub struct EncryptedKvStore<B> {
    backend: B,
    key: EnvelopeKey,
}

impl<B: KvBackend> EncryptedKvStore<B> {
    pub fn new(backend: B, key: EnvelopeKey) -> Self {
        Self { backend, key }
    }

    pub async fn get<V: DeserializeOwned>(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<V>, StoreError> {
        match self.backend.get_raw(key, cancel).await? {
            None => Ok(None),
            Some(sealed) => {
                let plaintext = self.key.open(&sealed)?;
                Ok(Some(serde_json::from_slice(&plaintext)?))
            }
        }
    }

    pub async fn set<V: Serialize + Sync>(
        &self,
        key: &str,
        value: &V,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let plaintext = serde_json::to_vec(value)?;
        let sealed = self.key.seal(&plaintext)?;
        self.backend.set_raw(key, sealed, cancel).await
    }

    pub async fn remove(&self, key: &str, cancel: &CancellationToken) -> Result<(), StoreError> {
        self.backend.remove_raw(key, cancel).await
    }

    pub async fn clear(&self, cancel: &CancellationToken) -> Result<(), StoreError> {
        self.backend.clear_raw(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Settings {
        theme: String,
        font_size: u32,
    }

    fn store() -> EncryptedKvStore<MemoryKvBackend> {
        EncryptedKvStore::new(MemoryKvBackend::new(), EnvelopeKey::new([3u8; 32]))
    }

    #[tokio::test]
    async fn set_get_remove_round_trip() {
        let store = store();
        let cancel = CancellationToken::new();
        let value = Settings {
            theme: "dark".to_string(),
            font_size: 14,
        };

        store.set("settings", &value, &cancel).await.unwrap();
        assert_eq!(
            store.get::<Settings>("settings", &cancel).await.unwrap(),
            Some(value)
        );

        store.remove("settings", &cancel).await.unwrap();
        assert_eq!(
            store.get::<Settings>("settings", &cancel).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn backend_never_sees_plaintext() {
        let backend = MemoryKvBackend::new();
        let cancel = CancellationToken::new();
        let secret = "the quick brown fox".to_string();

        let store = EncryptedKvStore::new(backend, EnvelopeKey::new([5u8; 32]));
        store.set("note", &secret, &cancel).await.unwrap();

        let raw = store
            .backend
            .get_raw("note", &cancel)
            .await
            .unwrap()
            .unwrap();
        let haystack = String::from_utf8_lossy(&raw);
        assert!(!haystack.contains("quick brown fox"));
        assert_ne!(raw, serde_json::to_vec(&secret).unwrap());
    }

    #[tokio::test]
    async fn wrong_key_fails_to_open() {
        let cancel = CancellationToken::new();
        let backend = std::sync::Arc::new(MemoryKvBackend::new());
        {
            let store = EncryptedKvStore::new(backend.clone(), EnvelopeKey::new([1u8; 32]));
            store.set("k", &"v".to_string(), &cancel).await.unwrap();
        }
        let store = EncryptedKvStore::new(backend, EnvelopeKey::new([2u8; 32]));
        assert!(store.get::<String>("k", &cancel).await.is_err());
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let store = store();
        let cancel = CancellationToken::new();
        store.set("a", &1u32, &cancel).await.unwrap();
        store.set("b", &2u32, &cancel).await.unwrap();
        store.clear(&cancel).await.unwrap();
        assert_eq!(store.get::<u32>("a", &cancel).await.unwrap(), None);
        assert_eq!(store.get::<u32>("b", &cancel).await.unwrap(), None);
    }
}
