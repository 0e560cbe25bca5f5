//! Caller-scoped secret payloads.
//!
//! Payloads are flat JSON objects of scalars, stored JSON-encoded under
//! `<caller>/<path>`. Durable writes go to storage before the in-memory map
//! changes.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::storage::Storage;

/// Field name to scalar value.
pub type SecretPayload = serde_json::Map<String, Value>;

/// Storage key of one secret: `<caller>/<path>`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn new(caller: &str, path: &str) -> Result<Self> {
        if caller.is_empty() {
            return Err(Error::Unauthenticated);
        }
        if caller.contains('/') {
            return Err(Error::validation("caller identity must not contain '/'"));
        }
        if path.is_empty() {
            return Err(Error::validation("secret path must be provided"));
        }
        if path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(Error::validation(format!(
                "secret path {path:?} has an empty, '.' or '..' segment"
            )));
        }
        Ok(Self(format!("{caller}/{path}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path part, without the caller prefix.
    pub fn path(&self) -> &str {
        self.0.split_once('/').map(|(_, path)| path).unwrap_or("")
    }
}

// The key embeds the caller token; keep it out of logs.
impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED]/{})", self.path())
    }
}

/// Every field must be a string, number or boolean.
pub fn validate_payload(payload: &SecretPayload) -> Result<()> {
    if payload.is_empty() {
        return Err(Error::EmptyPayload);
    }
    for (name, value) in payload {
        match value {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {}
            _ => {
                return Err(Error::validation(format!(
                    "field {name:?} must be a string, number or boolean"
                )))
            }
        }
    }
    Ok(())
}

pub struct SecretStore {
    storage: Arc<dyn Storage>,
    entries: StdMutex<HashMap<SecretKey, Vec<u8>>>,
    // One lock per key, held across the durable write; `entries` is only
    // locked for the in-memory change.
    writes: StdMutex<HashMap<SecretKey, Arc<Mutex<()>>>>,
}

impl SecretStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            entries: StdMutex::new(HashMap::new()),
            writes: StdMutex::new(HashMap::new()),
        }
    }

    fn write_lock(&self, key: &SecretKey) -> Arc<Mutex<()>> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone()
    }

    fn cached(&self, key: &SecretKey) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn cache(&self, key: &SecretKey, raw: Option<Vec<u8>>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match raw {
            Some(raw) => entries.insert(key.clone(), raw),
            None => entries.remove(key),
        };
    }

    /// In-memory lookup. `Ok(None)` means nothing is stored at `key`.
    pub fn read(&self, key: &SecretKey) -> Result<Option<SecretPayload>> {
        self.cached(key).map(|raw| decode(key, &raw)).transpose()
    }

    /// Reload `key` from durable storage into the cache, then read it.
    ///
    /// Without a durable copy the cached value (if any) is returned.
    pub async fn read_durable(&self, key: &SecretKey) -> Result<Option<SecretPayload>> {
        let lock = self.write_lock(key);
        let _guard = lock.lock().await;
        let durable = self
            .storage
            .get(key.as_str())
            .await
            .map_err(Error::persistence)?;

        match durable {
            Some(raw) => {
                let payload = decode(key, &raw)?;
                self.cache(key, Some(raw));
                tracing::debug!(path = key.path(), "Loaded secret from durable storage");
                Ok(Some(payload))
            }
            None => self.read(key),
        }
    }

    /// Store `payload` at `key`, replacing any previous value.
    ///
    /// A non-durable write also tries to remove an older durable copy so a
    /// later durable read does not resurrect it. That cleanup never fails the
    /// write.
    pub async fn write(&self, key: &SecretKey, payload: &SecretPayload, durable: bool) -> Result<()> {
        validate_payload(payload)?;
        let raw = serde_json::to_vec(payload).map_err(|source| Error::CorruptRecord {
            key: key.path().to_string(),
            source,
        })?;

        let lock = self.write_lock(key);
        let _guard = lock.lock().await;
        if durable {
            self.storage
                .put(key.as_str(), &raw)
                .await
                .map_err(Error::persistence)?;
        } else if let Err(err) = self.storage.delete(key.as_str()).await {
            tracing::warn!(
                path = key.path(),
                error = %format!("{err:#}"),
                "Could not drop stale durable copy of secret"
            );
        }

        self.cache(key, Some(raw));
        Ok(())
    }

    /// Remove `key` from durable storage and memory. Missing keys are fine.
    pub async fn delete(&self, key: &SecretKey) -> Result<bool> {
        let lock = self.write_lock(key);
        let _guard = lock.lock().await;
        self.storage
            .delete(key.as_str())
            .await
            .map_err(Error::persistence)?;

        let existed = self.cached(key).is_some();
        self.cache(key, None);
        Ok(existed)
    }
}

fn decode(key: &SecretKey, raw: &[u8]) -> Result<SecretPayload> {
    serde_json::from_slice(raw).map_err(|source| Error::CorruptRecord {
        key: key.path().to_string(),
        source,
    })
}
