//! Service options: hashing scheme, userlist source and target, output and
//! persistence flags.
//!
//! The record lives in memory and is optionally mirrored to durable storage
//! under [`OPTIONS_KEY`]. Every mutation writes the mirror before the
//! in-memory copy changes, so a failed mirror leaves the old record in place.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::hashing::{HashAlgorithm, Salt};
use crate::storage::Storage;
use crate::userlist::SourceLocation;

/// Durable key of the options singleton.
pub const OPTIONS_KEY: &str = "options";

fn default_true() -> bool {
    true
}

/// The active configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsRecord {
    /// Return the hash to the caller instead of patching a userlist.
    #[serde(default = "default_true")]
    pub output_enabled: bool,

    /// Unset means [`HashAlgorithm::Sha256`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_algorithm: Option<HashAlgorithm>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_source: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<PathBuf>,

    /// Fixed crypt salt; a random one is generated when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,

    /// Mirror options (and, by default, secrets) to durable storage.
    #[serde(default)]
    pub persist: bool,
}

impl Default for OptionsRecord {
    fn default() -> Self {
        Self {
            output_enabled: true,
            hash_algorithm: None,
            remote_source: None,
            local_source: None,
            target_path: None,
            salt: None,
            persist: false,
        }
    }
}

impl OptionsRecord {
    pub fn effective_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm.unwrap_or_default()
    }

    /// The configured template source; remote wins if a stale record holds both.
    pub fn source(&self) -> Option<SourceLocation> {
        if let Some(url) = &self.remote_source {
            return Some(SourceLocation::Remote(url.clone()));
        }
        self.local_source.clone().map(SourceLocation::Local)
    }

    pub fn salt(&self) -> Result<Option<Salt>> {
        self.salt.as_deref().map(Salt::new).transpose()
    }

    /// Apply `update` field by field: output flag, sources, algorithm, salt,
    /// then persistence and target.
    pub fn apply(&mut self, update: &OptionsUpdate) -> Result<()> {
        let remote = update.remote_source.as_deref().filter(|s| !s.is_empty());
        let local = update
            .local_source
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty());
        if remote.is_some() && local.is_some() {
            return Err(Error::validation(
                "remoteSource and localSource are mutually exclusive",
            ));
        }
        let algorithm = update
            .hash_algorithm
            .as_deref()
            .map(HashAlgorithm::from_str)
            .transpose()?;
        let salt = update.salt.as_deref().map(Salt::new).transpose()?;

        if let Some(output) = update.output_enabled {
            self.output_enabled = output;
        }
        if let Some(url) = remote {
            self.remote_source = Some(url.to_string());
            self.local_source = None;
            self.output_enabled = false;
        }
        if let Some(path) = local {
            self.remote_source = None;
            self.local_source = Some(path.clone());
            self.output_enabled = false;
        }
        if algorithm.is_some() {
            self.hash_algorithm = algorithm;
        }
        if let Some(salt) = salt {
            self.salt = Some(salt.as_str().to_string());
        }
        if let Some(persist) = update.persist {
            self.persist = persist;
        }
        if let Some(target) = &update.target_path {
            self.target_path = Some(target.clone());
        }
        Ok(())
    }

    pub fn clear(&mut self, field: OptionsField) {
        let defaults = OptionsRecord::default();
        match field {
            OptionsField::OutputEnabled => self.output_enabled = defaults.output_enabled,
            OptionsField::HashAlgorithm => self.hash_algorithm = None,
            OptionsField::RemoteSource => self.remote_source = None,
            OptionsField::LocalSource => self.local_source = None,
            OptionsField::TargetPath => self.target_path = None,
            OptionsField::Salt => self.salt = None,
            OptionsField::Persist => self.persist = defaults.persist,
        }
    }
}

/// A partial options change, as accepted by `SetOptions`.
///
/// Unknown fields are rejected. The older names `output`, `remote`, `local`
/// and `crypter` are accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OptionsUpdate {
    #[serde(default, alias = "output")]
    pub output_enabled: Option<bool>,

    #[serde(default, alias = "remote")]
    pub remote_source: Option<String>,

    #[serde(default, alias = "local")]
    pub local_source: Option<PathBuf>,

    /// Kept as text so unknown names surface as `UnsupportedAlgorithm`.
    #[serde(default, alias = "crypter")]
    pub hash_algorithm: Option<String>,

    #[serde(default)]
    pub salt: Option<String>,

    #[serde(default)]
    pub persist: Option<bool>,

    #[serde(default)]
    pub target_path: Option<PathBuf>,
}

impl OptionsUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a request body, rejecting fields outside the schema.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::validation(e.to_string()))
    }

    pub fn output_enabled(mut self, enabled: bool) -> Self {
        self.output_enabled = Some(enabled);
        self
    }

    pub fn remote_source(mut self, url: impl Into<String>) -> Self {
        self.remote_source = Some(url.into());
        self
    }

    pub fn local_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_source = Some(path.into());
        self
    }

    pub fn hash_algorithm(mut self, name: impl Into<String>) -> Self {
        self.hash_algorithm = Some(name.into());
        self
    }

    pub fn salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = Some(persist);
        self
    }

    pub fn target_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.target_path = Some(path.into());
        self
    }
}

/// A single clearable option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionsField {
    OutputEnabled,
    HashAlgorithm,
    RemoteSource,
    LocalSource,
    TargetPath,
    Salt,
    Persist,
}

impl OptionsField {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionsField::OutputEnabled => "outputEnabled",
            OptionsField::HashAlgorithm => "hashAlgorithm",
            OptionsField::RemoteSource => "remoteSource",
            OptionsField::LocalSource => "localSource",
            OptionsField::TargetPath => "targetPath",
            OptionsField::Salt => "salt",
            OptionsField::Persist => "persist",
        }
    }
}

impl FromStr for OptionsField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "outputEnabled" | "output" => Ok(OptionsField::OutputEnabled),
            "hashAlgorithm" | "crypter" => Ok(OptionsField::HashAlgorithm),
            "remoteSource" | "remote" => Ok(OptionsField::RemoteSource),
            "localSource" | "local" => Ok(OptionsField::LocalSource),
            "targetPath" => Ok(OptionsField::TargetPath),
            "salt" => Ok(OptionsField::Salt),
            "persist" => Ok(OptionsField::Persist),
            other => Err(Error::validation(format!("unknown options field: {other:?}"))),
        }
    }
}

/// Holder of the options singleton.
///
/// `None` is the pristine state: nothing has been configured yet.
pub struct OptionsStore {
    storage: Arc<dyn Storage>,
    current: StdMutex<Option<OptionsRecord>>,
    // Serializes mutations across their durable write; `current` is only
    // locked for the in-memory swap.
    writes: Mutex<()>,
}

impl OptionsStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            current: StdMutex::new(None),
            writes: Mutex::new(()),
        }
    }

    pub fn get(&self) -> Option<OptionsRecord> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, record: Option<OptionsRecord>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = record;
    }

    pub async fn set(&self, update: &OptionsUpdate) -> Result<OptionsRecord> {
        let _guard = self.writes.lock().await;
        let previous = self.get();
        let mut next = previous.clone().unwrap_or_default();
        next.apply(update)?;

        self.mirror(previous.as_ref(), &next).await?;
        self.replace(Some(next.clone()));
        Ok(next)
    }

    /// Reset one field. A pristine store stays pristine.
    pub async fn clear_field(&self, field: OptionsField) -> Result<Option<OptionsRecord>> {
        let _guard = self.writes.lock().await;
        let Some(previous) = self.get() else {
            return Ok(None);
        };
        let mut next = previous.clone();
        next.clear(field);

        self.mirror(Some(&previous), &next).await?;
        self.replace(Some(next.clone()));
        Ok(Some(next))
    }

    /// Drop the whole record and its durable mirror.
    pub async fn clear_all(&self) -> Result<()> {
        let _guard = self.writes.lock().await;
        self.storage
            .delete(OPTIONS_KEY)
            .await
            .map_err(Error::persistence)?;
        self.replace(None);
        Ok(())
    }

    /// Repopulate from the durable mirror. Returns whether a record was found.
    pub async fn load_from_durable(&self) -> Result<bool> {
        let _guard = self.writes.lock().await;
        let Some(raw) = self
            .storage
            .get(OPTIONS_KEY)
            .await
            .map_err(Error::persistence)?
        else {
            tracing::debug!("No durable options record");
            return Ok(false);
        };

        let record: OptionsRecord =
            serde_json::from_slice(&raw).map_err(|source| Error::CorruptRecord {
                key: OPTIONS_KEY.to_string(),
                source,
            })?;
        self.replace(Some(record));
        tracing::debug!("Loaded options from durable storage");
        Ok(true)
    }

    /// Write `next` durably if it persists; drop the mirror if persistence was
    /// just switched off.
    async fn mirror(&self, previous: Option<&OptionsRecord>, next: &OptionsRecord) -> Result<()> {
        if next.persist {
            let encoded = serde_json::to_vec(next).map_err(|source| Error::CorruptRecord {
                key: OPTIONS_KEY.to_string(),
                source,
            })?;
            self.storage
                .put(OPTIONS_KEY, &encoded)
                .await
                .map_err(Error::persistence)?;
        } else if previous.is_some_and(|p| p.persist) {
            self.storage
                .delete(OPTIONS_KEY)
                .await
                .map_err(Error::persistence)?;
        }
        Ok(())
    }
}
