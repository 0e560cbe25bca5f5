//! The credential service: the six boundary operations over one options
//! record, one secret map and the userlist templating flow.

use std::fmt;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::hashing;
use crate::options::{OptionsField, OptionsRecord, OptionsStore, OptionsUpdate};
use crate::secrets::{validate_payload, SecretKey, SecretPayload, SecretStore};
use crate::storage::Storage;
use crate::userlist::{self, FileSource};

/// Field whose value is hashed when a payload carries more than one field.
pub const HASH_INPUT_FIELD: &str = "password";

/// Opaque token identifying the requester.
pub struct CallerIdentity(SecretString);

impl CallerIdentity {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    fn verify(&self) -> Result<&str> {
        let token = self.0.expose_secret();
        if token.is_empty() {
            return Err(Error::Unauthenticated);
        }
        Ok(token)
    }
}

impl fmt::Debug for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CallerIdentity([REDACTED])")
    }
}

impl From<&str> for CallerIdentity {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for CallerIdentity {
    fn from(token: String) -> Self {
        Self::new(token)
    }
}

/// Whether secret writes go to durable storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretDurability {
    /// Durable exactly when the options record has `persist` set.
    #[default]
    FollowOptions,
    /// Every successful write is durable.
    Always,
}

/// Where `read_secret` looks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadMode {
    /// In-memory map only.
    #[default]
    Cached,
    /// Reload from durable storage first.
    Durable,
}

/// Response of `write_secret`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    /// The computed hash, present only when output is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

pub struct CredentialService {
    options: OptionsStore,
    secrets: SecretStore,
    source: Arc<dyn FileSource>,
    durability: SecretDurability,
}

impl CredentialService {
    pub fn new(storage: Arc<dyn Storage>, source: Arc<dyn FileSource>) -> Self {
        Self {
            options: OptionsStore::new(storage.clone()),
            secrets: SecretStore::new(storage),
            source,
            durability: SecretDurability::default(),
        }
    }

    pub fn with_durability(mut self, durability: SecretDurability) -> Self {
        self.durability = durability;
        self
    }

    /// Build a service and restore any durable options record.
    pub async fn open(
        storage: Arc<dyn Storage>,
        source: Arc<dyn FileSource>,
        durability: SecretDurability,
    ) -> Result<Self> {
        let service = Self::new(storage, source).with_durability(durability);
        if service.options.load_from_durable().await? {
            tracing::info!("Restored persisted options");
        }
        Ok(service)
    }

    pub fn durability(&self) -> SecretDurability {
        self.durability
    }

    pub async fn read_secret(
        &self,
        caller: &CallerIdentity,
        path: &str,
        mode: ReadMode,
    ) -> Result<Option<SecretPayload>> {
        let key = SecretKey::new(caller.verify()?, path)?;
        let payload = match mode {
            ReadMode::Cached => self.secrets.read(&key)?,
            ReadMode::Durable => self.secrets.read_durable(&key).await?,
        };
        tracing::debug!(path, found = payload.is_some(), "Read secret");
        Ok(payload)
    }

    /// Hash the selected field, patch the userlist when output is disabled,
    /// then store the payload.
    ///
    /// Nothing is stored unless every earlier step succeeded.
    pub async fn write_secret(
        &self,
        caller: &CallerIdentity,
        path: &str,
        fields: SecretPayload,
    ) -> Result<WriteOutcome> {
        let key = SecretKey::new(caller.verify()?, path)?;
        let options = self.options.get().ok_or(Error::OptionsNotConfigured)?;
        validate_payload(&fields)?;

        let algorithm = options.effective_algorithm();
        let plaintext = select_hash_input(&fields)?;
        let hash = hashing::hash(algorithm, &plaintext, options.salt()?.as_ref())?;

        if !options.output_enabled {
            self.patch_userlist(&options, &hash).await?;
        }

        let durable = match self.durability {
            SecretDurability::Always => true,
            SecretDurability::FollowOptions => options.persist,
        };
        self.secrets.write(&key, &fields, durable).await?;

        tracing::info!(
            path,
            %algorithm,
            durable,
            userlist = !options.output_enabled,
            "Stored secret"
        );

        Ok(WriteOutcome {
            token: options.output_enabled.then_some(hash),
        })
    }

    async fn patch_userlist(&self, options: &OptionsRecord, hash: &str) -> Result<()> {
        let source = options.source().ok_or(Error::MissingOption {
            field: "remoteSource",
        })?;
        let target = options.target_path.as_deref().ok_or(Error::MissingOption {
            field: "targetPath",
        })?;

        let document = self.source.fetch(&source).await?;
        userlist::patch(&document, hash, target).await
    }

    pub async fn delete_secret(&self, caller: &CallerIdentity, path: &str) -> Result<()> {
        let key = SecretKey::new(caller.verify()?, path)?;
        let existed = self.secrets.delete(&key).await?;
        tracing::info!(path, existed, "Deleted secret");
        Ok(())
    }

    pub fn read_options(&self, caller: &CallerIdentity) -> Result<Option<OptionsRecord>> {
        caller.verify()?;
        Ok(self.options.get())
    }

    pub async fn set_options(
        &self,
        caller: &CallerIdentity,
        update: &OptionsUpdate,
    ) -> Result<OptionsRecord> {
        caller.verify()?;
        let record = self.options.set(update).await?;
        tracing::info!(
            algorithm = %record.effective_algorithm(),
            output = record.output_enabled,
            persist = record.persist,
            "Updated options"
        );
        Ok(record)
    }

    /// `SetOptions` with a raw request body; unknown fields are rejected.
    pub async fn set_options_json(
        &self,
        caller: &CallerIdentity,
        body: Value,
    ) -> Result<OptionsRecord> {
        caller.verify()?;
        let update = OptionsUpdate::from_json(body)?;
        self.set_options(caller, &update).await
    }

    /// Clear one named field, or the whole record when `field` is `None`.
    pub async fn delete_options(&self, caller: &CallerIdentity, field: Option<&str>) -> Result<()> {
        caller.verify()?;
        match field {
            Some(name) => {
                let field: OptionsField = name.parse()?;
                self.options.clear_field(field).await?;
                tracing::info!(field = field.as_str(), "Cleared option");
            }
            None => {
                self.options.clear_all().await?;
                tracing::info!("Cleared all options");
            }
        }
        Ok(())
    }
}

/// Pick the value to hash: the `password` field if present, otherwise the
/// only field of the payload.
pub fn select_hash_input(fields: &SecretPayload) -> Result<String> {
    let value = match fields.get(HASH_INPUT_FIELD) {
        Some(value) => value,
        None => {
            let mut values = fields.values();
            match (values.next(), values.next()) {
                (Some(value), None) => value,
                (None, _) => return Err(Error::EmptyPayload),
                (Some(_), Some(_)) => {
                    return Err(Error::validation(format!(
                        "payload has several fields; include a {HASH_INPUT_FIELD:?} field to choose the hashed value"
                    )))
                }
            }
        }
    };

    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(Error::validation("hashed field must be a scalar")),
    }
}
