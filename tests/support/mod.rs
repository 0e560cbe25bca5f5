#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use userlist_vault::secrets::SecretPayload;
use userlist_vault::storage::{MemoryStorage, Storage};
use userlist_vault::userlist::{FileSource, SourceLocation};
use userlist_vault::{CallerIdentity, CredentialService, SecretDurability};

pub const TEMPLATE: &str = "global\n  log stdout local0\n\nuserlist lb\n  user admin password $5$old$placeholder groups ops\n";

pub fn caller() -> CallerIdentity {
    CallerIdentity::new("s.test-token")
}

pub fn fields(value: Value) -> SecretPayload {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Text after the last `password ` marker, up to the next whitespace.
pub fn written_password(document: &str) -> String {
    let start = document.rfind("password ").expect("password marker") + "password ".len();
    document[start..]
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Memory storage whose writes can be switched to fail.
#[derive(Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    fail_writes: AtomicBool,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("storage offline");
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.check()?;
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        self.inner.delete(key).await
    }
}

/// Serves a fixed document and counts fetches.
pub struct StaticSource {
    document: Vec<u8>,
    fetches: AtomicUsize,
}

impl StaticSource {
    pub fn new(document: impl Into<Vec<u8>>) -> Self {
        Self {
            document: document.into(),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileSource for StaticSource {
    async fn fetch(&self, _location: &SourceLocation) -> userlist_vault::Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.document.clone())
    }
}

pub fn service_with(
    storage: Arc<dyn Storage>,
    source: Arc<dyn FileSource>,
    durability: SecretDurability,
) -> CredentialService {
    CredentialService::new(storage, source).with_durability(durability)
}
