pub mod config;
pub mod error;
pub mod hashing;
pub mod options;
pub mod secrets;
pub mod service;
pub mod storage;
pub mod userlist;

pub use error::{Error, Result};
pub use service::{CallerIdentity, CredentialService, ReadMode, SecretDurability, WriteOutcome};
