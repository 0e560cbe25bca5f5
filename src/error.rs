//! Error taxonomy shared by every operation of the credential service.

use std::path::PathBuf;

/// Why a userlist document could not be patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MalformedReason {
    #[error("password field missing")]
    PasswordFieldMissing,

    #[error("nothing to replace")]
    NothingToReplace,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("client token empty")]
    Unauthenticated,

    #[error("userlist options must be provided before storing secrets")]
    OptionsNotConfigured,

    /// Output is disabled but the record lacks what the userlist flow needs.
    #[error("option '{field}' must be set when output is disabled")]
    MissingOption { field: &'static str },

    #[error("data must be provided to store in secret")]
    EmptyPayload,

    #[error("unsupported hash algorithm: {0:?}")]
    UnsupportedAlgorithm(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("userlist source {location} unavailable: {reason}")]
    SourceUnavailable { location: String, reason: String },

    #[error("malformed userlist: {0}")]
    MalformedDocument(MalformedReason),

    #[error("failed to write userlist {}: {source}", path.display())]
    TargetWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("hash generation failed: {0}")]
    Hashing(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("stored record {key:?} is corrupt: {source}")]
    CorruptRecord {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    /// Wrap a durable storage failure, keeping its whole context chain.
    pub fn persistence(err: anyhow::Error) -> Self {
        Error::Persistence(format!("{err:#}"))
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// True for errors caused by the request itself rather than the environment.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::Unauthenticated
                | Error::OptionsNotConfigured
                | Error::MissingOption { .. }
                | Error::EmptyPayload
                | Error::UnsupportedAlgorithm(_)
                | Error::Validation(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
