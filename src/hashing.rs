//! crypt(3) compatible password hashing.
//!
//! Produces self-describing `$5$salt$digest` (SHA-256) and `$6$salt$digest`
//! (SHA-512) strings, the formats HAProxy accepts for `password` entries in a
//! `userlist` section. The salt is embedded in the output, so verifying only
//! needs the plaintext and the hash string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha_crypt::{
    sha256_check, sha256_crypt_b64, sha256_simple, sha512_check, sha512_crypt_b64,
    sha512_simple, Sha256Params, Sha512Params,
};

use crate::error::{Error, Result};

/// glibc's default round count. With this value the crypt string carries no
/// `rounds=` parameter.
const ROUNDS: usize = 5_000;

const SALT_MAX_LEN: usize = 16;

/// Supported hashing schemes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// The `$id$` prefix of the crypt string.
    fn prefix(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "$5$",
            HashAlgorithm::Sha512 => "$6$",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            _ => Err(Error::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// A caller-chosen salt, validated against the crypt salt alphabet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt(String);

impl Salt {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() || value.len() > SALT_MAX_LEN {
            return Err(Error::validation(format!(
                "salt must be 1 to {SALT_MAX_LEN} characters long"
            )));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '/')
        {
            return Err(Error::validation(
                "salt may only contain characters from [./0-9A-Za-z]",
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Hash `plaintext` with `algorithm`.
///
/// A random salt is generated unless one is supplied.
pub fn hash(algorithm: HashAlgorithm, plaintext: &str, salt: Option<&Salt>) -> Result<String> {
    match salt {
        None => generate(algorithm, plaintext),
        Some(salt) => {
            let digest = match algorithm {
                HashAlgorithm::Sha256 => {
                    let params = Sha256Params::new(ROUNDS).map_err(hashing_error)?;
                    sha256_crypt_b64(plaintext.as_bytes(), salt.as_str().as_bytes(), &params)
                        .map_err(hashing_error)?
                }
                HashAlgorithm::Sha512 => {
                    let params = Sha512Params::new(ROUNDS).map_err(hashing_error)?;
                    sha512_crypt_b64(plaintext.as_bytes(), salt.as_str().as_bytes(), &params)
                        .map_err(hashing_error)?
                }
            };
            Ok(format!("{}{}${digest}", algorithm.prefix(), salt.as_str()))
        }
    }
}

fn generate(algorithm: HashAlgorithm, plaintext: &str) -> Result<String> {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let params = Sha256Params::new(ROUNDS).map_err(hashing_error)?;
            sha256_simple(plaintext, &params).map_err(hashing_error)
        }
        HashAlgorithm::Sha512 => {
            let params = Sha512Params::new(ROUNDS).map_err(hashing_error)?;
            sha512_simple(plaintext, &params).map_err(hashing_error)
        }
    }
}

/// Check `plaintext` against a crypt string produced by either algorithm.
pub fn verify(plaintext: &str, hashed: &str) -> bool {
    if hashed.starts_with(HashAlgorithm::Sha256.prefix()) {
        sha256_check(plaintext, hashed).is_ok()
    } else if hashed.starts_with(HashAlgorithm::Sha512.prefix()) {
        sha512_check(plaintext, hashed).is_ok()
    } else {
        false
    }
}

fn hashing_error(err: impl fmt::Debug) -> Error {
    Error::Hashing(format!("{err:?}"))
}
