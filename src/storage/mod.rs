mod json_file;
mod memory;

pub use json_file::JsonFileStorage;
pub use memory::MemoryStorage;

use anyhow::Result;

/// Durable key/value byte store backing the options and secret mirrors.
///
/// Keys are `/`-separated logical names (`options`, `<caller>/<path>`).
/// Values are opaque to the store; callers write JSON.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Creates or replaces the value at `key`.
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Removes `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}
