//! HAProxy userlist templating.
//!
//! A template userlist is fetched from a [`FileSource`], the token after its
//! last `password ` marker is swapped for a freshly computed hash, and the
//! result is written to the target path where the load balancer reads it.
//!
//! ```text
//! userlist admins
//!   user bob password $6$salt$digest groups ops
//! ```

mod patch;
mod source;

pub use patch::{patch_document, PASSWORD_MARKER};
pub use source::{DefaultFileSource, FileSource, SourceLocation};

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// Owner read/write, group read. HAProxy typically reads as a group member.
#[cfg(unix)]
const USERLIST_MODE: u32 = 0o640;

/// Patch `document` with `replacement` and write it to `target`.
///
/// The patched copy goes to a sibling temp file first and is renamed over
/// `target`, so readers never observe a half-written userlist.
pub async fn patch(document: &[u8], replacement: &str, target: &Path) -> Result<()> {
    let patched = patch_document(document, replacement)?;

    write_userlist(target, &patched)
        .await
        .map_err(|source| Error::TargetWrite {
            path: target.to_path_buf(),
            source,
        })?;

    tracing::info!(target = %target.display(), "Wrote patched userlist");
    Ok(())
}

fn staging_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

async fn write_userlist(target: &Path, contents: &[u8]) -> std::io::Result<()> {
    let staging = staging_path(target);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(USERLIST_MODE);

    let mut file = options.open(&staging).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    // `mode` only applies on creation; a leftover staging file keeps its bits.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&staging, std::fs::Permissions::from_mode(USERLIST_MODE)).await?;
    }

    fs::rename(&staging, target).await
}
