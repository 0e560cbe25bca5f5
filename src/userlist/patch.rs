//! Line-scoped rewrite of the `password` field in a userlist document.

use crate::error::{Error, MalformedReason, Result};

/// Marker that precedes the password token on a `user` line.
pub const PASSWORD_MARKER: &str = "password ";

fn is_blank(byte: u8) -> bool {
    byte == b' ' || byte == b'\t'
}

/// Replace the password token on the line holding the last `password ` marker.
///
/// Spaces and tabs after the marker are kept as alignment. Only the
/// whitespace-delimited token that follows them changes; the rest of that
/// line (e.g. a trailing `groups admins`) and every other byte of the
/// document are kept as is. The document need not be UTF-8.
pub fn patch_document(document: &[u8], replacement: &str) -> Result<Vec<u8>> {
    let marker = PASSWORD_MARKER.as_bytes();
    let marker_at = document
        .windows(marker.len())
        .rposition(|window| window == marker)
        .ok_or(Error::MalformedDocument(MalformedReason::PasswordFieldMissing))?;

    let after_marker = marker_at + marker.len();
    let padding = document[after_marker..]
        .iter()
        .take_while(|&&b| is_blank(b))
        .count();
    let token_start = after_marker + padding;
    let token_len = document[token_start..]
        .iter()
        .position(u8::is_ascii_whitespace)
        .unwrap_or(document.len() - token_start);

    if token_len == 0 {
        return Err(Error::MalformedDocument(MalformedReason::NothingToReplace));
    }

    let mut patched = Vec::with_capacity(document.len() - token_len + replacement.len());
    patched.extend_from_slice(&document[..token_start]);
    patched.extend_from_slice(replacement.as_bytes());
    patched.extend_from_slice(&document[token_start + token_len..]);
    Ok(patched)
}
