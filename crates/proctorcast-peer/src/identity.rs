//! Agent identity string: `"<id>###<name>"`.

use crate::error::{PeerError, Result};

/// Separator between id and display name.
pub const IDENTITY_SEPARATOR: &str = "###";

/// Parsed NAME payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable external id.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// Parse a NAME payload. Both parts are trimmed; the id must not be empty.
pub fn parse_identity(payload: &[u8]) -> Result<Identity> {
    let text = std::str::from_utf8(payload)
        .map_err(|err| PeerError::InvalidIdentity(format!("not utf-8: {err}")))?;
    let (id, name) = text
        .split_once(IDENTITY_SEPARATOR)
        .ok_or_else(|| PeerError::InvalidIdentity(format!("missing '{IDENTITY_SEPARATOR}'")))?;

    let id = id.trim();
    if id.is_empty() {
        return Err(PeerError::InvalidIdentity("empty id".to_string()));
    }

    Ok(Identity {
        id: id.to_string(),
        name: name.trim().to_string(),
    })
}

/// Build the NAME payload an agent sends after connecting.
pub fn format_identity(id: &str, name: &str) -> Result<String> {
    let id = id.trim();
    if id.is_empty() {
        return Err(PeerError::InvalidIdentity("empty id".to_string()));
    }
    if id.contains(IDENTITY_SEPARATOR) {
        return Err(PeerError::InvalidIdentity(format!(
            "id must not contain '{IDENTITY_SEPARATOR}'"
        )));
    }
    Ok(format!("{id}{IDENTITY_SEPARATOR}{}", name.trim()))
}
