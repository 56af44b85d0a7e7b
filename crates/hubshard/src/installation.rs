//! Installation identifiers and registration payload types.

use core::fmt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable opaque identifier of a device registration.
///
/// An installation id is a hex digest (normally the SHA-256 of the owner's
/// fiscal code). It is the partition key: the router looks at its leading hex
/// digits. Ids are normalized to lowercase when parsed so that routing
/// predicates only need to consider `0-9a-f`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstallationId(String);

/// Why a string was rejected as an [`InstallationId`].
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum InstallationIdError {
    #[error("installation id must not be empty")]
    Empty,

    #[error("installation id must be hexadecimal, found {found:?} at byte {position}")]
    NotHex { found: char, position: usize },
}

impl InstallationId {
    /// Parses and normalizes an installation id.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is empty or contains a non hex character.
    pub fn parse(raw: &str) -> Result<Self, InstallationIdError> {
        if raw.is_empty() {
            return Err(InstallationIdError::Empty);
        }
        if let Some((position, found)) = raw.char_indices().find(|(_, c)| !c.is_ascii_hexdigit())
        {
            return Err(InstallationIdError::NotHex { found, position });
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    /// Derives the installation id of a fiscal code (lowercase hex SHA-256).
    pub fn from_fiscal_code(fiscal_code: &str) -> Self {
        let digest = Sha256::digest(fiscal_code.as_bytes());
        let hex = digest.iter().fold(String::with_capacity(64), |mut acc, b| {
            use fmt::Write;
            let _ = write!(acc, "{b:02x}");
            acc
        });
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstallationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for InstallationId {
    type Error = InstallationIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<InstallationId> for String {
    fn from(id: InstallationId) -> Self {
        id.0
    }
}

impl AsRef<str> for InstallationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Push platform of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Apns,
    Gcm,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apns => f.write_str("apns"),
            Self::Gcm => f.write_str("gcm"),
        }
    }
}

/// Registration data written to a backend by create/update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub platform: Platform,
    pub push_channel: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Content of a push notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyPayload {
    pub title: String,
    pub message: String,
    pub message_id: String,
}
