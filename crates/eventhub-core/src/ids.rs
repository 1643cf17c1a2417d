//! Channel ids and sender fingerprints.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Numeric channel id handed out by the driver.
///
/// Ids start at 1 and are never reused for the lifetime of a driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChannelId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Opaque identity of a connecting client.
///
/// Derived from the client's address so that targeted events can be matched
/// against the bound transport without keeping the raw address around.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SenderFingerprint(u64);

impl SenderFingerprint {
    /// Fingerprint a sender identity string. Case-insensitive.
    #[must_use]
    pub fn of(sender: &str) -> Self {
        let digest = Sha256::digest(sender.trim().to_lowercase().as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(bytes))
    }

    /// The raw fingerprint value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SenderFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_display() {
        assert_eq!(ChannelId::new(7).to_string(), "7");
    }

    #[test]
    fn channel_id_ordering() {
        assert!(ChannelId::new(1) < ChannelId::new(2));
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(
            SenderFingerprint::of("10.0.0.1:c1"),
            SenderFingerprint::of("10.0.0.1:c1")
        );
    }

    #[test]
    fn fingerprint_ignores_case_and_padding() {
        assert_eq!(
            SenderFingerprint::of("Host.Example:C2"),
            SenderFingerprint::of("  host.example:c2 ")
        );
    }

    #[test]
    fn different_senders_differ() {
        assert_ne!(
            SenderFingerprint::of("10.0.0.1"),
            SenderFingerprint::of("10.0.0.2")
        );
    }

    #[test]
    fn fingerprint_display_is_hex() {
        let fp = SenderFingerprint::of("client");
        let shown = fp.to_string();
        assert_eq!(shown.len(), 16);
        assert!(shown.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
