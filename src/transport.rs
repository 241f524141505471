use async_trait::async_trait;

use crate::error::TransportError;
use crate::status::StatusLatch;

/// SmartLamp OTA characteristic UUID fragments
///
/// Older lamp firmware ships with a different 128-bit base UUID, so the
/// characteristics are matched on the 16-bit part that never changes.
pub mod ota_uuids {
    /// OTA Control characteristic (write + notify)
    pub const CTRL_FRAGMENT: &str = "aa09";
    /// OTA Data characteristic (write without response)
    pub const DATA_FRAGMENT: &str = "aa0a";
}

/// Logical endpoints of an OTA session
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Endpoint {
    Control,
    Data,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WriteKind {
    /// Wait for the link-layer acknowledgement
    Confirmed,
    /// Return once queued
    Unconfirmed,
}

/// Connected session to one lamp
#[async_trait]
pub trait OtaTransport: Send + Sync {
    /// Route decoded control notifications into `latch` from now on.
    async fn subscribe(&self, latch: StatusLatch) -> Result<(), TransportError>;
    /// Write `bytes` to `endpoint`
    async fn write(&self, endpoint: Endpoint, bytes: &[u8], kind: WriteKind) -> Result<(), TransportError>;
}

/// True if the hyphenated, lower-case form of `uuid` contains `fragment`.
pub fn uuid_matches(uuid: &uuid::Uuid, fragment: &str) -> bool {
    uuid.to_string().contains(&fragment.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::ota_uuids::*;
    use super::*;

    #[test]
    fn fragments_match_across_uuid_bases() {
        let current = uuid::Uuid::from_u128(0x0000AA09_0000_1000_8000_00805F9B34FB);
        let legacy = uuid::Uuid::from_u128(0x1234AA0A_5678_9ABC_DEF0_123456789ABC);

        assert!(uuid_matches(&current, CTRL_FRAGMENT));
        assert!(!uuid_matches(&current, DATA_FRAGMENT));
        assert!(uuid_matches(&legacy, DATA_FRAGMENT));
        assert!(uuid_matches(&legacy, "AA0A"));
    }
}
