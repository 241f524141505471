//! Error types for discovery, transport and the OTA engine.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::{OtaStatus, Phase};

/// Result type alias for the CLI-facing layers.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures raised by a transport session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Error reported by the BLE stack.
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// The notification stream ended, the link is gone.
    #[error("device disconnected")]
    Disconnected,
}

/// Terminal failures of one OTA attempt.
#[derive(Debug, Error)]
pub enum OtaError {
    /// No status notification arrived in time.
    #[error("no response from device within {timeout:?} while {phase}")]
    Timeout { phase: Phase, timeout: Duration },

    /// The device answered with a status that is wrong for the phase.
    #[error("unexpected status {status} while {phase}")]
    UnexpectedStatus { phase: Phase, status: OtaStatus },

    /// The link failed underneath the protocol.
    #[error("transport failure while {phase}: {source}")]
    Transport {
        phase: Phase,
        #[source]
        source: TransportError,
    },

    /// The device refused to commit the image after `END`.
    #[error("device rejected the firmware (status {status})")]
    FinishFailed { status: OtaStatus },

    /// Endpoint resolver found no characteristic carrying the fragment.
    #[error("no characteristic matching '{fragment}'")]
    EndpointNotFound { fragment: String },

    /// The attempt was cancelled and `ABORT` was sent.
    #[error("OTA aborted")]
    Aborted,
}

impl OtaError {
    /// Phase the attempt was in when it failed, if the error carries one.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            OtaError::Timeout { phase, .. }
            | OtaError::UnexpectedStatus { phase, .. }
            | OtaError::Transport { phase, .. } => Some(*phase),
            OtaError::FinishFailed { .. } => Some(Phase::Finishing),
            OtaError::EndpointNotFound { .. } | OtaError::Aborted => None,
        }
    }
}

/// Errors surfaced by the CLI pipeline: load, discover, connect, flash.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Ota(#[from] OtaError),

    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    #[error("failed to read firmware '{}': {source}", path.display())]
    Firmware {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no Bluetooth adapter available")]
    NoAdapter,

    #[error("no matching device found")]
    DeviceNotFound,

    #[error("invalid device selection: {0}")]
    InvalidSelection(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
