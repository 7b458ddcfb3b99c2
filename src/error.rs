//! Error types for the nus-uart crate.

use thiserror::Error;

use crate::connection::SessionState;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The UART service was not found after service discovery.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// Characteristic not found within the resolved service.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Descriptor not found on the notify characteristic.
    #[error("Descriptor not found: {uuid}")]
    DescriptorNotFound {
        /// The UUID of the descriptor that was not found.
        uuid: String,
    },

    /// A connect-phase transport request failed.
    #[error("{stage} stage failed: {source}")]
    StageFailed {
        /// The pipeline stage whose request failed.
        stage: SessionState,
        /// The transport error reported for the request.
        source: Box<Error>,
    },

    /// `connect()` was already issued for this session.
    #[error("Connect already issued for this session")]
    AlreadyStarted,

    /// The device disconnected before the connect pipeline finished.
    #[error("Connection lost")]
    ConnectionLost,

    /// The scan stopped producing advertisements before any device matched.
    #[error("Scan ended without a matching device")]
    ScanEnded,

    /// No device matched before the discovery time limit.
    #[error("No matching device found within {0:?}")]
    DiscoveryTimeout(std::time::Duration),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a transport error with the stage that issued the failing request.
    pub(crate) fn at_stage(stage: SessionState, source: Error) -> Self {
        Self::StageFailed {
            stage,
            source: Box::new(source),
        }
    }

    /// The pipeline stage this error was raised in, if any.
    pub fn stage(&self) -> Option<SessionState> {
        match self {
            Self::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
