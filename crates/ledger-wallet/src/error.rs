use std::time::Duration;

use ble_transport::{BleError, DiscoveryError, LinkError};
use ledger_connect::LedgerError;
use thiserror::Error;

/// High-level category for a [`WalletError`].
///
/// Used to produce machine-readable error codes (see [`WalletError::code`]) and
/// to drive retry / recovery logic in callers without string matching.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WalletErrorKind {
    /// The BLE adapter or platform stack failed.
    Ble,
    /// The link to the device failed or the device went away.
    Link,
    /// The device app answered with an error status.
    Device,
    /// The request was invalid (bad path, unknown chain, malformed input).
    Validation,
    /// The caller cancelled the operation.
    Cancelled,
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid BIP32 path: {0}")]
    InvalidBip32Path(String),
    #[error("unsupported chain '{0}'")]
    UnsupportedChain(String),
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("no Ledger device found within {0:?}")]
    DeviceNotFound(Duration),
    #[error("BLE error: {0}")]
    Ble(#[from] BleError),
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type WalletResult<T> = std::result::Result<T, WalletError>;

impl From<LinkError> for WalletError {
    fn from(error: LinkError) -> Self {
        Self::Ledger(LedgerError::Link(error))
    }
}

impl WalletError {
    pub fn kind(&self) -> WalletErrorKind {
        match self {
            Self::InvalidBip32Path(_) | Self::UnsupportedChain(_) | Self::InvalidHex(_) => {
                WalletErrorKind::Validation
            }
            Self::DeviceNotFound(_) => WalletErrorKind::Link,
            Self::Ble(_) | Self::Discovery(_) => WalletErrorKind::Ble,
            Self::Ledger(error) => classify_ledger_error(error),
        }
    }

    /// Returns a short uppercase string code for this error (e.g. `"LINK"`).
    pub fn code(&self) -> &'static str {
        match self.kind() {
            WalletErrorKind::Ble => "BLE",
            WalletErrorKind::Link => "LINK",
            WalletErrorKind::Device => "DEVICE",
            WalletErrorKind::Validation => "VALIDATION",
            WalletErrorKind::Cancelled => "CANCELLED",
        }
    }
}

fn classify_ledger_error(error: &LedgerError) -> WalletErrorKind {
    match error {
        LedgerError::Cancelled => WalletErrorKind::Cancelled,
        LedgerError::Link(_) => WalletErrorKind::Link,
        LedgerError::Response { .. }
        | LedgerError::ShortResponse { .. }
        | LedgerError::InvalidPayload(_) => WalletErrorKind::Device,
        LedgerError::NoMessage
        | LedgerError::UnsupportedApplication(_)
        | LedgerError::InvalidRequest(_)
        | LedgerError::Apdu(_)
        | LedgerError::Path(_) => WalletErrorKind::Validation,
    }
}
