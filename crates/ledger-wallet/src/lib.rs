pub mod bip32;
pub mod ble;
pub mod chain;
pub mod error;
pub mod hex;
pub mod reason;

pub use error::{WalletError, WalletErrorKind, WalletResult};
pub use reason::{LedgerErrorReason, classify_error};
