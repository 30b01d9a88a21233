use ble_transport::LinkError;
use ledger_codec::{ApduError, LedgerResponseCode, PathError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no message to send")]
    NoMessage,
    #[error("request cancelled")]
    Cancelled,
    #[error("unsupported application: {0}")]
    UnsupportedApplication(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Apdu(#[from] ApduError),
    #[error("invalid derivation path: {0}")]
    Path(#[from] PathError),
    #[error("link error: {0}")]
    Link(#[from] LinkError),
    /// The device answered with a non-success status word.
    #[error("device returned {code}")]
    Response {
        code: LedgerResponseCode,
        reason: Option<String>,
    },
    #[error("response too short: {len} bytes")]
    ShortResponse { len: usize },
    #[error("invalid response payload: {0}")]
    InvalidPayload(String),
}

impl LedgerError {
    pub fn response_code(&self) -> Option<LedgerResponseCode> {
        match self {
            Self::Response { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Response { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
