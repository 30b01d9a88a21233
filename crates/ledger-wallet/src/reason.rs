use ledger_codec::LedgerResponseCode;
use ledger_connect::LedgerError;

/// Caller-facing interpretation of a device failure.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LedgerErrorReason {
    /// The app cannot parse the payload against its metadata; the app or the
    /// metadata it was given is out of date.
    OutdatedMetadata,
    UserRejected,
    UnsupportedOperation,
    AppNotOpen,
    DeviceBusy,
    Other,
}

/// Best-effort classification from the status word and the device's reason
/// text. Text is checked first since apps reuse generic status words.
pub fn classify_error(error: &LedgerError) -> LedgerErrorReason {
    let Some(code) = error.response_code() else {
        return LedgerErrorReason::Other;
    };

    if let Some(reason) = error.reason() {
        let reason = reason.to_ascii_lowercase();
        if reason.contains("metadata")
            || reason.contains("spec version")
            || reason.contains("txn version")
        {
            return LedgerErrorReason::OutdatedMetadata;
        }
        if reason.contains("rejected") {
            return LedgerErrorReason::UserRejected;
        }
        if reason.contains("not supported") || reason.contains("unsupported") {
            return LedgerErrorReason::UnsupportedOperation;
        }
    }

    match code {
        LedgerResponseCode::TransactionRejected => LedgerErrorReason::UserRejected,
        LedgerResponseCode::InstructionNotSupported | LedgerResponseCode::InvalidP1P2 => {
            LedgerErrorReason::UnsupportedOperation
        }
        LedgerResponseCode::AppNotOpen => LedgerErrorReason::AppNotOpen,
        LedgerResponseCode::DeviceBusy => LedgerErrorReason::DeviceBusy,
        _ => LedgerErrorReason::Other,
    }
}
