use std::fmt;

/// Length of the status trailer closing every device response.
pub const STATUS_LEN: usize = 2;

/// Status words a Ledger device app reports in its response trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerResponseCode {
    NoError,
    DeviceBusy,
    DerivingKeyError,
    ExecutionError,
    WrongLength,
    EmptyBuffer,
    OutputBufferTooSmall,
    InvalidData,
    ConditionsNotSatisfied,
    TransactionRejected,
    BadKeyHandle,
    InvalidP1P2,
    InstructionNotSupported,
    AppNotOpen,
    UnknownError,
    SignVerifyError,
    U2fOtherError,
    U2fBadRequest,
    U2fConfigurationUnsupported,
    U2fDeviceIneligible,
    U2fTimeout,
    Timeout,
    Unknown(u16),
}

impl LedgerResponseCode {
    pub fn from_u16(code: u16) -> Self {
        match code {
            0x9000 => Self::NoError,
            0x9001 => Self::DeviceBusy,
            0x6802 => Self::DerivingKeyError,
            0x6400 => Self::ExecutionError,
            0x6700 => Self::WrongLength,
            0x6982 => Self::EmptyBuffer,
            0x6983 => Self::OutputBufferTooSmall,
            0x6984 => Self::InvalidData,
            0x6985 => Self::ConditionsNotSatisfied,
            0x6986 => Self::TransactionRejected,
            0x6A80 => Self::BadKeyHandle,
            0x6B00 => Self::InvalidP1P2,
            0x6D00 => Self::InstructionNotSupported,
            0x6E00 => Self::AppNotOpen,
            0x6F00 => Self::UnknownError,
            0x6F01 => Self::SignVerifyError,
            0x0001 => Self::U2fOtherError,
            0x0002 => Self::U2fBadRequest,
            0x0003 => Self::U2fConfigurationUnsupported,
            0x0004 => Self::U2fDeviceIneligible,
            0x0005 => Self::U2fTimeout,
            0x000E => Self::Timeout,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Self::NoError => 0x9000,
            Self::DeviceBusy => 0x9001,
            Self::DerivingKeyError => 0x6802,
            Self::ExecutionError => 0x6400,
            Self::WrongLength => 0x6700,
            Self::EmptyBuffer => 0x6982,
            Self::OutputBufferTooSmall => 0x6983,
            Self::InvalidData => 0x6984,
            Self::ConditionsNotSatisfied => 0x6985,
            Self::TransactionRejected => 0x6986,
            Self::BadKeyHandle => 0x6A80,
            Self::InvalidP1P2 => 0x6B00,
            Self::InstructionNotSupported => 0x6D00,
            Self::AppNotOpen => 0x6E00,
            Self::UnknownError => 0x6F00,
            Self::SignVerifyError => 0x6F01,
            Self::U2fOtherError => 0x0001,
            Self::U2fBadRequest => 0x0002,
            Self::U2fConfigurationUnsupported => 0x0003,
            Self::U2fDeviceIneligible => 0x0004,
            Self::U2fTimeout => 0x0005,
            Self::Timeout => 0x000E,
            Self::Unknown(code) => code,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::NoError
    }
}

impl fmt::Display for LedgerResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "unknown status 0x{code:04x}"),
            other => write!(f, "{other:?} (0x{:04x})", other.as_u16()),
        }
    }
}

/// Splits a device response into its status code and the payload before it.
///
/// Returns `None` when the response is too short to carry a status trailer.
pub fn split_status(response: &[u8]) -> Option<(LedgerResponseCode, &[u8])> {
    let split = response.len().checked_sub(STATUS_LEN)?;
    let (payload, trailer) = response.split_at(split);
    let code = u16::from_be_bytes([trailer[0], trailer[1]]);
    Some((LedgerResponseCode::from_u16(code), payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_trailer() {
        let (code, payload) = split_status(&[0xAA, 0xBB, 0x90, 0x00]).unwrap();
        assert_eq!(code, LedgerResponseCode::NoError);
        assert_eq!(payload, &[0xAA, 0xBB]);

        let (code, payload) = split_status(&[0x69, 0x85]).unwrap();
        assert_eq!(code, LedgerResponseCode::ConditionsNotSatisfied);
        assert!(payload.is_empty());
    }

    #[test]
    fn unknown_codes_are_preserved() {
        let (code, _) = split_status(&[0x12, 0x34]).unwrap();
        assert_eq!(code, LedgerResponseCode::Unknown(0x1234));
        assert_eq!(code.as_u16(), 0x1234);
    }

    #[test]
    fn short_responses_have_no_status() {
        assert!(split_status(&[]).is_none());
        assert!(split_status(&[0x90]).is_none());
    }

    #[test]
    fn known_codes_map_back() {
        for code in [0x9000, 0x6E00, 0x6A80, 0x000E, 0x0003, 0x6F01] {
            assert_eq!(LedgerResponseCode::from_u16(code).as_u16(), code);
        }
    }
}
