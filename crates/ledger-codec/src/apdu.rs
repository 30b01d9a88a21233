use thiserror::Error;

const HEADER_LEN: usize = 4;
const SHORT_LEN_LIMIT: usize = 256;
const EXTENDED_LEN_ESCAPE: u8 = 0x00;
const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApduError {
    #[error("payload_too_large: {len} bytes exceeds {max}")]
    PayloadTooLarge { len: usize, max: usize },
}

/// One application-layer command addressed to a Ledger app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationRequest {
    pub cla: u8,
    pub instruction: u8,
    pub param1: u8,
    pub param2: u8,
    pub payload: Vec<u8>,
}

impl ApplicationRequest {
    pub fn new(cla: u8, instruction: u8, param1: u8, param2: u8, payload: Vec<u8>) -> Self {
        Self {
            cla,
            instruction,
            param1,
            param2,
            payload,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ApduError> {
        frame(
            self.cla,
            self.instruction,
            self.param1,
            self.param2,
            &self.payload,
        )
    }
}

/// Serializes an APDU header followed by its length-prefixed payload.
///
/// Payloads shorter than 256 bytes get a single length byte. Longer payloads
/// use the extended form: a zero byte and then a big-endian `u16` length. An
/// empty payload carries no length prefix at all.
pub fn frame(
    cla: u8,
    instruction: u8,
    param1: u8,
    param2: u8,
    payload: &[u8],
) -> Result<Vec<u8>, ApduError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ApduError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let mut bytes = Vec::with_capacity(HEADER_LEN + 3 + payload.len());
    bytes.extend_from_slice(&[cla, instruction, param1, param2]);

    if payload.is_empty() {
        return Ok(bytes);
    }

    if payload.len() < SHORT_LEN_LIMIT {
        bytes.push(payload.len() as u8);
    } else {
        bytes.push(EXTENDED_LEN_ESCAPE);
        bytes.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    }
    bytes.extend_from_slice(payload);
    Ok(bytes)
}
