use std::cmp::Ordering;

use thiserror::Error;

/// Tag byte carried by every APDU data chunk on the BLE link.
pub const DATA_TAG: u8 = 0x05;

const SEQUENCE_LEN: usize = 2;
const TOTAL_LEN: usize = 2;
const HEADER_LEN: usize = 1 + SEQUENCE_LEN;
const FIRST_HEADER_LEN: usize = HEADER_LEN + TOTAL_LEN;
const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

/// Smallest MTU that fits the first-chunk header plus one payload byte.
pub const MIN_MTU: usize = FIRST_HEADER_LEN + 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("mtu_too_small: {mtu} (minimum {min})")]
    MtuTooSmall { mtu: usize, min: usize },
    #[error("message_too_large: {len} bytes")]
    MessageTooLarge { len: usize },
    #[error("short_packet: {len} bytes")]
    ShortPacket { len: usize },
    #[error("unsupported_response: tag 0x{tag:02x}")]
    UnsupportedResponse { tag: u8 },
    #[error("uncompleted_response: first chunk received while a response is still open")]
    UncompletedResponse,
    #[error("no_partial_response: continuation chunk without a first chunk")]
    NoPartialResponse,
    #[error("unexpected_sequence: expected {expected}, got {actual}")]
    UnexpectedSequence { expected: u16, actual: u16 },
    #[error("overpopulated: expected {expected} bytes, got {}", received.len())]
    Overpopulated { expected: usize, received: Vec<u8> },
}

/// Splits a serialized APDU into link chunks no larger than `mtu`.
///
/// Layout of every chunk: `[tag][sequence u16 BE]`, and the first chunk also
/// carries the total message length as `u16 BE` before its payload slice.
/// An empty message still produces one header-only chunk.
pub fn fragment(message: &[u8], mtu: usize) -> Result<Vec<Vec<u8>>, ChunkError> {
    if mtu < MIN_MTU {
        return Err(ChunkError::MtuTooSmall { mtu, min: MIN_MTU });
    }
    if message.len() > MAX_MESSAGE_LEN {
        return Err(ChunkError::MessageTooLarge { len: message.len() });
    }

    let total = message.len() as u16;
    let mut chunks = Vec::with_capacity(message.len() / (mtu - HEADER_LEN) + 1);
    let mut offset = 0usize;
    let mut sequence = 0u16;

    loop {
        let mut chunk = Vec::with_capacity(mtu);
        chunk.push(DATA_TAG);
        chunk.extend_from_slice(&sequence.to_be_bytes());
        if sequence == 0 {
            chunk.extend_from_slice(&total.to_be_bytes());
        }

        let take = (mtu - chunk.len()).min(message.len() - offset);
        chunk.extend_from_slice(&message[offset..offset + take]);
        offset += take;
        chunks.push(chunk);

        if offset >= message.len() {
            break;
        }
        // At least three payload bytes per chunk keeps this inside u16.
        sequence += 1;
    }

    Ok(chunks)
}

/// In-progress reassembly of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialResponse {
    data: Vec<u8>,
    total: usize,
    next_sequence: u16,
}

impl PartialResponse {
    pub fn accumulated(&self) -> usize {
        self.data.len()
    }

    pub fn declared(&self) -> usize {
        self.total
    }
}

/// Rebuilds one response from successive notification chunks.
///
/// `receive` yields `Ok(None)` while more chunks are needed, `Ok(Some(_))`
/// exactly once when the declared length is reached, and an error on any
/// protocol violation. Errors always discard the partial state.
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    partial: Option<PartialResponse>,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self { partial: None }
    }

    pub fn is_idle(&self) -> bool {
        self.partial.is_none()
    }

    pub fn partial(&self) -> Option<&PartialResponse> {
        self.partial.as_ref()
    }

    pub fn reset(&mut self) {
        self.partial = None;
    }

    pub fn receive(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, ChunkError> {
        let result = self.apply(chunk);
        if result.is_err() {
            self.partial = None;
        }
        result
    }

    fn apply(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, ChunkError> {
        if chunk.len() < HEADER_LEN {
            return Err(ChunkError::ShortPacket { len: chunk.len() });
        }
        if chunk[0] != DATA_TAG {
            return Err(ChunkError::UnsupportedResponse { tag: chunk[0] });
        }

        let sequence = u16::from_be_bytes([chunk[1], chunk[2]]);
        let body = &chunk[HEADER_LEN..];

        let mut partial = if sequence == 0 {
            if self.partial.is_some() {
                return Err(ChunkError::UncompletedResponse);
            }
            if body.len() < TOTAL_LEN {
                return Err(ChunkError::ShortPacket { len: chunk.len() });
            }
            PartialResponse {
                data: body[TOTAL_LEN..].to_vec(),
                total: u16::from_be_bytes([body[0], body[1]]) as usize,
                next_sequence: 1,
            }
        } else {
            let mut partial = self.partial.take().ok_or(ChunkError::NoPartialResponse)?;
            if sequence != partial.next_sequence {
                return Err(ChunkError::UnexpectedSequence {
                    expected: partial.next_sequence,
                    actual: sequence,
                });
            }
            partial.data.extend_from_slice(body);
            partial.next_sequence = partial.next_sequence.wrapping_add(1);
            partial
        };

        match partial.data.len().cmp(&partial.total) {
            Ordering::Greater => Err(ChunkError::Overpopulated {
                expected: partial.total,
                received: std::mem::take(&mut partial.data),
            }),
            Ordering::Equal => Ok(Some(partial.data)),
            Ordering::Less => {
                self.partial = Some(partial);
                Ok(None)
            }
        }
    }
}
