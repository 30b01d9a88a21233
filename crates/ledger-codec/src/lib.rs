//! Wire formats spoken to a Ledger device over BLE: derivation path blobs,
//! application requests (APDUs), link-layer chunks and status trailers.

pub mod apdu;
pub mod chunk;
pub mod path;
pub mod status;

pub use apdu::{ApduError, ApplicationRequest, frame};
pub use chunk::{ChunkError, ChunkReassembler, DATA_TAG, MIN_MTU, PartialResponse, fragment};
pub use path::{
    ByteOrder, DerivationPath, HARDENED_FLAG, Junction, PathBuilder, PathEncoding, PathError,
    StandardJunctions, convert_from_chaincodes_data, convert_to_chaincodes_data,
};
pub use status::{LedgerResponseCode, STATUS_LEN, split_status};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error(transparent)]
    Apdu(#[from] ApduError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Path(#[from] PathError),
}

pub type CodecResult<T> = Result<T, CodecError>;
