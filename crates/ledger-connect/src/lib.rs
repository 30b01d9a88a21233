//! Request/response plumbing and application flows for Ledger device apps.

pub mod app;
pub mod error;
pub mod exchange;
pub mod response;
pub mod send;

pub use app::{
    AccountResponse, Instruction, LedgerApplication, PayloadType, SIGNING_CHUNK_SIZE,
    SigningChunk, SigningPayload, account_request, signing_chunks,
};
pub use error::{LedgerError, LedgerResult};
pub use exchange::Exchange;
pub use response::{
    AccountDecoder, AppVersion, LedgerAccount, LedgerResponse, ResponseDecoder, SignatureDecoder,
    StatusDecoder, VersionDecoder, decode,
};
pub use send::SendOperation;
pub use tokio_util::sync::CancellationToken;
