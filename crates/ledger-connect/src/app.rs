//! Account and signing flows on top of [`SendOperation`].

use std::sync::Arc;

use ble_transport::redact_device_id;
use ledger_chain::{AppKind, SupportedApplication};
use ledger_codec::{ApduError, ApplicationRequest};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::response::{
    AccountDecoder, AppVersion, LedgerAccount, SignatureDecoder, StatusDecoder, VersionDecoder,
    decode,
};
use crate::{Exchange, LedgerError, LedgerResult, SendOperation};

/// Payload bytes per signing frame, independent of the link MTU.
pub const SIGNING_CHUNK_SIZE: usize = 250;

const P1_SHOW_ON_DEVICE: u8 = 0x01;
const P1_SILENT: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    GetVersion,
    GetAddress,
    Sign,
}

impl Instruction {
    pub const fn code(self) -> u8 {
        match self {
            Self::GetVersion => 0x00,
            Self::GetAddress => 0x01,
            Self::Sign => 0x02,
        }
    }
}

/// Tells the device how to accumulate a streamed signing payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    Initialize,
    Add,
    Last,
}

impl PayloadType {
    pub const fn code(self) -> u8 {
        match self {
            Self::Initialize => 0x00,
            Self::Add => 0x01,
            Self::Last => 0x02,
        }
    }

    /// Derived purely from position within a chain of `count` frames.
    pub fn for_position(index: usize, count: usize) -> Self {
        if index == 0 {
            Self::Initialize
        } else if index + 1 == count {
            Self::Last
        } else {
            Self::Add
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningPayload {
    pub transaction: Vec<u8>,
    /// Metadata proof streamed after the transaction.
    pub proof: Option<Vec<u8>>,
}

impl SigningPayload {
    pub fn new(transaction: Vec<u8>) -> Self {
        Self {
            transaction,
            proof: None,
        }
    }

    pub fn with_proof(mut self, proof: Vec<u8>) -> Self {
        self.proof = Some(proof);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningChunk {
    pub payload_type: PayloadType,
    pub data: Vec<u8>,
}

/// A decoded account together with the serialized path it was derived at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountResponse {
    pub account: LedgerAccount,
    pub derivation_path: Vec<u8>,
}

/// Builds the address query for `app`.
///
/// The multi-chain substrate app needs the address format after the path;
/// per-chain apps imply it from their class byte.
pub fn account_request(
    app: &SupportedApplication,
    derivation_path: &[u8],
    show_on_device: bool,
) -> ApplicationRequest {
    let mut payload = derivation_path.to_vec();
    if app.kind == AppKind::Substrate
        && let Some(prefix) = app.address_prefix
    {
        payload.extend_from_slice(&app.path_encoding.byte_order.u16_bytes(prefix));
    }
    let param1 = if show_on_device {
        P1_SHOW_ON_DEVICE
    } else {
        P1_SILENT
    };
    ApplicationRequest::new(
        app.cla,
        Instruction::GetAddress.code(),
        param1,
        app.scheme.code(),
        payload,
    )
}

/// Splits a signing request into frames: the path plus transaction length
/// first, then `transaction ++ proof` in [`SIGNING_CHUNK_SIZE`] pieces.
pub fn signing_chunks(
    app: &SupportedApplication,
    derivation_path: &[u8],
    payload: &SigningPayload,
) -> LedgerResult<Vec<SigningChunk>> {
    if payload.transaction.is_empty() {
        return Err(LedgerError::InvalidRequest(
            "transaction payload is empty".to_string(),
        ));
    }
    let transaction_len =
        u16::try_from(payload.transaction.len()).map_err(|_| ApduError::PayloadTooLarge {
            len: payload.transaction.len(),
            max: usize::from(u16::MAX),
        })?;

    let mut first = derivation_path.to_vec();
    first.extend_from_slice(&app.path_encoding.byte_order.u16_bytes(transaction_len));

    let mut stream = payload.transaction.clone();
    if let Some(proof) = &payload.proof {
        stream.extend_from_slice(proof);
    }

    let mut frames = vec![first];
    frames.extend(stream.chunks(SIGNING_CHUNK_SIZE).map(<[u8]>::to_vec));
    let count = frames.len();
    Ok(frames
        .into_iter()
        .enumerate()
        .map(|(index, data)| SigningChunk {
            payload_type: PayloadType::for_position(index, count),
            data,
        })
        .collect())
}

/// One device application reached through an [`Exchange`].
///
/// Each flow (an account query, a version query, a whole signing chain) runs
/// under a child of the application's parent token. Cancelling a flow aborts
/// its in-flight send and every frame not yet sent; the next flow starts with
/// a fresh token. Cancelling the parent stops all of them.
pub struct LedgerApplication {
    exchange: Arc<dyn Exchange>,
    app: SupportedApplication,
    parent: CancellationToken,
    flow: Mutex<CancellationToken>,
}

impl LedgerApplication {
    pub fn new(exchange: Arc<dyn Exchange>, app: SupportedApplication) -> Self {
        Self::with_parent(exchange, app, CancellationToken::new())
    }

    pub fn with_cancellation(self, parent: CancellationToken) -> Self {
        Self::with_parent(self.exchange, self.app, parent)
    }

    fn with_parent(
        exchange: Arc<dyn Exchange>,
        app: SupportedApplication,
        parent: CancellationToken,
    ) -> Self {
        let flow = Mutex::new(parent.child_token());
        Self {
            exchange,
            app,
            parent,
            flow,
        }
    }

    pub fn application(&self) -> &SupportedApplication {
        &self.app
    }

    /// Token of the flow in progress, or of the next one to start.
    pub fn cancellation(&self) -> CancellationToken {
        self.flow_token()
    }

    fn flow_token(&self) -> CancellationToken {
        let mut flow = self.flow.lock();
        if flow.is_cancelled() && !self.parent.is_cancelled() {
            debug!(app = self.app.name, "starting a fresh flow after cancellation");
            *flow = self.parent.child_token();
        }
        flow.clone()
    }

    pub async fn get_account(
        &self,
        device_id: &str,
        account_index: u32,
        show_on_device: bool,
    ) -> LedgerResult<AccountResponse> {
        let path = self.app.derivation_path(account_index);
        self.get_account_at_path(device_id, path, show_on_device)
            .await
    }

    pub async fn get_account_at_path(
        &self,
        device_id: &str,
        derivation_path: Vec<u8>,
        show_on_device: bool,
    ) -> LedgerResult<AccountResponse> {
        let cancel = self.flow_token();
        let request = account_request(&self.app, &derivation_path, show_on_device);
        let response = self.send(device_id, &request, &cancel).await?;
        let account = decode(&AccountDecoder::new(self.app.scheme), &response)?.value;
        info!(
            device_id = %redact_device_id(device_id),
            app = self.app.name,
            address = %account.address,
            "account retrieved"
        );
        Ok(AccountResponse {
            account,
            derivation_path,
        })
    }

    pub async fn get_version(&self, device_id: &str) -> LedgerResult<AppVersion> {
        let request =
            ApplicationRequest::new(self.app.cla, Instruction::GetVersion.code(), 0, 0, Vec::new());
        let response = self.send(device_id, &request, &self.flow_token()).await?;
        Ok(decode(&VersionDecoder, &response)?.value)
    }

    pub async fn sign(
        &self,
        device_id: &str,
        account_index: u32,
        payload: &SigningPayload,
    ) -> LedgerResult<Vec<u8>> {
        let path = self.app.derivation_path(account_index);
        self.sign_at_path(device_id, &path, payload).await
    }

    /// Sends every frame in order; only the last response carries the
    /// signature. Any failure stops the chain.
    pub async fn sign_at_path(
        &self,
        device_id: &str,
        derivation_path: &[u8],
        payload: &SigningPayload,
    ) -> LedgerResult<Vec<u8>> {
        let chunks = signing_chunks(&self.app, derivation_path, payload)?;
        let cancel = self.flow_token();
        let count = chunks.len();
        let mut last_response = Vec::new();
        for (index, chunk) in chunks.into_iter().enumerate() {
            debug!(
                device_id = %redact_device_id(device_id),
                chunk = index + 1,
                total = count,
                payload_type = ?chunk.payload_type,
                bytes = chunk.data.len(),
                "sending signing chunk"
            );
            let request = ApplicationRequest::new(
                self.app.cla,
                Instruction::Sign.code(),
                chunk.payload_type.code(),
                self.app.scheme.code(),
                chunk.data,
            );
            let response = self.send(device_id, &request, &cancel).await?;
            if chunk.payload_type != PayloadType::Last {
                decode(&StatusDecoder, &response)?;
            }
            last_response = response;
        }
        let signature = decode(&SignatureDecoder, &last_response)?.value;
        info!(
            device_id = %redact_device_id(device_id),
            app = self.app.name,
            chunks = count,
            "payload signed"
        );
        Ok(signature)
    }

    async fn send(
        &self,
        device_id: &str,
        request: &ApplicationRequest,
        cancel: &CancellationToken,
    ) -> LedgerResult<Vec<u8>> {
        let message = request.encode()?;
        SendOperation::new(Arc::clone(&self.exchange), device_id)
            .with_message(message)
            .with_cancellation(cancel.child_token())
            .run()
            .await
    }
}
