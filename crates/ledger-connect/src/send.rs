use std::sync::Arc;

use ble_transport::redact_device_id;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Exchange, LedgerError, LedgerResult};

/// A single write-then-await-response round trip that can be cancelled from
/// outside.
///
/// Cancellation drops the in-flight exchange, so no response reaches the
/// caller or a decoder. The link itself is left to the connection manager,
/// which discards the abandoned request on the next send.
pub struct SendOperation {
    exchange: Arc<dyn Exchange>,
    device_id: String,
    message: Option<Vec<u8>>,
    cancel: CancellationToken,
}

impl SendOperation {
    pub fn new(exchange: Arc<dyn Exchange>, device_id: impl Into<String>) -> Self {
        Self {
            exchange,
            device_id: device_id.into(),
            message: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_message(mut self, message: Vec<u8>) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(self) -> LedgerResult<Vec<u8>> {
        let message = self.message.ok_or(LedgerError::NoMessage)?;
        let device_id = redact_device_id(&self.device_id);
        if self.cancel.is_cancelled() {
            debug!(device_id = %device_id, "send cancelled before start");
            return Err(LedgerError::Cancelled);
        }

        debug!(device_id = %device_id, bytes = message.len(), "send started");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(device_id = %device_id, "send cancelled");
                Err(LedgerError::Cancelled)
            }
            result = self.exchange.exchange(&self.device_id, message) => {
                let response = result?;
                debug!(device_id = %device_id, bytes = response.len(), "send completed");
                Ok(response)
            }
        }
    }
}
