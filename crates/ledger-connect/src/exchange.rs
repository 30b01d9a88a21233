use async_trait::async_trait;
use ble_transport::{ConnectionManager, LinkResult};

/// One framed request out, one reassembled response back.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn exchange(&self, device_id: &str, message: Vec<u8>) -> LinkResult<Vec<u8>>;
}

#[async_trait]
impl Exchange for ConnectionManager {
    async fn exchange(&self, device_id: &str, message: Vec<u8>) -> LinkResult<Vec<u8>> {
        self.send(device_id, message).await
    }
}
