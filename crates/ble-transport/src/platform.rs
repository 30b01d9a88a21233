use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{BleProfile, BleResult, DeviceInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unknown,
    PoweredOn,
    PoweredOff,
    Unauthorized,
    Unsupported,
}

/// Callbacks a BLE stack pushes at the connection manager.
///
/// All events for one manager are delivered through a single channel and
/// handled one at a time, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    StateChanged(AdapterState),
    Discovered(DeviceInfo),
    Connected { id: String },
    ConnectFailed { id: String, reason: String },
    /// The write characteristic is usable; `mtu` is the largest write the
    /// link accepts.
    CharacteristicsDiscovered { id: String, mtu: usize },
    Notification { id: String, value: Vec<u8> },
    Disconnected { id: String },
}

/// The BLE central operations the connection manager relies on.
///
/// `connect` only initiates the connection: completion is reported through
/// `Connected` and `CharacteristicsDiscovered`, failure through
/// `ConnectFailed`.
#[async_trait]
pub trait BlePlatform: Send + Sync {
    async fn start(&self, events: mpsc::Sender<PlatformEvent>) -> BleResult<()>;

    async fn scan(&self, services: &[Uuid]) -> BleResult<()>;

    async fn stop_scan(&self) -> BleResult<()>;

    /// Peripherals already connected to the host that expose one of `services`.
    async fn retrieve_connected(&self, services: &[Uuid]) -> BleResult<Vec<DeviceInfo>>;

    async fn connect(&self, id: &str, profile: BleProfile) -> BleResult<()>;

    async fn write(&self, id: &str, chunk: &[u8]) -> BleResult<()>;

    async fn disconnect(&self, id: &str) -> BleResult<()>;
}
