use std::sync::Arc;
use std::time::Duration;

use ble_transport::{
    BtleplugPlatform, ConnectionManager, DiscoveryEvent, KnownDevice, LinkError, ManagerOptions,
};
use ledger_chain::SupportedApplication;
use ledger_connect::LedgerApplication;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::error::{WalletError, WalletResult};

pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(5);

/// Starts a connection manager on the host's first BLE adapter.
pub async fn start_manager(options: ManagerOptions) -> WalletResult<ConnectionManager> {
    let platform = BtleplugPlatform::new().await?;
    Ok(ConnectionManager::start(Arc::new(platform), options).await?)
}

/// Lets discovery run for `duration`, then returns what was found.
pub async fn scan(manager: &ConnectionManager, duration: Duration) -> Vec<KnownDevice> {
    sleep(duration).await;
    manager.devices()
}

/// Resolves once a device (or the device with `device_id`) is known.
pub async fn wait_for_device(
    manager: &ConnectionManager,
    device_id: Option<&str>,
    wait: Duration,
) -> WalletResult<KnownDevice> {
    let matches = |device: &KnownDevice| device_id.is_none_or(|id| device.id == id);
    let find = || manager.devices().into_iter().find(|device| matches(device));

    let mut events = manager.discovery_events();
    if let Some(device) = find() {
        return Ok(device);
    }

    let waited = timeout(wait, async {
        loop {
            match events.recv().await {
                Ok(DiscoveryEvent::DeviceDiscovered(device)) if matches(&device) => {
                    return Ok(device);
                }
                Ok(DiscoveryEvent::Failed(error)) => return Err(WalletError::Discovery(error)),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "discovery events lagged");
                    if let Some(device) = find() {
                        return Ok(device);
                    }
                }
                Err(RecvError::Closed) => return Err(LinkError::ManagerStopped.into()),
            }
        }
    })
    .await;
    waited.unwrap_or(Err(WalletError::DeviceNotFound(wait)))
}

pub fn ledger_app(manager: &ConnectionManager, app: SupportedApplication) -> LedgerApplication {
    LedgerApplication::new(Arc::new(manager.clone()), app)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use ble_transport::{
        AdapterState, BlePlatform, BleProfile, BleResult, DeviceInfo, DeviceModel, PlatformEvent,
    };
    use parking_lot::Mutex;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;

    struct Advertiser {
        events: Mutex<Option<mpsc::Sender<PlatformEvent>>>,
        advertised: Vec<DeviceInfo>,
    }

    impl Advertiser {
        fn emit(&self, event: PlatformEvent) {
            if let Some(sender) = self.events.lock().clone() {
                let _ = sender.try_send(event);
            }
        }
    }

    #[async_trait]
    impl BlePlatform for Advertiser {
        async fn start(&self, events: mpsc::Sender<PlatformEvent>) -> BleResult<()> {
            *self.events.lock() = Some(events);
            self.emit(PlatformEvent::StateChanged(AdapterState::PoweredOn));
            Ok(())
        }

        async fn scan(&self, _services: &[Uuid]) -> BleResult<()> {
            for info in &self.advertised {
                self.emit(PlatformEvent::Discovered(info.clone()));
            }
            Ok(())
        }

        async fn stop_scan(&self) -> BleResult<()> {
            Ok(())
        }

        async fn retrieve_connected(&self, _services: &[Uuid]) -> BleResult<Vec<DeviceInfo>> {
            Ok(Vec::new())
        }

        async fn connect(&self, _id: &str, _profile: BleProfile) -> BleResult<()> {
            Ok(())
        }

        async fn write(&self, _id: &str, _chunk: &[u8]) -> BleResult<()> {
            Ok(())
        }

        async fn disconnect(&self, _id: &str) -> BleResult<()> {
            Ok(())
        }
    }

    async fn manager_with(advertised: Vec<DeviceInfo>) -> ConnectionManager {
        let platform = Arc::new(Advertiser {
            events: Mutex::new(None),
            advertised,
        });
        ConnectionManager::start(platform, ManagerOptions::default())
            .await
            .unwrap()
    }

    fn flex(id: &str) -> DeviceInfo {
        DeviceInfo {
            id: id.to_string(),
            name: Some("Ledger Flex".to_string()),
            rssi: None,
            services: vec![BleProfile::flex().service_uuid],
        }
    }

    #[tokio::test]
    async fn waits_for_any_device() {
        let manager = manager_with(vec![flex("flex-1")]).await;
        let device = wait_for_device(&manager, None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(device.id, "flex-1");
        assert_eq!(device.model, DeviceModel::Flex);
    }

    #[tokio::test]
    async fn waits_for_specific_device() {
        let manager = manager_with(vec![flex("flex-1"), flex("flex-2")]).await;
        let device = wait_for_device(&manager, Some("flex-2"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(device.id, "flex-2");

        let err = wait_for_device(&manager, Some("other"), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::DeviceNotFound(_)));
    }
}
