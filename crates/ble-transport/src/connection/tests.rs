use std::time::Duration;

use async_trait::async_trait;
use ledger_codec::{ChunkError, DATA_TAG};
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use super::*;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Respond,
    Silent,
    FailConnect,
}

/// In-memory central emulating a Ledger that answers each request with the
/// request bytes followed by a success status.
struct MockPlatform {
    events: Mutex<Option<mpsc::Sender<PlatformEvent>>>,
    advertised: Vec<DeviceInfo>,
    preconnected: Vec<DeviceInfo>,
    mtu: usize,
    behavior: Mutex<Behavior>,
    device_side: Mutex<ChunkReassembler>,
    /// When set, `connect` stops after `Connected` until [`Self::discover`].
    hold_discovery: Mutex<bool>,
    writes: Mutex<Vec<Vec<u8>>>,
    connects: Mutex<Vec<String>>,
    disconnects: Mutex<Vec<String>>,
    log: Mutex<Vec<&'static str>>,
}

impl MockPlatform {
    fn new(advertised: Vec<DeviceInfo>) -> Self {
        Self {
            events: Mutex::new(None),
            advertised,
            preconnected: Vec::new(),
            mtu: 23,
            behavior: Mutex::new(Behavior::Respond),
            device_side: Mutex::new(ChunkReassembler::new()),
            hold_discovery: Mutex::new(false),
            writes: Mutex::new(Vec::new()),
            connects: Mutex::new(Vec::new()),
            disconnects: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    fn with_behavior(self, behavior: Behavior) -> Self {
        *self.behavior.lock() = behavior;
        self
    }

    fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    fn hold_discovery(&self, hold: bool) {
        *self.hold_discovery.lock() = hold;
    }

    fn discover(&self, id: &str) {
        self.emit(PlatformEvent::CharacteristicsDiscovered {
            id: id.to_string(),
            mtu: self.mtu,
        });
    }

    fn emit(&self, event: PlatformEvent) {
        let sender = self.events.lock().clone().expect("platform not started");
        sender.try_send(event).expect("event buffer full");
    }

    fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }
}

#[async_trait]
impl BlePlatform for MockPlatform {
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
        Ok(self.preconnected.clone())
    }

    async fn connect(&self, id: &str, _profile: BleProfile) -> BleResult<()> {
        self.connects.lock().push(id.to_string());
        self.log.lock().push("connect");
        if *self.behavior.lock() == Behavior::FailConnect {
            self.emit(PlatformEvent::ConnectFailed {
                id: id.to_string(),
                reason: "peer removed pairing information".to_string(),
            });
            return Ok(());
        }
        self.emit(PlatformEvent::Connected { id: id.to_string() });
        if !*self.hold_discovery.lock() {
            self.discover(id);
        }
        Ok(())
    }

    async fn write(&self, id: &str, chunk: &[u8]) -> BleResult<()> {
        self.writes.lock().push(chunk.to_vec());
        self.log.lock().push("write");
        let request = self
            .device_side
            .lock()
            .receive(chunk)
            .expect("host sent malformed chunk");
        let Some(mut response) = request else {
            return Ok(());
        };
        if *self.behavior.lock() != Behavior::Respond {
            return Ok(());
        }
        response.extend_from_slice(&[0x90, 0x00]);
        for value in fragment(&response, self.mtu).expect("fragment response") {
            self.emit(PlatformEvent::Notification {
                id: id.to_string(),
                value,
            });
        }
        Ok(())
    }

    async fn disconnect(&self, id: &str) -> BleResult<()> {
        self.disconnects.lock().push(id.to_string());
        self.log.lock().push("disconnect");
        self.device_side.lock().reset();
        self.emit(PlatformEvent::Disconnected { id: id.to_string() });
        Ok(())
    }
}

const DEVICE: &str = "5F2A8C1E-0000-4C65-6467-6572AABBCCDD";

fn advertisement(id: &str, profile: BleProfile) -> DeviceInfo {
    DeviceInfo {
        id: id.to_string(),
        name: Some("Nano X 4C2B".to_string()),
        rssi: Some(-48),
        services: vec![profile.service_uuid],
    }
}

async fn start(platform: Arc<MockPlatform>) -> ConnectionManager {
    let manager = ConnectionManager::start(platform, ManagerOptions::default())
        .await
        .unwrap();
    let observed = manager.clone();
    wait_until(move || !observed.devices().is_empty()).await;
    manager
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

fn spawn_send(
    manager: &ConnectionManager,
    message: Vec<u8>,
) -> JoinHandle<LinkResult<Vec<u8>>> {
    let manager = manager.clone();
    tokio::spawn(async move { manager.send(DEVICE, message).await })
}

#[tokio::test]
async fn discovers_only_known_signatures() {
    let stranger = DeviceInfo {
        id: "headphones".to_string(),
        name: Some("Headphones".to_string()),
        rssi: None,
        services: vec![Uuid::nil()],
    };
    let platform = Arc::new(MockPlatform::new(vec![
        stranger,
        advertisement(DEVICE, BleProfile::nano_x()),
    ]));
    let manager = start(platform).await;

    let devices = manager.devices();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, DEVICE);
    assert_eq!(devices[0].model, DeviceModel::NanoX);
    assert!(!devices[0].connected);
}

#[tokio::test]
async fn retrieves_already_connected_devices() {
    let mut platform = MockPlatform::new(Vec::new());
    platform.preconnected = vec![advertisement(DEVICE, BleProfile::stax())];
    let manager = start(Arc::new(platform)).await;

    assert_eq!(manager.devices()[0].model, DeviceModel::Stax);
}

#[tokio::test]
async fn send_connects_fragments_and_reassembles() {
    let platform = Arc::new(MockPlatform::new(vec![advertisement(
        DEVICE,
        BleProfile::nano_x(),
    )]));
    let manager = start(platform.clone()).await;

    let message: Vec<u8> = (0..300u16).map(|i| i as u8).collect();
    let response = manager.send(DEVICE, message.clone()).await.unwrap();

    let mut expected = message;
    expected.extend_from_slice(&[0x90, 0x00]);
    assert_eq!(response, expected);
    assert_eq!(platform.connects.lock().as_slice(), [DEVICE.to_string()]);

    let writes = platform.writes();
    assert!(writes.len() > 1);
    for (index, chunk) in writes.iter().enumerate() {
        assert!(chunk.len() <= platform.mtu);
        assert_eq!(chunk[0], DATA_TAG);
        assert_eq!(u16::from_be_bytes([chunk[1], chunk[2]]) as usize, index);
    }
    assert!(manager.devices()[0].connected);

    // The link stays up for the next request.
    manager.send(DEVICE, vec![0xE0, 0x01]).await.unwrap();
    assert_eq!(platform.connects.lock().len(), 1);
}

#[tokio::test]
async fn unknown_device_is_rejected() {
    let platform = Arc::new(MockPlatform::new(vec![advertisement(
        DEVICE,
        BleProfile::nano_x(),
    )]));
    let manager = start(platform.clone()).await;

    let err = manager.send("missing", vec![1]).await.unwrap_err();
    assert!(matches!(err, LinkError::DeviceNotFound(id) if id == "missing"));
    assert!(platform.writes().is_empty());
}

#[tokio::test]
async fn one_request_in_flight_per_device() {
    let platform = Arc::new(
        MockPlatform::new(vec![advertisement(DEVICE, BleProfile::nano_x())])
            .with_behavior(Behavior::Silent),
    );
    let manager = start(platform.clone()).await;

    let first = spawn_send(&manager, vec![0xAA; 4]);
    let observed = platform.clone();
    wait_until(move || !observed.writes().is_empty()).await;

    let err = manager.send(DEVICE, vec![0xBB; 4]).await.unwrap_err();
    assert!(matches!(err, LinkError::Busy));

    let mut discovery = manager.discovery_events();
    manager.cancel_request(DEVICE).await.unwrap();
    let err = first.await.unwrap().unwrap_err();
    assert!(matches!(err, LinkError::DeviceDisconnected));
    assert_eq!(platform.disconnects.lock().as_slice(), [DEVICE.to_string()]);

    let event = timeout(Duration::from_secs(1), discovery.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, DiscoveryEvent::DeviceRemoved(DEVICE.to_string()));
    let observed = manager.clone();
    wait_until(move || observed.devices().is_empty()).await;
}

#[tokio::test]
async fn connect_failure_fails_pending_request() {
    let platform = Arc::new(
        MockPlatform::new(vec![advertisement(DEVICE, BleProfile::flex())])
            .with_behavior(Behavior::FailConnect),
    );
    let manager = start(platform.clone()).await;

    let err = manager.send(DEVICE, vec![1, 2, 3]).await.unwrap_err();
    assert!(matches!(err, LinkError::DeviceDisconnected));
    assert!(platform.writes().is_empty());
    let observed = manager.clone();
    wait_until(move || observed.devices().is_empty()).await;
}

#[tokio::test]
async fn late_response_to_abandoned_request_is_not_delivered() {
    let platform = Arc::new(
        MockPlatform::new(vec![advertisement(DEVICE, BleProfile::nano_x())])
            .with_behavior(Behavior::Silent),
    );
    let manager = start(platform.clone()).await;

    let abandoned = spawn_send(&manager, vec![0xAA; 4]);
    let observed = platform.clone();
    wait_until(move || !observed.writes().is_empty()).await;
    abandoned.abort();
    assert!(abandoned.await.unwrap_err().is_cancelled());

    platform.hold_discovery(true);
    platform.set_behavior(Behavior::Respond);
    let next = spawn_send(&manager, vec![0xBB; 4]);
    let observed = platform.clone();
    wait_until(move || observed.connects.lock().len() == 2).await;
    assert_eq!(platform.disconnects.lock().as_slice(), [DEVICE.to_string()]);
    assert_eq!(platform.writes().len(), 1);

    // The device answers the abandoned request after the next one was sent.
    for value in fragment(&[0xAA, 0xAA, 0xAA, 0xAA, 0x90, 0x00], platform.mtu).unwrap() {
        platform.emit(PlatformEvent::Notification {
            id: DEVICE.to_string(),
            value,
        });
    }
    platform.discover(DEVICE);

    let response = next.await.unwrap().unwrap();
    assert_eq!(response, vec![0xBB, 0xBB, 0xBB, 0xBB, 0x90, 0x00]);
    assert_eq!(
        platform.log.lock().as_slice(),
        ["connect", "write", "disconnect", "connect", "write"]
    );
    assert!(manager.devices()[0].connected);
}

#[tokio::test]
async fn writes_wait_for_characteristic_discovery() {
    let platform = Arc::new(MockPlatform::new(vec![advertisement(
        DEVICE,
        BleProfile::nano_x(),
    )]));
    platform.hold_discovery(true);
    let manager = start(platform.clone()).await;

    let message: Vec<u8> = (0..60u8).collect();
    let pending = spawn_send(&manager, message.clone());
    let observed = platform.clone();
    wait_until(move || observed.connects.lock().len() == 1).await;
    sleep(Duration::from_millis(20)).await;
    assert!(platform.writes().is_empty());
    assert!(!manager.devices()[0].connected);

    platform.discover(DEVICE);
    let response = pending.await.unwrap().unwrap();

    let mut expected = message.clone();
    expected.extend_from_slice(&[0x90, 0x00]);
    assert_eq!(response, expected);
    assert_eq!(platform.writes(), fragment(&message, platform.mtu).unwrap());
}

#[tokio::test]
async fn cancel_while_connecting_drops_the_device() {
    let platform = Arc::new(MockPlatform::new(vec![advertisement(
        DEVICE,
        BleProfile::nano_x(),
    )]));
    platform.hold_discovery(true);
    let manager = start(platform.clone()).await;

    let pending = spawn_send(&manager, vec![0x42; 8]);
    let observed = platform.clone();
    wait_until(move || observed.connects.lock().len() == 1).await;

    manager.cancel_request(DEVICE).await.unwrap();
    assert!(matches!(
        pending.await.unwrap().unwrap_err(),
        LinkError::DeviceDisconnected
    ));
    assert_eq!(platform.disconnects.lock().as_slice(), [DEVICE.to_string()]);
    let observed = manager.clone();
    wait_until(move || observed.devices().is_empty()).await;

    // Characteristics reported by the abandoned attempt change nothing.
    platform.discover(DEVICE);
    sleep(Duration::from_millis(20)).await;
    assert!(platform.writes().is_empty());
    assert!(manager.devices().is_empty());
}

#[tokio::test]
async fn malformed_notification_fails_request_and_resets() {
    let platform = Arc::new(
        MockPlatform::new(vec![advertisement(DEVICE, BleProfile::nano_x())])
            .with_behavior(Behavior::Silent),
    );
    let manager = start(platform.clone()).await;

    let first = spawn_send(&manager, vec![0x10; 4]);
    let observed = platform.clone();
    wait_until(move || !observed.writes().is_empty()).await;

    platform.emit(PlatformEvent::Notification {
        id: DEVICE.to_string(),
        value: vec![DATA_TAG, 0x00, 0x00, 0x00, 0x02, 0x01, 0x02, 0x03],
    });
    let err = first.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        LinkError::Transport(ChunkError::Overpopulated { expected: 2, .. })
    ));

    platform.set_behavior(Behavior::Respond);
    let response = manager.send(DEVICE, vec![0x20; 4]).await.unwrap();
    assert_eq!(response, vec![0x20, 0x20, 0x20, 0x20, 0x90, 0x00]);
}

#[tokio::test]
async fn powered_off_fails_requests_and_reports_out_of_band() {
    let platform = Arc::new(
        MockPlatform::new(vec![advertisement(DEVICE, BleProfile::nano_x())])
            .with_behavior(Behavior::Silent),
    );
    let manager = start(platform.clone()).await;
    let mut discovery = manager.discovery_events();

    let first = spawn_send(&manager, vec![0x01]);
    let observed = platform.clone();
    wait_until(move || !observed.writes().is_empty()).await;

    platform.emit(PlatformEvent::StateChanged(AdapterState::PoweredOff));
    let err = first.await.unwrap().unwrap_err();
    assert!(matches!(err, LinkError::DeviceDisconnected));

    let failure = timeout(Duration::from_secs(1), async {
        loop {
            if let DiscoveryEvent::Failed(err) = discovery.recv().await.unwrap() {
                return err;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(failure, DiscoveryError::PoweredOff);
    let observed = manager.clone();
    wait_until(move || observed.devices().is_empty()).await;
}

#[tokio::test]
async fn stop_fails_pending_requests() {
    let platform = Arc::new(
        MockPlatform::new(vec![advertisement(DEVICE, BleProfile::nano_x())])
            .with_behavior(Behavior::Silent),
    );
    let manager = start(platform.clone()).await;

    let first = spawn_send(&manager, vec![0x01]);
    let observed = platform.clone();
    wait_until(move || !observed.writes().is_empty()).await;

    manager.stop().await;
    assert!(matches!(
        first.await.unwrap().unwrap_err(),
        LinkError::ManagerStopped
    ));
    assert!(matches!(
        manager.send(DEVICE, vec![0x02]).await.unwrap_err(),
        LinkError::ManagerStopped
    ));
    assert_eq!(platform.disconnects.lock().len(), 1);
}
