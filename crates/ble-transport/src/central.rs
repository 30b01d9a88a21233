use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use ledger_codec::MIN_MTU;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::platform::{AdapterState, BlePlatform, PlatformEvent};
use crate::profile::{DEFAULT_TX_MTU, redact_device_id};
use crate::{BleError, BleProfile, BleResult, DeviceInfo};

/// Overrides the per-profile write size, e.g. for hosts stuck at a small ATT MTU.
pub const TX_MTU_ENV: &str = "LEDGER_BLE_TX_MTU";

struct GattLink {
    peripheral: Peripheral,
    write_char: Characteristic,
    notify_char: Characteristic,
    notify_task: JoinHandle<()>,
}

impl Drop for GattLink {
    fn drop(&mut self) {
        self.notify_task.abort();
    }
}

type Sink = Arc<Mutex<Option<mpsc::Sender<PlatformEvent>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptOutcome {
    /// Still the attempt the manager is waiting for.
    Current,
    /// A newer `connect` for the same peripheral took over.
    Superseded,
    /// `disconnect` ran while the attempt was in progress.
    Aborted,
}

/// Connect attempts in progress, keyed by peripheral id.
#[derive(Debug, Default)]
struct ConnectAttempts {
    next: u64,
    live: HashMap<String, u64>,
}

impl ConnectAttempts {
    fn begin(&mut self, id: &str) -> u64 {
        self.next += 1;
        self.live.insert(id.to_string(), self.next);
        self.next
    }

    fn finish(&mut self, id: &str, attempt: u64) -> AttemptOutcome {
        match self.live.get(id) {
            Some(&live) if live == attempt => {
                self.live.remove(id);
                AttemptOutcome::Current
            }
            Some(_) => AttemptOutcome::Superseded,
            None => AttemptOutcome::Aborted,
        }
    }

    fn abort(&mut self, id: &str) -> bool {
        self.live.remove(id).is_some()
    }
}

/// [`BlePlatform`] backed by the first btleplug adapter on the host.
pub struct BtleplugPlatform {
    adapter: Adapter,
    peripherals: Arc<Mutex<HashMap<String, Peripheral>>>,
    links: Arc<Mutex<HashMap<String, GattLink>>>,
    attempts: Arc<Mutex<ConnectAttempts>>,
    events: Sink,
    central_task: Mutex<Option<JoinHandle<()>>>,
}

impl BtleplugPlatform {
    pub async fn new() -> BleResult<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(BleError::AdapterUnavailable)?;
        Ok(Self {
            adapter,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
            links: Arc::new(Mutex::new(HashMap::new())),
            attempts: Arc::new(Mutex::new(ConnectAttempts::default())),
            events: Arc::new(Mutex::new(None)),
            central_task: Mutex::new(None),
        })
    }

    fn sink(&self) -> BleResult<mpsc::Sender<PlatformEvent>> {
        self.events.lock().clone().ok_or(BleError::EventChannelClosed)
    }

    async fn peripheral(&self, id: &str) -> BleResult<Peripheral> {
        if let Some(peripheral) = self.peripherals.lock().get(id).cloned() {
            return Ok(peripheral);
        }
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.id().to_string() == id {
                self.peripherals
                    .lock()
                    .insert(id.to_string(), peripheral.clone());
                return Ok(peripheral);
            }
        }
        Err(BleError::UnknownPeripheral(id.to_string()))
    }
}

impl Drop for BtleplugPlatform {
    fn drop(&mut self) {
        if let Some(task) = self.central_task.lock().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl BlePlatform for BtleplugPlatform {
    async fn start(&self, events: mpsc::Sender<PlatformEvent>) -> BleResult<()> {
        let mut central_events = self.adapter.events().await?;
        *self.events.lock() = Some(events.clone());

        let adapter = self.adapter.clone();
        let peripherals = Arc::clone(&self.peripherals);
        let links = Arc::clone(&self.links);
        let task = tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                let Some(mapped) = map_central_event(&adapter, &peripherals, &links, event).await
                else {
                    continue;
                };
                if events.send(mapped).await.is_err() {
                    break;
                }
            }
            debug!("BLE central event stream ended");
        });
        if let Some(previous) = self.central_task.lock().replace(task) {
            previous.abort();
        }

        // btleplug only hands out adapters that exist; it reports later
        // power changes through StateUpdate.
        self.sink()?
            .send(PlatformEvent::StateChanged(AdapterState::PoweredOn))
            .await
            .map_err(|_| BleError::EventChannelClosed)?;
        Ok(())
    }

    async fn scan(&self, services: &[Uuid]) -> BleResult<()> {
        debug!(services = services.len(), "BLE scan started");
        self.adapter
            .start_scan(ScanFilter {
                services: services.to_vec(),
            })
            .await?;
        Ok(())
    }

    async fn stop_scan(&self) -> BleResult<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn retrieve_connected(&self, services: &[Uuid]) -> BleResult<Vec<DeviceInfo>> {
        let mut connected = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            if !peripheral.is_connected().await? {
                continue;
            }
            let Some(info) = fetch_device_info(&peripheral).await? else {
                continue;
            };
            if info.services.iter().any(|uuid| services.contains(uuid)) {
                self.peripherals
                    .lock()
                    .insert(info.id.clone(), peripheral.clone());
                connected.push(info);
            }
        }
        Ok(connected)
    }

    async fn connect(&self, id: &str, profile: BleProfile) -> BleResult<()> {
        let peripheral = self.peripheral(id).await?;
        let events = self.sink()?;
        let links = Arc::clone(&self.links);
        let attempts = Arc::clone(&self.attempts);
        let attempt = self.attempts.lock().begin(id);
        let id = id.to_string();

        tokio::spawn(async move {
            let result = open_link(&id, peripheral, profile, &events).await;
            let outcome = attempts.lock().finish(&id, attempt);
            let device_id = redact_device_id(&id);
            let event = match (result, outcome) {
                (Ok((link, mtu)), AttemptOutcome::Current) => {
                    links.lock().insert(id.clone(), link);
                    Some(PlatformEvent::CharacteristicsDiscovered { id, mtu })
                }
                (Ok((link, _)), AttemptOutcome::Superseded) => {
                    debug!(device_id = %device_id, "BLE connect superseded");
                    drop(link);
                    None
                }
                (Ok((link, _)), AttemptOutcome::Aborted) => {
                    debug!(device_id = %device_id, "BLE connect aborted, closing link");
                    if let Err(err) = close_link(link).await {
                        debug!(device_id = %device_id, error = %err, "BLE close failed");
                    }
                    None
                }
                (Err(err), AttemptOutcome::Current) => {
                    warn!(device_id = %device_id, error = %err, "BLE connect failed");
                    Some(PlatformEvent::ConnectFailed {
                        id,
                        reason: err.to_string(),
                    })
                }
                (Err(err), outcome) => {
                    debug!(device_id = %device_id, ?outcome, error = %err, "stale BLE connect failed");
                    None
                }
            };
            if let Some(event) = event {
                let _ = events.send(event).await;
            }
        });
        Ok(())
    }

    async fn write(&self, id: &str, chunk: &[u8]) -> BleResult<()> {
        let (peripheral, write_char) = {
            let links = self.links.lock();
            let link = links
                .get(id)
                .ok_or_else(|| BleError::NotConnected(id.to_string()))?;
            (link.peripheral.clone(), link.write_char.clone())
        };
        debug!(bytes = chunk.len(), "BLE write chunk");
        peripheral
            .write(&write_char, chunk, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn disconnect(&self, id: &str) -> BleResult<()> {
        if self.attempts.lock().abort(id) {
            debug!(device_id = %redact_device_id(id), "BLE connect in progress marked aborted");
        }
        let link = self.links.lock().remove(id);
        match link {
            Some(link) => close_link(link).await?,
            None => {
                let peripheral = self.peripheral(id).await?;
                if peripheral.is_connected().await? {
                    peripheral.disconnect().await?;
                }
            }
        }
        if let Some(events) = self.events.lock().clone() {
            let _ = events.try_send(PlatformEvent::Disconnected { id: id.to_string() });
        }
        Ok(())
    }
}

async fn close_link(link: GattLink) -> BleResult<()> {
    if let Err(err) = link.peripheral.unsubscribe(&link.notify_char).await {
        debug!(error = %err, "BLE unsubscribe failed");
    }
    if link.peripheral.is_connected().await? {
        link.peripheral.disconnect().await?;
    }
    Ok(())
}

/// Connects and attaches the GATT link; a failure after the connection is
/// up disconnects again.
async fn open_link(
    id: &str,
    peripheral: Peripheral,
    profile: BleProfile,
    events: &mpsc::Sender<PlatformEvent>,
) -> BleResult<(GattLink, usize)> {
    if !peripheral.is_connected().await? {
        peripheral.connect().await?;
    }
    let _ = events
        .send(PlatformEvent::Connected { id: id.to_string() })
        .await;

    match attach_link(id, &peripheral, profile, events).await {
        Ok(attached) => Ok(attached),
        Err(err) => {
            if let Err(disconnect_err) = peripheral.disconnect().await {
                debug!(error = %disconnect_err, "BLE disconnect after failed attach failed");
            }
            Err(err)
        }
    }
}

async fn attach_link(
    id: &str,
    peripheral: &Peripheral,
    profile: BleProfile,
    events: &mpsc::Sender<PlatformEvent>,
) -> BleResult<(GattLink, usize)> {
    peripheral.discover_services().await?;

    let characteristics = peripheral.characteristics();
    let redacted_device_id = redact_device_id(id);
    debug!(
        device_id = %redacted_device_id,
        profile = profile.id,
        characteristic_count = characteristics.len(),
        "BLE discovered characteristics"
    );

    let write_char =
        find_characteristic(&characteristics, profile.service_uuid, profile.write_uuid)
            .ok_or_else(|| BleError::missing("write", profile))?;
    let notify_char =
        find_characteristic(&characteristics, profile.service_uuid, profile.notify_uuid)
            .ok_or_else(|| BleError::missing("notify", profile))?;

    peripheral.subscribe(&notify_char).await?;
    let mut notifications = peripheral.notifications().await?;
    let notify_uuid = notify_char.uuid;
    let forward = events.clone();
    let forward_id = id.to_string();
    let notify_task = tokio::spawn(async move {
        while let Some(event) = notifications.next().await {
            if event.uuid != notify_uuid {
                continue;
            }
            debug!(bytes = event.value.len(), "BLE notification received");
            let notification = PlatformEvent::Notification {
                id: forward_id.clone(),
                value: event.value,
            };
            if forward.send(notification).await.is_err() {
                break;
            }
        }
        debug!("BLE notification stream ended");
    });

    let mtu = tx_mtu(profile, std::env::var(TX_MTU_ENV).ok().as_deref());
    debug!(device_id = %redacted_device_id, mtu, "BLE link ready");
    Ok((
        GattLink {
            peripheral: peripheral.clone(),
            write_char,
            notify_char,
            notify_task,
        },
        mtu,
    ))
}

fn tx_mtu(profile: BleProfile, override_value: Option<&str>) -> usize {
    let hint = profile
        .mtu_hint
        .map(usize::from)
        .unwrap_or(DEFAULT_TX_MTU);
    let Some(value) = override_value else {
        return hint;
    };
    match value.trim().parse::<usize>() {
        Ok(selected) if selected >= MIN_MTU => {
            debug!(mtu_hint = hint, selected, "BLE TX mtu override selected");
            selected
        }
        Ok(rejected) => {
            warn!(
                rejected,
                min = MIN_MTU,
                fallback = hint,
                "BLE TX mtu override below minimum, ignored"
            );
            hint
        }
        Err(_) => {
            warn!(value, fallback = hint, "BLE TX mtu override is not a number, ignored");
            hint
        }
    }
}

async fn map_central_event(
    adapter: &Adapter,
    peripherals: &Mutex<HashMap<String, Peripheral>>,
    links: &Mutex<HashMap<String, GattLink>>,
    event: CentralEvent,
) -> Option<PlatformEvent> {
    match event {
        CentralEvent::DeviceDiscovered(id)
        | CentralEvent::DeviceUpdated(id)
        | CentralEvent::ServicesAdvertisement { id, .. } => {
            let peripheral = adapter.peripheral(&id).await.ok()?;
            let info = fetch_device_info(&peripheral).await.ok()??;
            peripherals.lock().insert(info.id.clone(), peripheral);
            Some(PlatformEvent::Discovered(info))
        }
        CentralEvent::DeviceDisconnected(id) => {
            // A late event for a link that was already replaced.
            if let Ok(peripheral) = adapter.peripheral(&id).await
                && peripheral.is_connected().await.unwrap_or(false)
            {
                return None;
            }
            let id = id.to_string();
            links.lock().remove(&id);
            Some(PlatformEvent::Disconnected { id })
        }
        CentralEvent::StateUpdate(state) => Some(PlatformEvent::StateChanged(match state {
            CentralState::PoweredOn => AdapterState::PoweredOn,
            CentralState::PoweredOff => AdapterState::PoweredOff,
            _ => AdapterState::Unknown,
        })),
        _ => None,
    }
}

async fn fetch_device_info(peripheral: &Peripheral) -> BleResult<Option<DeviceInfo>> {
    let properties = match peripheral.properties().await? {
        Some(props) => props,
        None => return Ok(None),
    };

    Ok(Some(DeviceInfo {
        id: peripheral.id().to_string(),
        name: properties.local_name,
        rssi: properties.rssi.map(i32::from),
        services: properties.services,
    }))
}

fn find_characteristic(
    characteristics: &BTreeSet<Characteristic>,
    service_uuid: Uuid,
    uuid: Uuid,
) -> Option<Characteristic> {
    characteristics
        .iter()
        .find(|c| c.service_uuid == service_uuid && c.uuid == uuid)
        .cloned()
}
