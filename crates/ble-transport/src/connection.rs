//! Connection manager: owns every Ledger peripheral record and serializes
//! requests onto the BLE link.
//!
//! A single spawned task processes platform callbacks and caller commands in
//! arrival order. Each input runs through [`ManagerState::transition`], which
//! mutates the device records and returns the platform effects to execute.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use ledger_codec::{ChunkError, ChunkReassembler, fragment};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::platform::{AdapterState, BlePlatform, PlatformEvent};
use crate::profile::{DeviceModel, KnownProfiles, redact_device_id};
use crate::{BleProfile, BleResult, DeviceInfo};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device disconnected")]
    DeviceDisconnected,
    #[error("a request is already in flight for this device")]
    Busy,
    #[error("transport error: {0}")]
    Transport(#[from] ChunkError),
    #[error("BLE write failed: {0}")]
    Write(String),
    #[error("connection manager stopped")]
    ManagerStopped,
}

pub type LinkResult<T> = Result<T, LinkError>;

/// Link-wide failures, reported apart from per-request errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("bluetooth is powered off")]
    PoweredOff,
    #[error("bluetooth access is not authorized")]
    Unauthorized,
    #[error("bluetooth is not supported on this host")]
    Unsupported,
    #[error("discovery failed: {0}")]
    Platform(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    DeviceDiscovered(KnownDevice),
    DeviceRemoved(String),
    Failed(DiscoveryError),
}

/// Read-only view of a device record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownDevice {
    pub id: String,
    pub name: Option<String>,
    pub model: DeviceModel,
    pub rssi: Option<i32>,
    pub connected: bool,
}

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub profiles: Vec<BleProfile>,
    pub command_buffer: usize,
    pub event_buffer: usize,
    pub discovery_buffer: usize,
    pub scan_on_power_on: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            profiles: KnownProfiles::all(),
            command_buffer: 16,
            event_buffer: 64,
            discovery_buffer: 32,
            scan_on_power_on: true,
        }
    }
}

type Completion = oneshot::Sender<LinkResult<Vec<u8>>>;

enum Command {
    Send {
        id: String,
        message: Vec<u8>,
        completion: Completion,
    },
    Cancel {
        id: String,
    },
    Stop {
        done: oneshot::Sender<()>,
    },
}

/// Handle to the manager task. Clones share the same task.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::Sender<Command>,
    devices: Arc<RwLock<Vec<KnownDevice>>>,
    discovery: broadcast::Sender<DiscoveryEvent>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ConnectionManager {
    pub async fn start(
        platform: Arc<dyn BlePlatform>,
        options: ManagerOptions,
    ) -> BleResult<Self> {
        let (event_tx, event_rx) = mpsc::channel(options.event_buffer.max(1));
        let (command_tx, command_rx) = mpsc::channel(options.command_buffer.max(1));
        let (discovery, _) = broadcast::channel(options.discovery_buffer.max(1));
        let devices = Arc::new(RwLock::new(Vec::new()));

        platform.start(event_tx).await?;

        let actor = Actor {
            platform,
            state: ManagerState::new(options.profiles, options.scan_on_power_on),
            commands: command_rx,
            events: event_rx,
            devices: Arc::clone(&devices),
            discovery: discovery.clone(),
        };
        let task = tokio::spawn(actor.run());
        info!("connection manager started");

        Ok(Self {
            commands: command_tx,
            devices,
            discovery,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    /// Fails every pending request, disconnects open links and ends the task.
    pub async fn stop(&self) {
        let (done, stopped) = oneshot::channel();
        if self.commands.send(Command::Stop { done }).await.is_ok() {
            let _ = stopped.await;
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub fn devices(&self) -> Vec<KnownDevice> {
        self.devices.read().clone()
    }

    pub fn discovery_events(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.discovery.subscribe()
    }

    /// Writes `message` to the device and resolves with the reassembled
    /// response. Dropping the returned future abandons the request.
    pub async fn send(&self, device_id: &str, message: Vec<u8>) -> LinkResult<Vec<u8>> {
        let (completion, response) = oneshot::channel();
        self.commands
            .send(Command::Send {
                id: device_id.to_string(),
                message,
                completion,
            })
            .await
            .map_err(|_| LinkError::ManagerStopped)?;
        response.await.map_err(|_| LinkError::ManagerStopped)?
    }

    /// Tears down the device connection, failing any in-flight request with
    /// [`LinkError::DeviceDisconnected`].
    pub async fn cancel_request(&self, device_id: &str) -> LinkResult<()> {
        self.commands
            .send(Command::Cancel {
                id: device_id.to_string(),
            })
            .await
            .map_err(|_| LinkError::ManagerStopped)
    }
}

enum Input {
    Platform(PlatformEvent),
    Send {
        id: String,
        message: Vec<u8>,
        completion: Completion,
    },
    Cancel {
        id: String,
    },
    WriteFailed {
        id: String,
        reason: String,
    },
    Shutdown,
}

#[derive(Debug)]
enum Effect {
    Discover,
    Connect { id: String, profile: BleProfile },
    Write { id: String, chunks: Vec<Vec<u8>> },
    Disconnect { id: String },
    Publish(DiscoveryEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Disconnected,
    Connecting,
    Ready { mtu: usize },
}

struct PendingRequest {
    /// Held until the write characteristic is available.
    deferred: Option<Vec<u8>>,
    completion: Completion,
}

struct Device {
    info: DeviceInfo,
    profile: BleProfile,
    link: LinkState,
    pending: Option<PendingRequest>,
    transport: ChunkReassembler,
}

impl Device {
    fn snapshot(&self) -> KnownDevice {
        KnownDevice {
            id: self.info.id.clone(),
            name: self.info.name.clone(),
            model: self.profile.model,
            rssi: self.info.rssi,
            connected: matches!(self.link, LinkState::Ready { .. }),
        }
    }

    fn resolve(&mut self, result: LinkResult<Vec<u8>>) {
        self.transport.reset();
        let Some(pending) = self.pending.take() else {
            return;
        };
        if pending.completion.send(result).is_err() {
            debug!(device_id = %redact_device_id(&self.info.id), "request abandoned before completion");
        }
    }

    /// Fragments `message` for the current MTU, or fails the pending request.
    fn write_effect(&mut self, message: &[u8], mtu: usize) -> Option<Effect> {
        match fragment(message, mtu) {
            Ok(chunks) => {
                debug!(
                    device_id = %redact_device_id(&self.info.id),
                    bytes = message.len(),
                    chunks = chunks.len(),
                    mtu,
                    "request fragmented"
                );
                Some(Effect::Write {
                    id: self.info.id.clone(),
                    chunks,
                })
            }
            Err(err) => {
                self.resolve(Err(err.into()));
                None
            }
        }
    }
}

struct ManagerState {
    profiles: Vec<BleProfile>,
    scan_on_power_on: bool,
    devices: HashMap<String, Device>,
}

impl ManagerState {
    fn new(profiles: Vec<BleProfile>, scan_on_power_on: bool) -> Self {
        Self {
            profiles,
            scan_on_power_on,
            devices: HashMap::new(),
        }
    }

    fn snapshot(&self) -> Vec<KnownDevice> {
        let mut devices: Vec<KnownDevice> = self.devices.values().map(Device::snapshot).collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    fn transition(&mut self, input: Input) -> Vec<Effect> {
        match input {
            Input::Platform(event) => self.on_platform_event(event),
            Input::Send {
                id,
                message,
                completion,
            } => self.on_send(id, message, completion),
            Input::Cancel { id } => self.on_cancel(&id),
            Input::WriteFailed { id, reason } => {
                if let Some(device) = self.devices.get_mut(&id) {
                    warn!(device_id = %redact_device_id(&id), %reason, "BLE write failed");
                    device.resolve(Err(LinkError::Write(reason)));
                }
                Vec::new()
            }
            Input::Shutdown => self.on_shutdown(),
        }
    }

    fn on_send(&mut self, id: String, message: Vec<u8>, completion: Completion) -> Vec<Effect> {
        let Some(device) = self.devices.get_mut(&id) else {
            let _ = completion.send(Err(LinkError::DeviceNotFound(id)));
            return Vec::new();
        };

        let mut recycle = false;
        if let Some(pending) = &device.pending {
            if !pending.completion.is_closed() {
                let _ = completion.send(Err(LinkError::Busy));
                return Vec::new();
            }
            warn!(device_id = %redact_device_id(&id), "discarding abandoned request");
            // Already on the wire: its response would answer this request.
            recycle = pending.deferred.is_none();
            device.pending = None;
        }
        device.transport.reset();

        if recycle && matches!(device.link, LinkState::Ready { .. }) {
            info!(device_id = %redact_device_id(&id), "reconnecting after abandoned request");
            device.pending = Some(PendingRequest {
                deferred: Some(message),
                completion,
            });
            device.link = LinkState::Connecting;
            return vec![
                Effect::Disconnect { id: id.clone() },
                Effect::Connect {
                    id,
                    profile: device.profile,
                },
            ];
        }

        match device.link {
            LinkState::Ready { mtu } => {
                device.pending = Some(PendingRequest {
                    deferred: None,
                    completion,
                });
                device.write_effect(&message, mtu).into_iter().collect()
            }
            LinkState::Connecting => {
                device.pending = Some(PendingRequest {
                    deferred: Some(message),
                    completion,
                });
                Vec::new()
            }
            LinkState::Disconnected => {
                device.pending = Some(PendingRequest {
                    deferred: Some(message),
                    completion,
                });
                device.link = LinkState::Connecting;
                vec![Effect::Connect {
                    id,
                    profile: device.profile,
                }]
            }
        }
    }

    fn on_cancel(&mut self, id: &str) -> Vec<Effect> {
        let Some(device) = self.devices.get_mut(id) else {
            return Vec::new();
        };
        info!(device_id = %redact_device_id(id), "cancelling device request");
        device.resolve(Err(LinkError::DeviceDisconnected));
        if device.link == LinkState::Disconnected {
            return Vec::new();
        }
        device.link = LinkState::Disconnected;
        vec![Effect::Disconnect { id: id.to_string() }]
    }

    fn on_shutdown(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        for (id, device) in &mut self.devices {
            device.resolve(Err(LinkError::ManagerStopped));
            if device.link != LinkState::Disconnected {
                device.link = LinkState::Disconnected;
                effects.push(Effect::Disconnect { id: id.clone() });
            }
        }
        effects
    }

    fn on_platform_event(&mut self, event: PlatformEvent) -> Vec<Effect> {
        match event {
            PlatformEvent::StateChanged(state) => self.on_adapter_state(state),
            PlatformEvent::Discovered(info) => self.on_discovered(info),
            PlatformEvent::Connected { id } => {
                if self.devices.contains_key(&id) {
                    debug!(device_id = %redact_device_id(&id), "peripheral connected");
                }
                Vec::new()
            }
            PlatformEvent::CharacteristicsDiscovered { id, mtu } => {
                let Some(device) = self.devices.get_mut(&id) else {
                    return Vec::new();
                };
                if device.link != LinkState::Connecting {
                    debug!(device_id = %redact_device_id(&id), "ignoring characteristics of a dropped link");
                    return Vec::new();
                }
                debug!(device_id = %redact_device_id(&id), mtu, "write characteristic ready");
                device.link = LinkState::Ready { mtu };
                let deferred = device
                    .pending
                    .as_mut()
                    .and_then(|pending| pending.deferred.take());
                match deferred {
                    Some(message) => device.write_effect(&message, mtu).into_iter().collect(),
                    None => Vec::new(),
                }
            }
            PlatformEvent::Notification { id, value } => {
                match self.devices.get_mut(&id) {
                    Some(device) if matches!(device.link, LinkState::Ready { .. }) => {
                        on_notification(device, &value);
                    }
                    Some(_) => {
                        debug!(device_id = %redact_device_id(&id), "dropping notification from a stale link");
                    }
                    None => {}
                }
                Vec::new()
            }
            PlatformEvent::ConnectFailed { id, reason } => {
                warn!(device_id = %redact_device_id(&id), %reason, "connect failed");
                self.remove_device(&id)
            }
            PlatformEvent::Disconnected { id } => {
                if self
                    .devices
                    .get(&id)
                    .is_some_and(|device| device.link == LinkState::Connecting)
                {
                    // The connect attempt reports its own outcome.
                    debug!(device_id = %redact_device_id(&id), "disconnect of the replaced link");
                    return Vec::new();
                }
                info!(device_id = %redact_device_id(&id), "peripheral disconnected");
                self.remove_device(&id)
            }
        }
    }

    fn on_adapter_state(&mut self, state: AdapterState) -> Vec<Effect> {
        debug!(?state, "adapter state changed");
        match state {
            AdapterState::PoweredOn if self.scan_on_power_on => vec![Effect::Discover],
            AdapterState::PoweredOn | AdapterState::Unknown => Vec::new(),
            AdapterState::PoweredOff => {
                let ids: Vec<String> = self.devices.keys().cloned().collect();
                let mut effects: Vec<Effect> =
                    ids.iter().flat_map(|id| self.remove_device(id)).collect();
                effects.push(Effect::Publish(DiscoveryEvent::Failed(
                    DiscoveryError::PoweredOff,
                )));
                effects
            }
            AdapterState::Unauthorized => vec![Effect::Publish(DiscoveryEvent::Failed(
                DiscoveryError::Unauthorized,
            ))],
            AdapterState::Unsupported => vec![Effect::Publish(DiscoveryEvent::Failed(
                DiscoveryError::Unsupported,
            ))],
        }
    }

    fn on_discovered(&mut self, info: DeviceInfo) -> Vec<Effect> {
        if let Some(device) = self.devices.get_mut(&info.id) {
            if info.name.is_some() {
                device.info.name = info.name;
            }
            if info.rssi.is_some() {
                device.info.rssi = info.rssi;
            }
            return Vec::new();
        }

        let Some(profile) = KnownProfiles::matching(&self.profiles, &info.services).copied() else {
            return Vec::new();
        };
        debug!(
            device_id = %redact_device_id(&info.id),
            model = %profile.model,
            "ledger device discovered"
        );
        let device = Device {
            info,
            profile,
            link: LinkState::Disconnected,
            pending: None,
            transport: ChunkReassembler::new(),
        };
        let event = DiscoveryEvent::DeviceDiscovered(device.snapshot());
        self.devices.insert(device.info.id.clone(), device);
        vec![Effect::Publish(event)]
    }

    fn remove_device(&mut self, id: &str) -> Vec<Effect> {
        let Some(mut device) = self.devices.remove(id) else {
            return Vec::new();
        };
        device.resolve(Err(LinkError::DeviceDisconnected));
        vec![Effect::Publish(DiscoveryEvent::DeviceRemoved(id.to_string()))]
    }
}

fn on_notification(device: &mut Device, value: &[u8]) {
    let device_id = redact_device_id(&device.info.id);
    match device.transport.receive(value) {
        Ok(Some(response)) => {
            debug!(device_id = %device_id, bytes = response.len(), "response reassembled");
            if device.pending.is_none() {
                warn!(device_id = %device_id, "dropping unsolicited response");
            }
            device.resolve(Ok(response));
        }
        Ok(None) => {
            debug!(device_id = %device_id, bytes = value.len(), "awaiting more chunks");
        }
        Err(err) => {
            warn!(device_id = %device_id, error = %err, "chunk reassembly failed");
            device.resolve(Err(err.into()));
        }
    }
}

struct Actor {
    platform: Arc<dyn BlePlatform>,
    state: ManagerState,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Receiver<PlatformEvent>,
    devices: Arc<RwLock<Vec<KnownDevice>>>,
    discovery: broadcast::Sender<DiscoveryEvent>,
}

impl Actor {
    async fn run(mut self) {
        let mut events_open = true;
        loop {
            let (input, done) = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send { id, message, completion }) => {
                        (Input::Send { id, message, completion }, None)
                    }
                    Some(Command::Cancel { id }) => (Input::Cancel { id }, None),
                    Some(Command::Stop { done }) => (Input::Shutdown, Some(done)),
                    None => (Input::Shutdown, None),
                },
                event = self.events.recv(), if events_open => match event {
                    Some(event) => (Input::Platform(event), None),
                    None => {
                        warn!("platform event channel closed");
                        events_open = false;
                        continue;
                    }
                },
            };

            let shutdown = matches!(input, Input::Shutdown);
            self.process(input).await;
            if shutdown {
                if let Err(err) = self.platform.stop_scan().await {
                    debug!(error = %err, "stop scan failed");
                }
                info!("connection manager stopped");
                if let Some(done) = done {
                    let _ = done.send(());
                }
                break;
            }
        }
    }

    async fn process(&mut self, input: Input) {
        let mut queue = VecDeque::from([input]);
        while let Some(input) = queue.pop_front() {
            for effect in self.state.transition(input) {
                self.execute(effect, &mut queue).await;
            }
        }
        *self.devices.write() = self.state.snapshot();
    }

    async fn execute(&mut self, effect: Effect, queue: &mut VecDeque<Input>) {
        match effect {
            Effect::Discover => {
                let services = KnownProfiles::service_uuids(&self.state.profiles);
                match self.platform.retrieve_connected(&services).await {
                    Ok(connected) => queue.extend(
                        connected
                            .into_iter()
                            .map(|info| Input::Platform(PlatformEvent::Discovered(info))),
                    ),
                    Err(err) => warn!(error = %err, "retrieving connected peripherals failed"),
                }
                if let Err(err) = self.platform.scan(&services).await {
                    self.publish(DiscoveryEvent::Failed(DiscoveryError::Platform(
                        err.to_string(),
                    )));
                }
            }
            Effect::Connect { id, profile } => {
                if let Err(err) = self.platform.connect(&id, profile).await {
                    queue.push_back(Input::Platform(PlatformEvent::ConnectFailed {
                        id,
                        reason: err.to_string(),
                    }));
                }
            }
            Effect::Write { id, chunks } => {
                for (sequence, chunk) in chunks.iter().enumerate() {
                    debug!(
                        device_id = %redact_device_id(&id),
                        sequence,
                        bytes = chunk.len(),
                        "writing chunk"
                    );
                    if let Err(err) = self.platform.write(&id, chunk).await {
                        queue.push_back(Input::WriteFailed {
                            id,
                            reason: err.to_string(),
                        });
                        break;
                    }
                }
            }
            Effect::Disconnect { id } => {
                if let Err(err) = self.platform.disconnect(&id).await {
                    warn!(device_id = %redact_device_id(&id), error = %err, "disconnect failed");
                }
            }
            Effect::Publish(event) => self.publish(event),
        }
    }

    fn publish(&self, event: DiscoveryEvent) {
        // No subscribers is not an error.
        let _ = self.discovery.send(event);
    }
}

#[cfg(test)]
mod tests;
