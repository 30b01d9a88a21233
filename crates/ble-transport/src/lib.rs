pub mod central;
pub mod connection;
pub mod platform;
pub mod profile;

pub use central::{BtleplugPlatform, TX_MTU_ENV};
pub use connection::{
    ConnectionManager, DiscoveryError, DiscoveryEvent, KnownDevice, LinkError, LinkResult,
    ManagerOptions,
};
pub use platform::{AdapterState, BlePlatform, PlatformEvent};
pub use profile::{BleError, BleProfile, DeviceInfo, DeviceModel, KnownProfiles, redact_device_id};

pub type BleResult<T> = Result<T, BleError>;
