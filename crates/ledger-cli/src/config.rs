pub const DEFAULT_SCAN_SECS: u64 = 5;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CHAIN: &str = "polkadot";
