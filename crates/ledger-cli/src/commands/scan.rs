use std::time::Duration;

use anyhow::{Context, Result};
use ble_transport::ManagerOptions;
use ledger_wallet::ble::{scan, start_manager};
use tracing::debug;

use crate::cli::ScanArgs;
use crate::commands::common::print_devices;

pub async fn run(args: ScanArgs) -> Result<()> {
    debug!(duration_secs = args.duration_secs, "scan command");
    let manager = start_manager(ManagerOptions::default())
        .await
        .context("BLE manager init failed")?;

    println!("Scanning for Ledger devices for {}s...", args.duration_secs);
    let devices = scan(&manager, Duration::from_secs(args.duration_secs)).await;
    manager.stop().await;
    debug!(found = devices.len(), "scan command finished");

    if devices.is_empty() {
        println!("No devices found.");
        return Ok(());
    }

    print_devices(&devices);
    Ok(())
}
