use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use ble_transport::{ConnectionManager, KnownDevice, ManagerOptions, redact_device_id};
use ledger_chain::SupportedApplication;
use ledger_connect::{LedgerApplication, LedgerError, LedgerResult};
use ledger_wallet::bip32::parse_bip32_path;
use ledger_wallet::ble::{ledger_app, start_manager, wait_for_device};
use ledger_wallet::chain::{infer_application_from_path, resolve_application};
use ledger_wallet::{LedgerErrorReason, classify_error};
use tracing::{debug, info, warn};

use crate::cli::{AppArgs, ConnectArgs, Route};
use crate::config::DEFAULT_CHAIN;

pub struct Session {
    pub manager: ConnectionManager,
    pub device: KnownDevice,
    pub app: LedgerApplication,
}

impl Session {
    pub async fn close(self) {
        self.manager.stop().await;
    }
}

/// Application for `--chain`; with no chain on the legacy route, a `--path`
/// selects it by coin type.
pub fn resolve_app(args: &AppArgs, path: Option<&str>) -> Result<SupportedApplication> {
    if args.chain.is_none()
        && args.route == Route::Legacy
        && let Some(path) = path
    {
        let parsed = parse_bip32_path(path)?;
        let app = infer_application_from_path(&parsed).with_context(|| {
            format!("no application uses the coin type of {parsed}; pass --chain")
        })?;
        debug!(path = %parsed, app = app.name, "application inferred from path");
        return Ok(app);
    }
    let chain = args.chain.as_deref().unwrap_or(DEFAULT_CHAIN);
    resolve_application(chain, args.app_route())
        .with_context(|| format!("cannot route chain '{chain}'"))
}

pub async fn open_session(app: SupportedApplication, args: &ConnectArgs) -> Result<Session> {
    let manager = start_manager(ManagerOptions::default())
        .await
        .context("BLE manager init failed")?;

    println!(
        "Waiting up to {}s for a Ledger device{}...",
        args.timeout_secs,
        args.device_id
            .as_deref()
            .map(|id| format!(" ({id})"))
            .unwrap_or_default()
    );
    let device = match wait_for_device(
        &manager,
        args.device_id.as_deref(),
        Duration::from_secs(args.timeout_secs),
    )
    .await
    {
        Ok(device) => device,
        Err(error) => {
            manager.stop().await;
            return Err(error).context("no Ledger device available");
        }
    };
    info!(
        device_id = %redact_device_id(&device.id),
        model = %device.model,
        app = app.name,
        "device selected"
    );

    let app = ledger_app(&manager, app);
    Ok(Session {
        manager,
        device,
        app,
    })
}

/// Encoded path for `--path`, or the application's standard path for the
/// account index.
pub fn derivation_path(
    app: &SupportedApplication,
    path: Option<&str>,
    account_index: u32,
) -> Result<Vec<u8>> {
    match path {
        Some(path) => {
            let parsed = parse_bip32_path(path)?;
            debug!(path = %parsed, "using explicit derivation path");
            Ok(parsed.encode(app.path_encoding.byte_order))
        }
        None => Ok(app.derivation_path(account_index)),
    }
}

/// Hex bytes given inline or, with a leading `@`, read from a file.
pub async fn read_hex_arg(value: &str) -> Result<Vec<u8>> {
    let text = match value.strip_prefix('@') {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading hex file: {path}"))?,
        None => value.to_string(),
    };
    Ok(ledger_wallet::hex::decode(text.trim())?)
}

/// Runs a device request; Ctrl-C cancels it instead of killing the process
/// mid-exchange.
pub async fn interruptible<T>(
    app: &LedgerApplication,
    request: impl Future<Output = LedgerResult<T>>,
) -> LedgerResult<T> {
    tokio::pin!(request);
    tokio::select! {
        result = &mut request => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, cancelling device request");
            app.cancellation().cancel();
            request.await
        }
    }
}

pub fn ledger_failure(error: LedgerError) -> anyhow::Error {
    let hint = match classify_error(&error) {
        LedgerErrorReason::OutdatedMetadata => {
            Some("the device app or the metadata proof is out of date")
        }
        LedgerErrorReason::UserRejected => Some("the request was rejected on the device"),
        LedgerErrorReason::UnsupportedOperation => {
            Some("the device app does not support this request")
        }
        LedgerErrorReason::AppNotOpen => Some("open the application on the device and retry"),
        LedgerErrorReason::DeviceBusy => Some("the device is busy; retry in a moment"),
        LedgerErrorReason::Other => None,
    };
    match hint {
        Some(hint) => anyhow::Error::new(error).context(hint),
        None => error.into(),
    }
}

pub fn print_devices(devices: &[KnownDevice]) {
    println!("Found {} device(s):", devices.len());
    for (idx, device) in devices.iter().enumerate() {
        println!(
            "  {}. id={} model={} name={} rssi={}",
            idx + 1,
            device.id,
            device.model,
            device.name.as_deref().unwrap_or("unknown"),
            device
                .rssi
                .map(|v| v.to_string())
                .unwrap_or_else(|| "n/a".to_string())
        );
    }
}

#[cfg(test)]
mod tests {
    use ledger_codec::HARDENED_FLAG;

    use super::*;

    fn polkadot() -> SupportedApplication {
        SupportedApplication::find_by_name("polkadot").expect("polkadot app")
    }

    fn app_args(chain: Option<&str>, route: Route) -> AppArgs {
        AppArgs {
            chain: chain.map(str::to_string),
            route,
            ss58_prefix: None,
        }
    }

    #[test]
    fn resolve_app_defaults_to_polkadot() {
        let app = resolve_app(&app_args(None, Route::Legacy), None).expect("app");
        assert_eq!(app.name, "Polkadot");
    }

    #[test]
    fn resolve_app_infers_application_from_path() {
        let path = Some("m/44'/434'/0'/0'/0'");
        let app = resolve_app(&app_args(None, Route::Legacy), path).expect("app");
        assert_eq!(app.name, "Kusama");

        // An explicit chain wins over the path.
        let app = resolve_app(&app_args(Some("polkadot"), Route::Legacy), path).expect("app");
        assert_eq!(app.name, "Polkadot");
    }

    #[test]
    fn resolve_app_rejects_unknown_coin_type() {
        let err = resolve_app(&app_args(None, Route::Legacy), Some("m/44'/1'/0'")).unwrap_err();
        assert!(format!("{err:#}").contains("pass --chain"));
        assert!(resolve_app(&app_args(None, Route::Legacy), Some("m/44'/x")).is_err());
    }

    #[test]
    fn derivation_path_defaults_to_application_path() {
        let app = polkadot();
        let path = derivation_path(&app, None, 2).expect("path");
        assert_eq!(path, app.derivation_path(2));
    }

    #[test]
    fn derivation_path_override_uses_application_byte_order() {
        let app = polkadot();
        let path = derivation_path(&app, Some("m/44'/354'/1'/0'/0'"), 7).expect("path");

        assert_eq!(path.len(), 20);
        assert_eq!(&path[..4], &(44 | HARDENED_FLAG).to_le_bytes());
        assert_eq!(&path[8..12], &(1 | HARDENED_FLAG).to_le_bytes());
    }

    #[test]
    fn derivation_path_rejects_malformed_override() {
        let app = polkadot();
        assert!(derivation_path(&app, Some("m/44'/x"), 0).is_err());
    }

    #[tokio::test]
    async fn reads_inline_hex() {
        assert_eq!(
            read_hex_arg("0xdeadbeef").await.expect("hex"),
            vec![0xDE, 0xAD, 0xBE, 0xEF]
        );
        assert!(read_hex_arg("zz").await.is_err());
    }

    #[tokio::test]
    async fn reads_hex_from_file() {
        let path = std::env::temp_dir().join(format!("ledger-cli-hex-{}", std::process::id()));
        tokio::fs::write(&path, "0102ff\n").await.expect("write");

        let bytes = read_hex_arg(&format!("@{}", path.display()))
            .await
            .expect("hex file");
        let _ = tokio::fs::remove_file(&path).await;

        assert_eq!(bytes, vec![0x01, 0x02, 0xFF]);
    }

    #[test]
    fn rejection_gets_a_hint() {
        let error = LedgerError::Response {
            code: ledger_codec::LedgerResponseCode::TransactionRejected,
            reason: None,
        };
        let message = format!("{:#}", ledger_failure(error));
        assert!(message.starts_with("the request was rejected on the device"));
    }
}
