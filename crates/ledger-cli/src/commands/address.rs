use anyhow::Result;
use ledger_codec::DerivationPath;
use tracing::info;

use crate::cli::AddressArgs;
use crate::commands::common::{
    derivation_path, interruptible, ledger_failure, open_session, resolve_app,
};

pub async fn run(args: AddressArgs) -> Result<()> {
    let app = resolve_app(&args.app, args.path.as_deref())?;
    let path = derivation_path(&app, args.path.as_deref(), args.account_index)?;
    let byte_order = app.path_encoding.byte_order;
    info!(
        chain = ?args.app.chain,
        app = app.name,
        account_index = args.account_index,
        show_on_device = args.show_on_device,
        "address command started"
    );

    let session = open_session(app, &args.connect).await?;
    println!(
        "Requesting {} account from device...",
        session.app.application().name
    );
    if args.show_on_device {
        println!("Confirm the address on the device.");
    }
    let result = interruptible(
        &session.app,
        session
            .app
            .get_account_at_path(&session.device.id, path, args.show_on_device),
    )
    .await;
    session.close().await;
    let response = result.map_err(ledger_failure)?;

    println!("Address: {}", response.account.address);
    println!("Public key: 0x{}", hex::encode(&response.account.public_key));
    if let Ok(path) = DerivationPath::decode(&response.derivation_path, byte_order) {
        println!("Path: {path}");
    }
    Ok(())
}
