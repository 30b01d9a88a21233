use anyhow::Result;
use tracing::info;

use crate::cli::VersionArgs;
use crate::commands::common::{interruptible, ledger_failure, open_session, resolve_app};

pub async fn run(args: VersionArgs) -> Result<()> {
    let app = resolve_app(&args.app, None)?;
    info!(chain = ?args.app.chain, app = app.name, "version command started");

    let session = open_session(app, &args.connect).await?;
    let result = interruptible(&session.app, session.app.get_version(&session.device.id)).await;
    let name = session.app.application().name;
    session.close().await;
    let version = result.map_err(ledger_failure)?;

    println!("{name} app version: {version}");
    if version.locked {
        println!("Device is locked.");
    }
    if let Some(target_id) = version.target_id {
        println!("Target id: 0x{}", hex::encode(target_id));
    }
    Ok(())
}
