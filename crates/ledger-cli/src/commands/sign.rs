use anyhow::{Context, Result};
use ledger_connect::SigningPayload;
use tracing::info;

use crate::cli::SignArgs;
use crate::commands::common::{
    derivation_path, interruptible, ledger_failure, open_session, read_hex_arg, resolve_app,
};

pub async fn run(args: SignArgs) -> Result<()> {
    let app = resolve_app(&args.app, args.path.as_deref())?;
    let path = derivation_path(&app, args.path.as_deref(), args.account_index)?;
    let transaction = read_hex_arg(&args.payload)
        .await
        .context("invalid --payload")?;
    let mut payload = SigningPayload::new(transaction);
    if let Some(proof) = &args.proof {
        payload = payload.with_proof(read_hex_arg(proof).await.context("invalid --proof")?);
    }
    info!(
        chain = ?args.app.chain,
        app = app.name,
        account_index = args.account_index,
        tx_bytes = payload.transaction.len(),
        proof_bytes = payload.proof.as_ref().map_or(0, Vec::len),
        "sign command started"
    );

    let session = open_session(app, &args.connect).await?;
    println!("Review and approve the transaction on the device...");
    let result = interruptible(
        &session.app,
        session
            .app
            .sign_at_path(&session.device.id, &path, &payload),
    )
    .await;
    session.close().await;
    let signature = result.map_err(ledger_failure)?;

    println!("Signature: 0x{}", hex::encode(signature));
    Ok(())
}
