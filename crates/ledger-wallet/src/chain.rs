use ledger_chain::SupportedApplication;
use ledger_codec::DerivationPath;

use crate::{WalletError, WalletResult};

/// Which device application serves a chain.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AppRoute {
    /// The chain's own application from the static table.
    Legacy,
    /// The multi-chain application; `None` picks the chain's known prefix.
    Generic { ss58_prefix: Option<u16> },
    /// The multi-chain application in EVM mode.
    GenericEvm,
}

/// SS58 address format of chains in the static table.
pub fn known_ss58_prefix(app: &SupportedApplication) -> Option<u16> {
    let prefix = match app.name {
        "Polkadot" | "Statemint" => 0,
        "Kusama" | "Statemine" => 2,
        "Astar" => 5,
        "Edgeware" => 7,
        "Karura" => 8,
        "Acala" => 10,
        "Polymesh" => 12,
        "Nodle" => 37,
        "xx network" => 55,
        _ => return None,
    };
    Some(prefix)
}

/// Resolves a chain name or genesis hash to the application serving it.
pub fn resolve_application(chain: &str, route: AppRoute) -> WalletResult<SupportedApplication> {
    let known =
        SupportedApplication::find_by_name(chain).or_else(|| SupportedApplication::find(chain));

    match route {
        AppRoute::Legacy => known.ok_or_else(|| WalletError::UnsupportedChain(chain.to_string())),
        AppRoute::Generic { ss58_prefix } => {
            let genesis = match &known {
                Some(app) => app.chain_id.to_string(),
                None => validate_genesis(chain)?,
            };
            let prefix = ss58_prefix
                .or_else(|| known.as_ref().and_then(known_ss58_prefix))
                .ok_or_else(|| {
                    WalletError::UnsupportedChain(format!(
                        "{chain}: an ss58 prefix is required for unknown chains"
                    ))
                })?;
            Ok(SupportedApplication::generic(genesis, prefix))
        }
        AppRoute::GenericEvm => Ok(SupportedApplication::generic_evm(chain.trim())),
    }
}

/// Picks the per-chain application whose coin type matches a parsed path.
pub fn infer_application_from_path(path: &DerivationPath) -> Option<SupportedApplication> {
    let coin_type = path.junctions().get(1)?.index();
    SupportedApplication::all()
        .iter()
        .find(|app| app.coin_type == coin_type)
        .cloned()
}

fn validate_genesis(chain: &str) -> WalletResult<String> {
    let bytes = crate::hex::decode(chain)
        .map_err(|_| WalletError::UnsupportedChain(chain.to_string()))?;
    if bytes.len() != 32 {
        return Err(WalletError::UnsupportedChain(chain.to_string()));
    }
    Ok(::hex::encode(bytes))
}
