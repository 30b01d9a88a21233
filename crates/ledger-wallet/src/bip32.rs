use ledger_codec::{DerivationPath, HARDENED_FLAG, Junction};

use crate::error::{WalletError, WalletResult};

/// Parses a textual BIP-32 path into a [`DerivationPath`].
///
/// The path may begin with `m/`. Each component is a decimal index,
/// optionally followed by `'`, `h` or `H` to mark it hardened:
///
/// | Input                    | Junctions                          |
/// |--------------------------|------------------------------------|
/// | `m/44'/354'/0'/0'/0'`    | five hardened                      |
/// | `44h/60h/0h/0/0`         | three hardened, two soft           |
/// | `m`                      | none                               |
pub fn parse_bip32_path(path: &str) -> WalletResult<DerivationPath> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(WalletError::InvalidBip32Path("path is empty".to_string()));
    }

    let body = if trimmed == "m" {
        return Ok(DerivationPath::default());
    } else if let Some(rest) = trimmed.strip_prefix("m/") {
        rest
    } else {
        trimmed
    };

    let mut junctions = Vec::new();
    for segment in body.split('/') {
        if segment.is_empty() {
            return Err(WalletError::InvalidBip32Path(format!(
                "empty segment in '{path}'"
            )));
        }

        let number = segment.strip_suffix(['\'', 'h', 'H']);
        let hardened = number.is_some();
        let number = number.unwrap_or(segment);

        let index = number.parse::<u32>().map_err(|_| {
            WalletError::InvalidBip32Path(format!("invalid segment '{segment}' in '{path}'"))
        })?;
        if index >= HARDENED_FLAG {
            return Err(WalletError::InvalidBip32Path(format!(
                "segment '{segment}' is out of range (must be < 2^31)"
            )));
        }

        junctions.push(if hardened {
            Junction::Hardened(index)
        } else {
            Junction::Soft(index)
        });
    }

    Ok(DerivationPath::new(junctions))
}
