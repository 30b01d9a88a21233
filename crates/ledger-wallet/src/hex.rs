use crate::{WalletError, WalletResult};

/// Decodes hex with an optional `0x` prefix; odd lengths get a leading zero.
pub fn decode(value: &str) -> WalletResult<Vec<u8>> {
    let value = value.trim();
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    if stripped.is_empty() {
        return Ok(Vec::new());
    }

    let padded = if !stripped.len().is_multiple_of(2) {
        format!("0{stripped}")
    } else {
        stripped.to_owned()
    };

    ::hex::decode(&padded).map_err(|err| WalletError::InvalidHex(format!("'{stripped}': {err}")))
}

pub fn encode(bytes: &[u8]) -> String {
    format!("0x{}", ::hex::encode(bytes))
}
