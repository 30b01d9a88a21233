use std::borrow::Cow;
use std::fmt;

use ledger_codec::{ByteOrder, PathEncoding, StandardJunctions};

/// Class byte of the multi-chain application.
pub const GENERIC_APP_CLA: u8 = 0xF9;
pub const GENERIC_APP_NAME: &str = "Polkadot Generic";
pub const GENERIC_EVM_COIN_TYPE: u32 = 60;
pub const SUBSTRATE_COIN_TYPE: u32 = 354;

pub const POLKADOT_GENESIS: &str =
    "91b171bb158e2d3848fa23a9f1c25182fb8e20313b2c1eb49219da7a70ce90c3";
pub const KUSAMA_GENESIS: &str =
    "b0a8d493285c2df73290dfb7e61f870f17b41801197a149ca93654499ea3dafe";

const SUBSTRATE_PATH: PathEncoding =
    PathEncoding::new(ByteOrder::Little, StandardJunctions::HardenedTail);
const EVM_PATH: PathEncoding = PathEncoding::new(ByteOrder::Little, StandardJunctions::SoftTail);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AppKind {
    Substrate,
    Evm,
}

/// Curve selected through P2 of address and sign requests.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SigningScheme {
    Ed25519,
    Sr25519,
    Ecdsa,
}

impl SigningScheme {
    pub const fn code(self) -> u8 {
        match self {
            Self::Ed25519 => 0x00,
            Self::Sr25519 => 0x01,
            Self::Ecdsa => 0x02,
        }
    }

    /// Length of the public key a device returns for this scheme.
    pub const fn public_key_len(self) -> usize {
        match self {
            Self::Ed25519 | Self::Sr25519 => 32,
            Self::Ecdsa => 33,
        }
    }
}

/// One device application a chain is routed to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SupportedApplication {
    pub chain_id: Cow<'static, str>,
    pub name: &'static str,
    pub coin_type: u32,
    pub cla: u8,
    pub kind: AppKind,
    pub path_encoding: PathEncoding,
    /// Appended to the address query when set; legacy per-chain apps derive
    /// the format from their own CLA.
    pub address_prefix: Option<u16>,
    pub scheme: SigningScheme,
}

const fn legacy(
    chain_id: &'static str,
    name: &'static str,
    cla: u8,
    coin_type: u32,
) -> SupportedApplication {
    SupportedApplication {
        chain_id: Cow::Borrowed(chain_id),
        name,
        coin_type,
        cla,
        kind: AppKind::Substrate,
        path_encoding: SUBSTRATE_PATH,
        address_prefix: None,
        scheme: SigningScheme::Ed25519,
    }
}

static LEGACY_APPS: [SupportedApplication; 11] = [
    legacy(POLKADOT_GENESIS, "Polkadot", 0x90, 354),
    legacy(KUSAMA_GENESIS, "Kusama", 0x99, 434),
    legacy(
        "68d56f15f85d3136970ec16946040bc1752654e906147f7e43e9d539d7c3de2f",
        "Statemint",
        0x96,
        354,
    ),
    legacy(
        "48239ef607d7928874027a43a67689209727dfb3d3dc5e5b03a39bdc2eda771a",
        "Statemine",
        0x97,
        434,
    ),
    legacy(
        "742a2ca70c2fda6cee4f8df98d64c4c670a052d9568058982dad9d5a7a135c5b",
        "Edgeware",
        0x94,
        523,
    ),
    legacy(
        "6fbd74e5e1d0a61d52ccfe9d4adaed16dd3a7caa37c6bc4d0c2fa12e8b2f4063",
        "Polymesh",
        0x91,
        595,
    ),
    legacy(
        "97da7ede98d7bad4e36b4d734b6055425a3be036da2a332ea5a7037656427a21",
        "Nodle",
        0x98,
        1003,
    ),
    legacy(
        "baf5aabe40646d11f0ee8abbdc64f4a4b7674925cba08e4a05ff9ebed6e2126b",
        "Karura",
        0x9a,
        686,
    ),
    legacy(
        "fc41b9bd8ef8fe53d58c7ea67c794c7ec9a73daf05e6d54b14ff6342c99ba64c",
        "Acala",
        0x9b,
        787,
    ),
    legacy(
        "50dd5d206917bf10502c68fb4d18a59fc8aa31586f4e8856b493e43544aa82aa",
        "xx network",
        0xa3,
        1955,
    ),
    legacy(
        "9eb76c5184c4ab8679d2d5d819fdf90b9c001403e9e17da2e14b6d8aec4029c6",
        "Astar",
        0xa9,
        810,
    ),
];

impl SupportedApplication {
    /// Every per-chain application in the static table.
    pub fn all() -> &'static [SupportedApplication] {
        &LEGACY_APPS
    }

    /// Looks up the per-chain application for a genesis hash, with or
    /// without a `0x` prefix.
    pub fn find(chain_id: &str) -> Option<Self> {
        let chain_id = normalize_chain_id(chain_id);
        LEGACY_APPS
            .iter()
            .find(|app| app.chain_id.eq_ignore_ascii_case(chain_id))
            .cloned()
    }

    pub fn find_by_name(name: &str) -> Option<Self> {
        LEGACY_APPS
            .iter()
            .find(|app| app.name.eq_ignore_ascii_case(name.trim()))
            .cloned()
    }

    /// Routes a substrate chain to the multi-chain application.
    pub fn generic(chain_id: impl Into<String>, ss58_prefix: u16) -> Self {
        let chain_id = chain_id.into();
        Self {
            chain_id: Cow::Owned(normalize_chain_id(&chain_id).to_ascii_lowercase()),
            name: GENERIC_APP_NAME,
            coin_type: SUBSTRATE_COIN_TYPE,
            cla: GENERIC_APP_CLA,
            kind: AppKind::Substrate,
            path_encoding: SUBSTRATE_PATH,
            address_prefix: Some(ss58_prefix),
            scheme: SigningScheme::Ed25519,
        }
    }

    /// Routes an EVM-flavoured chain to the multi-chain application.
    pub fn generic_evm(chain_id: impl Into<String>) -> Self {
        let chain_id = chain_id.into();
        Self {
            chain_id: Cow::Owned(normalize_chain_id(&chain_id).to_ascii_lowercase()),
            name: GENERIC_APP_NAME,
            coin_type: GENERIC_EVM_COIN_TYPE,
            cla: GENERIC_APP_CLA,
            kind: AppKind::Evm,
            path_encoding: EVM_PATH,
            address_prefix: None,
            scheme: SigningScheme::Ecdsa,
        }
    }

    pub fn is_generic(&self) -> bool {
        self.cla == GENERIC_APP_CLA
    }

    /// Serialized standard derivation path for `account_index`.
    pub fn derivation_path(&self, account_index: u32) -> Vec<u8> {
        self.path_encoding.build(self.coin_type, account_index)
    }
}

impl fmt::Display for SupportedApplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (cla 0x{:02x}, coin {})", self.name, self.cla, self.coin_type)
    }
}

fn normalize_chain_id(chain_id: &str) -> &str {
    let chain_id = chain_id.trim();
    chain_id
        .strip_prefix("0x")
        .or_else(|| chain_id.strip_prefix("0X"))
        .unwrap_or(chain_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_values() {
        let polkadot = SupportedApplication::find(POLKADOT_GENESIS).unwrap();
        assert_eq!(polkadot.cla, 0x90);
        assert_eq!(polkadot.coin_type, 354);
        assert_eq!(polkadot.kind, AppKind::Substrate);

        let kusama = SupportedApplication::find(&format!("0x{KUSAMA_GENESIS}")).unwrap();
        assert_eq!(kusama.cla, 0x99);
        assert_eq!(kusama.coin_type, 434);
        assert!(SupportedApplication::find("deadbeef").is_none());
    }

    #[test]
    fn class_bytes_are_unique() {
        let apps = SupportedApplication::all();
        for (i, app) in apps.iter().enumerate() {
            assert!(apps[i + 1..].iter().all(|other| other.cla != app.cla), "{app}");
            assert_ne!(app.cla, GENERIC_APP_CLA);
        }
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(
            SupportedApplication::find_by_name("astar").unwrap().cla,
            0xa9
        );
        assert!(SupportedApplication::find_by_name("unknown").is_none());
    }

    #[test]
    fn generic_routes() {
        let app = SupportedApplication::generic(format!("0x{POLKADOT_GENESIS}"), 0);
        assert_eq!(app.cla, GENERIC_APP_CLA);
        assert_eq!(app.chain_id, POLKADOT_GENESIS);
        assert_eq!(app.address_prefix, Some(0));
        assert!(app.is_generic());

        let evm = SupportedApplication::generic_evm("moonbeam");
        assert_eq!(evm.kind, AppKind::Evm);
        assert_eq!(evm.scheme, SigningScheme::Ecdsa);
        assert_eq!(evm.path_encoding.standard, StandardJunctions::SoftTail);
    }

    #[test]
    fn derivation_path_uses_app_encoding() {
        let app = SupportedApplication::find(POLKADOT_GENESIS).unwrap();
        let path = app.derivation_path(0);
        assert_eq!(path.len(), 20);
        assert_eq!(&path[4..8], &(354u32 | 0x8000_0000).to_le_bytes());
    }
}
