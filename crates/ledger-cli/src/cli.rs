use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use ledger_wallet::chain::AppRoute;

use crate::config::{DEFAULT_SCAN_SECS, DEFAULT_TIMEOUT_SECS};

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "Ledger Nano X / Stax / Flex CLI over BLE")]
pub struct Cli {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Scan(ScanArgs),
    Address(AddressArgs),
    Sign(SignArgs),
    Version(VersionArgs),
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    #[arg(long, default_value_t = DEFAULT_SCAN_SECS)]
    pub duration_secs: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Route {
    /// The chain's own application.
    Legacy,
    /// The multi-chain application.
    Generic,
    /// The multi-chain application in EVM mode.
    Evm,
}

#[derive(Args, Debug)]
pub struct AppArgs {
    /// Chain name or genesis hash. Without it, a legacy-route `--path`
    /// picks the application by coin type; otherwise polkadot.
    #[arg(long)]
    pub chain: Option<String>,
    #[arg(long, value_enum, default_value_t = Route::Legacy)]
    pub route: Route,
    /// Address format for the multi-chain application.
    #[arg(long)]
    pub ss58_prefix: Option<u16>,
}

impl AppArgs {
    pub fn app_route(&self) -> AppRoute {
        match self.route {
            Route::Legacy => AppRoute::Legacy,
            Route::Generic => AppRoute::Generic {
                ss58_prefix: self.ss58_prefix,
            },
            Route::Evm => AppRoute::GenericEvm,
        }
    }
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    #[arg(long, alias = "duration-secs", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,
    #[arg(long)]
    pub device_id: Option<String>,
}

#[derive(Args, Debug)]
pub struct AddressArgs {
    #[command(flatten)]
    pub app: AppArgs,
    #[command(flatten)]
    pub connect: ConnectArgs,
    #[arg(long, default_value_t = 0)]
    pub account_index: u32,
    /// BIP32 path overriding the account index, e.g. m/44'/354'/0'/0'/0'.
    #[arg(long)]
    pub path: Option<String>,
    #[arg(long, default_value_t = false)]
    pub show_on_device: bool,
}

#[derive(Args, Debug)]
pub struct SignArgs {
    #[command(flatten)]
    pub app: AppArgs,
    #[command(flatten)]
    pub connect: ConnectArgs,
    #[arg(long, default_value_t = 0)]
    pub account_index: u32,
    #[arg(long)]
    pub path: Option<String>,
    /// Hex-encoded transaction, or @file.
    #[arg(long)]
    pub payload: String,
    /// Hex-encoded metadata proof, or @file.
    #[arg(long)]
    pub proof: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    #[command(flatten)]
    pub app: AppArgs,
    #[command(flatten)]
    pub connect: ConnectArgs,
}
