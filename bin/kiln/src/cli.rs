use std::path::PathBuf;

use alloy_core::primitives::Address;
use clap::{Args, Parser, Subcommand};
use kiln_deploy::Credentials;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(
    author,
    version,
    about = "Deploy, record and verify smart contracts on EVM networks"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "KILN_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file.
    ///
    /// Defaults to ./kiln.toml when it exists. Without a file, only the built-in
    /// networks are known and no targets are configured.
    #[arg(short, long, alias = "conf", global = true, env = "KILN_CONFIG")]
    pub config: Option<PathBuf>,

    /// The network to use, overriding the configured one.
    #[arg(short, long, global = true, env = "KILN_NETWORK")]
    pub network: Option<String>,

    #[clap(flatten)]
    pub secrets: Secrets,

    #[command(subcommand)]
    pub command: Command,
}

/// Secrets, never read from the configuration file.
#[derive(Debug, Clone, Args)]
pub struct Secrets {
    /// The RPC endpoint of the network.
    ///
    /// Falls back to <NETWORK>_RPC_URL (e.g. SEPOLIA_RPC_URL), then to the network's `rpc_url`.
    #[arg(long, global = true, env = "KILN_RPC_URL", hide_env_values = true)]
    pub rpc_url: Option<String>,

    /// Private key(s) of the deployer accounts, comma separated. The first one is the default deployer.
    #[arg(
        long,
        global = true,
        env = "PRIVATE_KEY",
        value_delimiter = ',',
        hide_env_values = true
    )]
    pub private_key: Vec<String>,

    /// Etherscan API key. Without it, contracts have to be verified manually.
    #[arg(long, global = true, env = "ETHERSCAN_API_KEY", hide_env_values = true)]
    pub etherscan_api_key: Option<String>,
}

impl Secrets {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            rpc_url: self.rpc_url.clone(),
            private_keys: self.private_key.clone(),
            etherscan_api_key: self.etherscan_api_key.clone(),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Deploy the configured targets, record their addresses and verify them.
    Deploy {
        /// Do not submit the contracts for verification.
        #[arg(long, env = "KILN_SKIP_VERIFY")]
        skip_verify: bool,

        /// Seconds to wait before the first verification request.
        #[arg(long, env = "KILN_VERIFY_DELAY")]
        verify_delay: Option<u64>,
    },

    /// Verify a contract deployed earlier.
    Verify {
        /// Address of the deployed contract.
        address: Address,

        /// Contract name, bare or fully qualified (`contracts/Storage.sol:Storage`).
        contract: String,

        /// Constructor arguments, in declaration order.
        args: Vec<String>,
    },

    /// Show the deployer account, its balance and the chain id of the network.
    Info,

    /// Check which inputs are configured, then show the network info.
    CheckConfig,
}
