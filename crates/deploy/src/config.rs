//! Run configuration: networks, targets and credentials.
//!
//! Non-secret settings come from `kiln.toml` layered over built-in network presets
//! and `KILN_`-prefixed environment variables. Secrets (RPC URL, private keys,
//! explorer API key) are passed separately as [`Credentials`] and checked before
//! any network call.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{DeploymentTarget, chain::parse_private_key, records::RESERVED_KEYS};

/// The default name for the configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "kiln.toml";

/// The network used when none is configured.
pub const DEFAULT_NETWORK: &str = "sepolia";

/// Default settling delay before the first verification request.
pub const DEFAULT_VERIFY_DELAY_SECS: u64 = 60;

/// Etherscan multichain (v2) API endpoint.
pub const ETHERSCAN_API_URL: &str = "https://api.etherscan.io/v2/api";

/// Settings of one target network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network name, taken from the `[networks.<name>]` key.
    #[serde(skip)]
    pub name: String,
    /// Expected chain id, cross-checked against the endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// RPC URL; usually provided through the environment instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    /// Number of blocks (including the inclusion block) before a deployment counts as final.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Block explorer web UI, used for links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
    /// Where test ether can be requested, shown when the deployer has none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faucet_url: Option<String>,
    /// Etherscan-compatible verification API.
    #[serde(default = "default_explorer_api_url")]
    pub explorer_api_url: String,
    /// Whether deployed contracts are submitted for verification.
    #[serde(default)]
    pub verify: bool,
    /// Wait before the first verification request, in seconds.
    #[serde(default = "default_verify_delay_secs")]
    pub verify_delay_secs: u64,
}

fn default_confirmations() -> u64 {
    1
}

fn default_explorer_api_url() -> String {
    ETHERSCAN_API_URL.to_string()
}

fn default_verify_delay_secs() -> u64 {
    DEFAULT_VERIFY_DELAY_SECS
}

impl NetworkConfig {
    /// A network with default settings and verification disabled.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain_id: None,
            rpc_url: None,
            confirmations: default_confirmations(),
            explorer_url: None,
            faucet_url: None,
            explorer_api_url: default_explorer_api_url(),
            verify: false,
            verify_delay_secs: DEFAULT_VERIFY_DELAY_SECS,
        }
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_secs(self.verify_delay_secs)
    }

    /// Explorer page of an address, when an explorer is configured.
    pub fn address_url(&self, address: Address) -> Option<String> {
        self.explorer_url
            .as_ref()
            .map(|url| format!("{}/address/{}", url.trim_end_matches('/'), address))
    }

    /// Name of the environment variable holding this network's RPC URL, e.g. `SEPOLIA_RPC_URL`.
    pub fn rpc_url_env_var(&self) -> String {
        let name: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{name}_RPC_URL")
    }
}

/// Networks known without any configuration.
fn preset_networks() -> BTreeMap<String, NetworkConfig> {
    let explorer = |name: &str, chain_id: u64, url: &str| NetworkConfig {
        chain_id: Some(chain_id),
        explorer_url: Some(url.to_string()),
        verify: true,
        ..NetworkConfig::named(name)
    };

    BTreeMap::from([
        (
            "sepolia".to_string(),
            NetworkConfig {
                faucet_url: Some("https://sepoliafaucet.com/".to_string()),
                ..explorer("sepolia", 11155111, "https://sepolia.etherscan.io")
            },
        ),
        (
            "holesky".to_string(),
            explorer("holesky", 17000, "https://holesky.etherscan.io"),
        ),
        (
            "localhost".to_string(),
            NetworkConfig {
                chain_id: Some(31337),
                rpc_url: Some("http://127.0.0.1:8545".to_string()),
                ..NetworkConfig::named("localhost")
            },
        ),
    ])
}

/// Non-secret run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Network to deploy to.
    pub network: String,
    /// Directory holding compiled artifacts (Hardhat `artifacts/` or Foundry `out/`).
    pub artifacts: PathBuf,
    /// Directory the deployment record files are written to.
    pub records_dir: PathBuf,
    /// Per-request RPC timeout, in seconds.
    pub rpc_timeout_secs: u64,
    /// Extra gas on top of estimates, in percent.
    pub gas_buffer_percent: u64,
    /// Known networks, keyed by name.
    pub networks: BTreeMap<String, NetworkConfig>,
    /// Contracts to deploy, in order.
    #[serde(default)]
    pub targets: Vec<DeploymentTarget>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            network: DEFAULT_NETWORK.to_string(),
            artifacts: PathBuf::from("artifacts"),
            records_dir: PathBuf::from("."),
            rpc_timeout_secs: crate::rpc::DEFAULT_TIMEOUT.as_secs(),
            gas_buffer_percent: crate::chain::DEFAULT_GAS_BUFFER_PERCENT,
            networks: preset_networks(),
            targets: Vec::new(),
        }
    }
}

impl DeployConfig {
    /// Load the configuration, layering presets, the TOML file (if any) and
    /// `KILN_*` environment variables (`KILN_NETWORK`, `KILN_NETWORKS__SEPOLIA__CONFIRMATIONS`, ...).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.exists() {
                anyhow::bail!("Configuration file not found: {}", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }

        let config: Self = figment
            .merge(Env::prefixed("KILN_").split("__").ignore(&["rpc_url", "verbosity", "config"]))
            .extract()
            .context("Failed to parse configuration")?;

        if let Some(path) = path {
            tracing::info!(path = %path.display(), "Configuration loaded");
        }
        Ok(config)
    }

    /// Settings of the selected network.
    pub fn selected_network(&self) -> Result<NetworkConfig> {
        self.network_config(&self.network)
    }

    pub fn network_config(&self, name: &str) -> Result<NetworkConfig> {
        // The name ends up in the record file name.
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            anyhow::bail!(
                "Invalid network name `{}`: use letters, digits, `-` and `_` only",
                name
            );
        }

        let mut network = self.networks.get(name).cloned().with_context(|| {
            format!(
                "Unknown network `{}` (known: {})",
                name,
                self.networks.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })?;
        network.name = name.to_string();
        Ok(network)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Check the target list can be deployed and recorded.
    pub fn validate_targets(&self) -> Result<()> {
        if self.targets.is_empty() {
            anyhow::bail!("No targets configured: add at least one [[targets]] entry");
        }

        let mut labels = BTreeSet::new();
        for target in &self.targets {
            let label = target.label();
            if RESERVED_KEYS.contains(&label) {
                anyhow::bail!(
                    "Target label `{}` is reserved in deployment records, set a different `label`",
                    label
                );
            }
            if !labels.insert(label) {
                anyhow::bail!(
                    "Duplicate target label `{}`: give repeated contracts distinct `label`s",
                    label
                );
            }
        }
        Ok(())
    }
}

/// Secret inputs as provided by the operator.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub rpc_url: Option<String>,
    pub private_keys: Vec<String>,
    pub etherscan_api_key: Option<String>,
}

/// Validated secrets, ready to build clients from.
#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    pub rpc_url: Url,
    pub signers: Vec<PrivateKeySigner>,
    /// `None` puts verification in manual-only mode.
    pub etherscan_api_key: Option<String>,
}

impl ResolvedCredentials {
    /// Scheme, host and port of the RPC URL, safe to log. Paths and query strings
    /// of hosted endpoints carry API keys.
    pub fn rpc_endpoint(&self) -> String {
        let mut endpoint = format!(
            "{}://{}",
            self.rpc_url.scheme(),
            self.rpc_url.host_str().unwrap_or_default()
        );
        if let Some(port) = self.rpc_url.port() {
            endpoint.push_str(&format!(":{port}"));
        }
        endpoint
    }
}

impl Credentials {
    /// The RPC URL to use: explicit value, then `<NETWORK>_RPC_URL`, then the network table.
    pub fn rpc_url_for(
        &self,
        network: &NetworkConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Option<String> {
        non_empty(self.rpc_url.clone())
            .or_else(|| non_empty(env(&network.rpc_url_env_var())))
            .or_else(|| non_empty(network.rpc_url.clone()))
    }

    /// Validate the credentials for `network` using the process environment.
    pub fn resolve(&self, network: &NetworkConfig) -> Result<ResolvedCredentials> {
        self.resolve_with_env(network, |key| std::env::var(key).ok())
    }

    /// Validate the credentials, reading fallbacks through `env`.
    pub fn resolve_with_env(
        &self,
        network: &NetworkConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<ResolvedCredentials> {
        let rpc_url = self.rpc_url_for(network, env).with_context(|| {
            format!(
                "No RPC URL configured for network `{}`: pass --rpc-url or set {}",
                network.name,
                network.rpc_url_env_var()
            )
        })?;
        let rpc_url = Url::parse(&rpc_url).context("Invalid RPC URL")?;

        let keys: Vec<&str> = self
            .private_keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect();
        if keys.is_empty() {
            anyhow::bail!("No private key configured: pass --private-key or set PRIVATE_KEY");
        }
        let signers = keys
            .into_iter()
            .enumerate()
            .map(|(i, key)| {
                parse_private_key(key).with_context(|| format!("Private key #{} is invalid", i + 1))
            })
            .collect::<Result<Vec<_>>>()?;

        let etherscan_api_key = non_empty(self.etherscan_api_key.clone());
        if etherscan_api_key.is_none() && network.verify {
            tracing::warn!(
                "ETHERSCAN_API_KEY not configured, contracts will need manual verification"
            );
        }

        Ok(ResolvedCredentials {
            rpc_url,
            signers,
            etherscan_api_key,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
