//! Pre-flight reports: which inputs are configured and what the deployer account looks like.

use std::fmt;

use alloy_core::primitives::{Address, U256, utils::format_ether};

use crate::{ChainClient, Credentials, DeployError, NetworkConfig};

/// Which secrets are available for a network. Values are never shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigCheck {
    pub network: String,
    pub rpc_url_env_var: String,
    pub rpc_url: bool,
    pub private_key: bool,
    pub etherscan_api_key: bool,
}

impl ConfigCheck {
    pub fn new(
        credentials: &Credentials,
        network: &NetworkConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        Self {
            network: network.name.clone(),
            rpc_url_env_var: network.rpc_url_env_var(),
            rpc_url: credentials.rpc_url_for(network, env).is_some(),
            private_key: credentials.private_keys.iter().any(|k| !k.trim().is_empty()),
            etherscan_api_key: credentials
                .etherscan_api_key
                .as_ref()
                .is_some_and(|k| !k.trim().is_empty()),
        }
    }

    /// Whether a deployment can be attempted.
    pub fn is_ready(&self) -> bool {
        self.rpc_url && self.private_key
    }
}

impl fmt::Display for ConfigCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration for {}:", self.network)?;
        writeln!(
            f,
            "  {} RPC URL ({})",
            status_icon(self.rpc_url),
            self.rpc_url_env_var
        )?;
        writeln!(f, "  {} Private key (PRIVATE_KEY)", status_icon(self.private_key))?;
        if self.etherscan_api_key {
            write!(f, "  [ok] Etherscan API key")
        } else {
            write!(
                f,
                "  [warn] Etherscan API key missing (manual verification required)"
            )
        }
    }
}

/// Deployer account as seen by the selected network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub network: String,
    pub account: Address,
    pub balance: U256,
    pub chain_id: u64,
    pub expected_chain_id: Option<u64>,
    pub faucet_url: Option<String>,
}

impl NetworkInfo {
    pub fn chain_id_match(&self) -> bool {
        self.expected_chain_id.is_none_or(|expected| expected == self.chain_id)
    }
}

/// Query the default signer's balance and the endpoint's chain id.
pub async fn network_info<C: ChainClient>(
    client: &C,
    network: &NetworkConfig,
) -> Result<NetworkInfo, DeployError> {
    let account = client
        .signers()
        .await?
        .first()
        .copied()
        .ok_or(DeployError::NoSigners)?;

    Ok(NetworkInfo {
        network: network.name.clone(),
        account,
        balance: client.balance(account).await?,
        chain_id: client.chain_id().await?,
        expected_chain_id: network.chain_id,
        faucet_url: network.faucet_url.clone(),
    })
}

impl fmt::Display for NetworkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Network:  {}", self.network)?;
        writeln!(f, "Account:  {}", self.account)?;
        writeln!(f, "Balance:  {} ETH", format_ether(self.balance))?;
        write!(f, "Chain ID: {}", self.chain_id)?;
        if let Some(expected) = self.expected_chain_id {
            let status = if self.chain_id_match() { "ok" } else { "MISMATCH" };
            write!(f, " (expected {}, {})", expected, status)?;
        }

        if self.balance.is_zero() {
            writeln!(f)?;
            write!(f, "The account has no ETH")?;
            if let Some(faucet) = &self.faucet_url {
                write!(f, ", request test ETH at {}", faucet)?;
            }
        }
        Ok(())
    }
}

fn status_icon(ok: bool) -> &'static str {
    if ok { "[ok]" } else { "[MISSING]" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployer::tests::{FakeChain, sepolia};

    const ALICE: Address = Address::repeat_byte(0xa1);

    #[tokio::test]
    async fn test_network_info_funded() {
        let chain = FakeChain::funded(vec![ALICE]);

        let info = network_info(&chain, &sepolia()).await.unwrap();

        assert_eq!(info.account, ALICE);
        assert_eq!(info.chain_id, 11155111);
        assert!(info.chain_id_match());
        let report = info.to_string();
        assert!(report.contains("Balance:  1.0"));
        assert!(!report.contains("no ETH"));
    }

    #[tokio::test]
    async fn test_network_info_faucet_hint() {
        let mut chain = FakeChain::funded(vec![ALICE]);
        chain.balances.clear();
        let network = NetworkConfig {
            faucet_url: Some("https://sepoliafaucet.com/".to_string()),
            chain_id: Some(1),
            ..sepolia()
        };

        let info = network_info(&chain, &network).await.unwrap();

        assert!(!info.chain_id_match());
        let report = info.to_string();
        assert!(report.contains("MISMATCH"));
        assert!(report.contains("request test ETH at https://sepoliafaucet.com/"));
    }

    #[tokio::test]
    async fn test_network_info_without_signers() {
        let chain = FakeChain::funded(Vec::new());
        let err = network_info(&chain, &sepolia()).await.unwrap_err();
        assert!(matches!(err, DeployError::NoSigners));
    }

    #[test]
    fn test_config_check() {
        let network = sepolia();
        let credentials = Credentials {
            rpc_url: None,
            private_keys: vec!["0x01".to_string()],
            etherscan_api_key: None,
        };

        let check = ConfigCheck::new(&credentials, &network, |_| None);
        assert!(!check.is_ready());
        let report = check.to_string();
        assert!(report.contains("[MISSING] RPC URL (SEPOLIA_RPC_URL)"));
        assert!(report.contains("[ok] Private key"));
        assert!(report.contains("[warn] Etherscan API key missing"));

        let check = ConfigCheck::new(&credentials, &network, |key| {
            (key == "SEPOLIA_RPC_URL").then(|| "https://rpc.sepolia.org".to_string())
        });
        assert!(check.is_ready());
    }
}
