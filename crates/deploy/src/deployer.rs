//! Sequential deployment of contract targets from one or more signers.

use alloy_core::primitives::{Address, B256, Bytes, utils::format_ether};
use serde::{Deserialize, Serialize};

use crate::{
    ChainClient, ConstructorArg, ContractHandle, ContractRegistry, DeployError, NetworkConfig,
};

/// Lifecycle of a single target, reported in progress logs.
///
/// `recorded` is the terminal state of a deployment; the verification states only
/// describe the follow-up explorer submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum TargetState {
    Pending,
    Submitted,
    Confirmed,
    Recorded,
    VerificationRequested,
    Verified,
    VerificationFailed,
}

/// One contract to deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    /// Contract name, bare (`Storage`) or fully-qualified (`contracts/Storage.sol:Storage`).
    pub contract: String,
    /// Constructor arguments, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ConstructorArg>,
    /// Signer to deploy from instead of the default (first) signer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployer: Option<Address>,
    /// Key under which the address is recorded. Defaults to the contract name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl DeploymentTarget {
    pub fn new(contract: impl Into<String>) -> Self {
        Self {
            contract: contract.into(),
            args: Vec::new(),
            deployer: None,
            label: None,
        }
    }

    pub fn with_args(mut self, args: Vec<ConstructorArg>) -> Self {
        self.args = args;
        self
    }

    pub fn with_deployer(mut self, deployer: Address) -> Self {
        self.deployer = Some(deployer);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Record key for this target.
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or_else(|| {
            // `source:Name` targets are recorded under `Name`.
            self.contract
                .rsplit_once(':')
                .map_or(self.contract.as_str(), |(_, name)| name)
        })
    }
}

/// A confirmed deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentResult {
    /// Record key, see [`DeploymentTarget::label`].
    pub label: String,
    pub contract_name: String,
    pub contract_address: Address,
    pub deployer_address: Address,
    pub transaction_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
    /// Constructor arguments as configured.
    pub args: Vec<ConstructorArg>,
    /// ABI-encoded constructor arguments, as appended to the bytecode.
    pub encoded_args: Bytes,
    pub contract: ContractHandle,
}

/// Deploys targets one after another against a single network.
pub struct Deployer<C> {
    client: C,
    registry: ContractRegistry,
    network: NetworkConfig,
}

impl<C: ChainClient> Deployer<C> {
    pub fn new(client: C, registry: ContractRegistry, network: NetworkConfig) -> Self {
        Self {
            client,
            registry,
            network,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Compare the endpoint's chain id with the configured one.
    ///
    /// A mismatch is only reported: the transaction is always signed for the chain
    /// the endpoint reports, so it cannot be replayed elsewhere.
    pub async fn check_chain_id(&self) -> Result<u64, DeployError> {
        let chain_id = self.client.chain_id().await?;
        match self.network.chain_id {
            Some(expected) if expected != chain_id => tracing::warn!(
                network = %self.network.name,
                expected,
                actual = chain_id,
                "Chain id reported by the RPC endpoint does not match the configured network"
            ),
            _ => tracing::info!(network = %self.network.name, chain_id, "Connected"),
        }
        Ok(chain_id)
    }

    /// Deploy a single target and wait for its confirmation.
    ///
    /// Nothing is broadcast unless the deployer has a non-zero balance, the
    /// contract resolves and its arguments encode.
    pub async fn deploy_one(
        &self,
        target: &DeploymentTarget,
    ) -> Result<DeploymentResult, DeployError> {
        let deployer = self.select_deployer(target).await?;
        tracing::info!(
            contract = %target.contract,
            deployer = %deployer,
            state = %TargetState::Pending,
            "Deploying contract"
        );

        let balance = self.client.balance(deployer).await?;
        tracing::info!(deployer = %deployer, balance = %format_ether(balance), "Deployer balance (ETH)");
        if balance.is_zero() {
            return Err(DeployError::InsufficientFunds {
                deployer,
                network: self.network.name.clone(),
            });
        }

        let factory = self.registry.resolve(&target.contract)?;
        let pending = factory.deploy(&self.client, deployer, &target.args).await?;
        tracing::info!(
            contract = %target.contract,
            tx_hash = %pending.tx_hash,
            state = %TargetState::Submitted,
            confirmations = self.network.confirmations,
            "Deployment transaction sent, waiting for confirmation"
        );

        let mut result = pending
            .confirmed(&self.client, self.network.confirmations)
            .await?;
        result.label = target.label().to_string();

        tracing::info!(
            contract = %target.contract,
            address = %result.contract_address,
            block = result.block_number,
            gas_used = result.gas_used,
            state = %TargetState::Confirmed,
            "Contract deployed"
        );
        if let Some(link) = self.network.address_url(result.contract_address) {
            tracing::info!("Explorer: {}", link);
        }

        Ok(result)
    }

    /// Deploy all targets in order, stopping at the first failure.
    ///
    /// Every target is resolved and its arguments encoded before the first
    /// transaction, so configuration mistakes never leave a partial deployment.
    /// Targets share the deployer's nonce sequence and are never sent concurrently.
    pub async fn deploy_all(
        &self,
        targets: &[DeploymentTarget],
    ) -> Result<Vec<DeploymentResult>, DeployError> {
        for target in targets {
            self.registry
                .resolve(&target.contract)?
                .encode_args(&target.args)?;
        }

        let mut results: Vec<DeploymentResult> = Vec::with_capacity(targets.len());
        for (index, target) in targets.iter().enumerate() {
            match self.deploy_one(target).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!(
                        network = %self.network.name,
                        index,
                        contract = %target.contract,
                        args = ?target.args,
                        kind = e.kind(),
                        error = %e,
                        skipped = targets.len() - index - 1,
                        "Deployment failed, aborting remaining targets"
                    );
                    for done in &results {
                        tracing::warn!(
                            label = %done.label,
                            address = %done.contract_address,
                            tx_hash = %done.transaction_hash,
                            "Already deployed in this run (not recorded)"
                        );
                    }
                    return Err(e);
                }
            }
        }

        Ok(results)
    }

    async fn select_deployer(&self, target: &DeploymentTarget) -> Result<Address, DeployError> {
        let signers = self.client.signers().await?;
        let default = *signers.first().ok_or(DeployError::NoSigners)?;

        match target.deployer {
            Some(requested) if signers.contains(&requested) => Ok(requested),
            Some(requested) => Err(DeployError::UnknownSigner(requested)),
            None => Ok(default),
        }
    }
}
