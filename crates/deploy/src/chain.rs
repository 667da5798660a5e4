//! Chain access: signer identities, balance and chain-id queries, and the
//! submission and confirmation of contract-creation transactions.

use std::{future::Future, time::Duration};

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_core::primitives::{Address, B256, Bytes, TxKind, U64, U256};
use alloy_eips::eip2718::Encodable2718;
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::OnceCell;

use crate::{
    DeployError,
    rpc::{self, RpcError},
};

/// Default extra gas added on top of `eth_estimateGas`, in percent.
pub const DEFAULT_GAS_BUFFER_PERCENT: u64 = 20;

/// Fallback priority fee when the node does not implement `eth_maxPriorityFeePerGas` (1 gwei).
const FALLBACK_PRIORITY_FEE: u128 = 1_000_000_000;

/// Receipt fields the deployment flow cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: B256,
    pub contract_address: Option<Address>,
    pub block_number: u64,
    pub gas_used: u64,
    /// `false` when the transaction reverted.
    pub success: bool,
}

/// Access to a chain through one or more signing identities.
///
/// Every method is a suspension point; callers issue one call at a time.
pub trait ChainClient: Send + Sync {
    /// Addresses of the signers able to send transactions, in configuration order.
    fn signers(&self) -> impl Future<Output = Result<Vec<Address>, DeployError>> + Send;

    /// Current balance of `address`, in wei.
    fn balance(&self, address: Address)
    -> impl Future<Output = Result<U256, DeployError>> + Send;

    /// Chain id reported by the endpoint.
    fn chain_id(&self) -> impl Future<Output = Result<u64, DeployError>> + Send;

    /// Sign and broadcast a contract-creation transaction, returning its hash.
    fn send_deployment(
        &self,
        from: Address,
        init_code: Bytes,
    ) -> impl Future<Output = Result<B256, DeployError>> + Send;

    /// Wait until the transaction is mined and `confirmations` blocks deep.
    fn wait_for_receipt(
        &self,
        tx_hash: B256,
        confirmations: u64,
    ) -> impl Future<Output = Result<Receipt, DeployError>> + Send;
}

/// Receipt as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    contract_address: Option<Address>,
    block_number: U64,
    gas_used: U64,
    status: Option<U64>,
}

impl From<RpcReceipt> for Receipt {
    fn from(receipt: RpcReceipt) -> Self {
        Self {
            transaction_hash: receipt.transaction_hash,
            contract_address: receipt.contract_address,
            block_number: receipt.block_number.to(),
            gas_used: receipt.gas_used.to(),
            // Pre-Byzantium receipts carry no status; treat them as successful.
            success: receipt.status.is_none_or(|s| s == U64::from(1)),
        }
    }
}

/// EIP-1559 fee parameters for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fees {
    max_fee_per_gas: u128,
    max_priority_fee_per_gas: u128,
}

impl Fees {
    /// Leave room for the base fee to double before the transaction is mined.
    fn from_base_fee(base_fee: u128, priority_fee: u128) -> Self {
        Self {
            max_fee_per_gas: base_fee.saturating_mul(2).saturating_add(priority_fee),
            max_priority_fee_per_gas: priority_fee,
        }
    }
}

/// [`ChainClient`] backed by a JSON-RPC endpoint and local private keys.
pub struct RpcChainClient {
    client: reqwest::Client,
    url: String,
    signers: Vec<PrivateKeySigner>,
    gas_buffer_percent: u64,
    poll_interval: Duration,
    chain_id: OnceCell<u64>,
}

impl RpcChainClient {
    /// Create a client for `url` signing with `signers`.
    pub fn new(
        url: impl Into<String>,
        signers: Vec<PrivateKeySigner>,
        timeout: Duration,
    ) -> Result<Self, DeployError> {
        let client = rpc::create_client(timeout)
            .map_err(|e| DeployError::connectivity("failed to create HTTP client", e))?;

        Ok(Self {
            client,
            url: url.into(),
            signers,
            gas_buffer_percent: DEFAULT_GAS_BUFFER_PERCENT,
            poll_interval: rpc::DEFAULT_POLL_INTERVAL,
            chain_id: OnceCell::new(),
        })
    }

    /// Percentage added to gas estimates.
    pub fn with_gas_buffer_percent(mut self, percent: u64) -> Self {
        self.gas_buffer_percent = percent;
        self
    }

    /// Interval between receipt polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, DeployError> {
        rpc::json_rpc_call(&self.client, &self.url, method, params)
            .await
            .map_err(|e| DeployError::connectivity(format!("{method} failed"), e))
    }

    fn signer(&self, address: Address) -> Result<&PrivateKeySigner, DeployError> {
        self.signers
            .iter()
            .find(|s| s.address() == address)
            .ok_or(DeployError::UnknownSigner(address))
    }

    async fn estimate_gas(&self, from: Address, init_code: &Bytes) -> Result<u64, DeployError> {
        let estimate: Result<U64, RpcError> = rpc::json_rpc_call(
            &self.client,
            &self.url,
            "eth_estimateGas",
            vec![json!({ "from": from, "data": init_code })],
        )
        .await;

        match estimate {
            Ok(gas) => Ok(with_buffer(gas.to(), self.gas_buffer_percent)),
            Err(e) if e.is_revert() => Err(DeployError::TransactionFailure {
                tx_hash: None,
                reason: format!("deployment would revert: {e}"),
            }),
            Err(e) => Err(DeployError::connectivity("eth_estimateGas failed", e)),
        }
    }

    async fn fees(&self) -> Result<Fees, DeployError> {
        let block: Value = self
            .call("eth_getBlockByNumber", vec![json!("latest"), json!(false)])
            .await?;
        let base_fee = block
            .get("baseFeePerGas")
            .and_then(|v| serde_json::from_value::<U256>(v.clone()).ok())
            .map(|fee| fee.saturating_to::<u128>());

        let priority_fee = match self
            .call::<U256>("eth_maxPriorityFeePerGas", vec![])
            .await
        {
            Ok(fee) => fee.saturating_to::<u128>(),
            Err(e) => {
                tracing::debug!(error = %e, "eth_maxPriorityFeePerGas unavailable, using fallback tip");
                FALLBACK_PRIORITY_FEE
            }
        };

        match base_fee {
            Some(base_fee) => Ok(Fees::from_base_fee(base_fee, priority_fee)),
            None => {
                // Legacy-fee chain: pay the gas price as both cap and tip.
                let gas_price: U256 = self.call("eth_gasPrice", vec![]).await?;
                let gas_price = gas_price.saturating_to::<u128>();
                Ok(Fees {
                    max_fee_per_gas: gas_price,
                    max_priority_fee_per_gas: gas_price,
                })
            }
        }
    }

    async fn block_number(&self) -> Result<u64, DeployError> {
        let number: U64 = self.call("eth_blockNumber", vec![]).await?;
        Ok(number.to())
    }
}

impl ChainClient for RpcChainClient {
    async fn signers(&self) -> Result<Vec<Address>, DeployError> {
        Ok(self.signers.iter().map(|s| s.address()).collect())
    }

    async fn balance(&self, address: Address) -> Result<U256, DeployError> {
        self.call("eth_getBalance", vec![json!(address), json!("latest")])
            .await
    }

    async fn chain_id(&self) -> Result<u64, DeployError> {
        self.chain_id
            .get_or_try_init(|| async {
                let id: U64 = self.call("eth_chainId", vec![]).await?;
                Ok::<u64, DeployError>(id.to())
            })
            .await
            .copied()
    }

    async fn send_deployment(&self, from: Address, init_code: Bytes) -> Result<B256, DeployError> {
        let signer = self.signer(from)?;
        let chain_id = self.chain_id().await?;

        // The pending nonce includes our own earlier transactions still in the mempool.
        let nonce: U64 = self
            .call("eth_getTransactionCount", vec![json!(from), json!("pending")])
            .await?;
        let gas_limit = self.estimate_gas(from, &init_code).await?;
        let fees = self.fees().await?;

        tracing::debug!(
            from = %from,
            nonce = nonce.to::<u64>(),
            gas_limit,
            max_fee_per_gas = fees.max_fee_per_gas,
            max_priority_fee_per_gas = fees.max_priority_fee_per_gas,
            "Signing deployment transaction"
        );

        let tx = TxEip1559 {
            chain_id,
            nonce: nonce.to(),
            gas_limit,
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
            to: TxKind::Create,
            value: U256::ZERO,
            access_list: Default::default(),
            input: init_code,
        };
        let (raw, local_hash) = sign_transaction(signer, tx)?;

        let tx_hash: B256 = rpc::json_rpc_call(
            &self.client,
            &self.url,
            "eth_sendRawTransaction",
            vec![json!(raw)],
        )
        .await
        .map_err(|e| match e {
            RpcError::Node { .. } => DeployError::TransactionFailure {
                tx_hash: Some(local_hash),
                reason: format!("node rejected transaction: {e}"),
            },
            e => DeployError::connectivity("eth_sendRawTransaction failed", e),
        })?;

        Ok(tx_hash)
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        confirmations: u64,
    ) -> Result<Receipt, DeployError> {
        let receipt: Receipt = loop {
            let receipt: Option<RpcReceipt> = self
                .call("eth_getTransactionReceipt", vec![json!(tx_hash)])
                .await?;
            if let Some(receipt) = receipt {
                break receipt.into();
            }
            tracing::trace!(tx_hash = %tx_hash, "Transaction not mined yet");
            tokio::time::sleep(self.poll_interval).await;
        };

        if confirmations > 1 {
            let target = receipt.block_number + confirmations - 1;
            loop {
                let head = self.block_number().await?;
                if head >= target {
                    break;
                }
                tracing::debug!(
                    tx_hash = %tx_hash,
                    head,
                    target,
                    "Waiting for confirmations"
                );
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Ok(receipt)
    }
}

/// Sign an EIP-1559 transaction, returning the raw 2718 envelope and its hash.
fn sign_transaction(signer: &PrivateKeySigner, tx: TxEip1559) -> Result<(Bytes, B256), DeployError> {
    let signature = signer
        .sign_hash_sync(&tx.signature_hash())
        .map_err(|e| DeployError::TransactionFailure {
            tx_hash: None,
            reason: format!("failed to sign transaction: {e}"),
        })?;

    let envelope = TxEnvelope::from(tx.into_signed(signature));
    let hash = *envelope.tx_hash();
    Ok((envelope.encoded_2718().into(), hash))
}

fn with_buffer(gas: u64, percent: u64) -> u64 {
    gas.saturating_add(gas.saturating_mul(percent) / 100)
}

/// Parse a hex private key, with or without the `0x` prefix.
pub fn parse_private_key(key: &str) -> anyhow::Result<PrivateKeySigner> {
    key.trim()
        .trim_start_matches("0x")
        .parse::<PrivateKeySigner>()
        .map_err(|e| anyhow::anyhow!("Invalid private key: {}", e))
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::keccak256;

    use super::*;

    /// Anvil's first development key.
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_parse_private_key() {
        let signer = parse_private_key(DEV_KEY).unwrap();
        assert_eq!(
            signer.address().to_string(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
        let without_prefix = parse_private_key(DEV_KEY.trim_start_matches("0x")).unwrap();
        assert_eq!(signer.address(), without_prefix.address());

        assert!(parse_private_key("0x1234").is_err());
        assert!(parse_private_key("").is_err());
    }

    #[test]
    fn test_sign_transaction_hash_matches_raw_bytes() {
        let signer = parse_private_key(DEV_KEY).unwrap();
        let tx = TxEip1559 {
            chain_id: 11155111,
            nonce: 7,
            gas_limit: 500_000,
            max_fee_per_gas: 30_000_000_000,
            max_priority_fee_per_gas: 1_000_000_000,
            to: TxKind::Create,
            value: U256::ZERO,
            access_list: Default::default(),
            input: Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]),
        };

        let (raw, hash) = sign_transaction(&signer, tx).unwrap();

        // EIP-1559 envelopes are type-prefixed.
        assert_eq!(raw[0], 0x02);
        assert_eq!(keccak256(&raw), hash);
    }

    #[test]
    fn test_fees_from_base_fee() {
        let fees = Fees::from_base_fee(10, 2);
        assert_eq!(fees.max_fee_per_gas, 22);
        assert_eq!(fees.max_priority_fee_per_gas, 2);
    }

    #[test]
    fn test_with_buffer() {
        assert_eq!(with_buffer(100_000, 20), 120_000);
        assert_eq!(with_buffer(100_000, 0), 100_000);
        assert_eq!(with_buffer(u64::MAX, 20), u64::MAX);
    }

    #[test]
    fn test_receipt_from_rpc() {
        let raw: RpcReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": format!("0x{}", "11".repeat(32)),
            "contractAddress": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "blockNumber": "0x10",
            "gasUsed": "0x5208",
            "status": "0x1",
            "logs": []
        }))
        .unwrap();
        let receipt = Receipt::from(raw);
        assert!(receipt.success);
        assert_eq!(receipt.block_number, 16);
        assert_eq!(receipt.gas_used, 21000);
        assert!(receipt.contract_address.is_some());

        let reverted: RpcReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": format!("0x{}", "22".repeat(32)),
            "contractAddress": null,
            "blockNumber": "0x11",
            "gasUsed": "0x5208",
            "status": "0x0"
        }))
        .unwrap();
        assert!(!Receipt::from(reverted).success);
    }

    #[tokio::test]
    async fn test_signers_in_configuration_order() {
        let first = parse_private_key(DEV_KEY).unwrap();
        let second = PrivateKeySigner::random();
        let expected = vec![first.address(), second.address()];

        let client =
            RpcChainClient::new("http://127.0.0.1:1", vec![first, second], rpc::DEFAULT_TIMEOUT)
                .unwrap();

        assert_eq!(client.signers().await.unwrap(), expected);
        assert!(matches!(
            client.signer(Address::ZERO),
            Err(DeployError::UnknownSigner(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connectivity_error() {
        let client = RpcChainClient::new(
            "http://127.0.0.1:1",
            vec![PrivateKeySigner::random()],
            Duration::from_millis(500),
        )
        .unwrap();

        let err = client.balance(Address::ZERO).await.unwrap_err();
        assert!(matches!(err, DeployError::Connectivity { .. }));
    }
}
