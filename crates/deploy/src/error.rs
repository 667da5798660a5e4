//! Error taxonomy for a deployment run.
//!
//! Every [`DeployError`] variant is fatal: it aborts the run before any further
//! transaction is broadcast. Verification problems are modelled separately by
//! [`crate::VerificationFailure`] and never surface here.

use alloy_core::primitives::{Address, B256};

use crate::rpc::RpcError;

/// A fatal error raised while preparing or executing deployments.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// The RPC endpoint is unreachable or answered in an unexpected way.
    #[error("connectivity error: {context}: {source}")]
    Connectivity {
        context: String,
        #[source]
        source: RpcError,
    },

    /// No signing key is configured.
    #[error("no signer available: configure at least one private key")]
    NoSigners,

    /// A target asked for a deployer that is not one of the configured signers.
    #[error("deployer {0} is not one of the configured signers")]
    UnknownSigner(Address),

    /// The selected deployer cannot pay for gas.
    #[error("deployer {deployer} has zero balance on {network}, fund it before deploying")]
    InsufficientFunds { deployer: Address, network: String },

    /// No compiled artifact exists for the requested contract name.
    #[error("no compiled artifact for contract `{0}`")]
    ArtifactNotFound(String),

    /// The artifacts directory could not be read.
    #[error("failed to load artifacts: {0}")]
    Artifact(String),

    /// Constructor arguments do not match the constructor ABI.
    #[error("invalid constructor arguments for `{contract}`: {reason}")]
    InvalidConstructorArgs { contract: String, reason: String },

    /// The deployment transaction would revert, reverted, or ran out of gas.
    #[error("deployment transaction failed{}: {reason}", .tx_hash.map(|h| format!(" ({h})")).unwrap_or_default())]
    TransactionFailure {
        tx_hash: Option<B256>,
        reason: String,
    },
}

impl DeployError {
    pub(crate) fn connectivity(context: impl Into<String>, source: RpcError) -> Self {
        Self::Connectivity {
            context: context.into(),
            source,
        }
    }

    /// Short machine-friendly name of the error kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connectivity { .. } => "connectivity",
            Self::NoSigners => "no-signers",
            Self::UnknownSigner(_) => "unknown-signer",
            Self::InsufficientFunds { .. } => "insufficient-funds",
            Self::ArtifactNotFound(_) => "artifact-not-found",
            Self::Artifact(_) => "artifact",
            Self::InvalidConstructorArgs { .. } => "invalid-constructor-args",
            Self::TransactionFailure { .. } => "transaction-failure",
        }
    }
}
