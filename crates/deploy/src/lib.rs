//! kiln-deploy - Contract deployment library for EVM networks.
//!
//! This crate deploys compiled contracts from one or more local signers, records the
//! resulting addresses per network and submits the sources for explorer verification.

mod artifact;
pub use artifact::{
    BuildInfo, ConstructorArg, ContractFactory, ContractHandle, ContractRegistry,
    PendingDeployment,
};

mod chain;
pub use chain::{
    ChainClient, DEFAULT_GAS_BUFFER_PERCENT, Receipt, RpcChainClient, parse_private_key,
};

mod config;
pub use config::{
    Credentials, DEFAULT_CONFIG_FILE, DEFAULT_NETWORK, DeployConfig, NetworkConfig,
    ResolvedCredentials,
};

mod deployer;
pub use deployer::{Deployer, DeploymentResult, DeploymentTarget, TargetState};

mod error;
pub use error::DeployError;

mod info;
pub use info::{ConfigCheck, NetworkInfo, network_info};

mod pipeline;
pub use pipeline::{Pipeline, PipelineReport, summary_table};

mod records;
pub use records::{DeploymentRecordSet, RESERVED_KEYS, RecordStore};

pub mod rpc;

mod verify;
pub use verify::{
    CompilerInput, EtherscanVerifier, VerificationFailure, VerificationOutcome,
    VerificationReport, VerificationRequest, VerificationService, VerificationSubmitter,
    manual_command,
};
