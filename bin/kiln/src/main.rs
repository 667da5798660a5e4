//! kiln deploys compiled contracts to an EVM network, records their addresses and
//! submits them for explorer verification.

mod cli;

use std::{path::PathBuf, time::Duration};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Command};
use kiln_deploy::{
    ChainClient, ConfigCheck, ConstructorArg, ContractRegistry, DEFAULT_CONFIG_FILE,
    DeployConfig, Deployer, EtherscanVerifier, NetworkConfig, Pipeline, RecordStore,
    ResolvedCredentials, RpcChainClient, VerificationOutcome, VerificationRequest,
    VerificationSubmitter, network_info,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let mut config = load_config(cli.config.clone())?;
    if let Some(network) = &cli.network {
        config.network = network.clone();
    }

    match cli.command.clone() {
        Command::Deploy {
            skip_verify,
            verify_delay,
        } => deploy(&cli, &config, skip_verify, verify_delay).await,
        Command::Verify {
            address,
            contract,
            args,
        } => verify(&cli, &config, address, &contract, args).await,
        Command::Info => info(&cli, &config).await,
        Command::CheckConfig => check_config(&cli, &config).await,
    }
}

/// Load the given configuration file, or `kiln.toml` when present.
fn load_config(path: Option<PathBuf>) -> Result<DeployConfig> {
    let path = path.or_else(|| {
        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        default.exists().then_some(default)
    });
    DeployConfig::load(path.as_deref())
}

fn chain_client(
    config: &DeployConfig,
    credentials: &ResolvedCredentials,
) -> Result<RpcChainClient> {
    Ok(RpcChainClient::new(
        credentials.rpc_url.as_str(),
        credentials.signers.clone(),
        config.rpc_timeout(),
    )?
    .with_gas_buffer_percent(config.gas_buffer_percent))
}

fn submitter(
    config: &DeployConfig,
    network: &NetworkConfig,
    api_key: Option<&str>,
    delay: Duration,
) -> Result<VerificationSubmitter<EtherscanVerifier>> {
    Ok(match api_key {
        Some(key) => VerificationSubmitter::new(
            EtherscanVerifier::new(&network.explorer_api_url, key, config.rpc_timeout())?,
            &network.name,
            delay,
        ),
        None => VerificationSubmitter::manual_only(&network.name),
    })
}

async fn deploy(
    cli: &Cli,
    config: &DeployConfig,
    skip_verify: bool,
    verify_delay: Option<u64>,
) -> Result<()> {
    config.validate_targets()?;
    let network = config.selected_network()?;
    let credentials = cli.secrets.credentials().resolve(&network)?;
    let registry = ContractRegistry::load(&config.artifacts)?;
    if registry.is_empty() {
        tracing::warn!(
            artifacts = %config.artifacts.display(),
            "No deployable contracts found, compile the contracts first"
        );
    }

    tracing::info!(
        network = %network.name,
        rpc = %credentials.rpc_endpoint(),
        artifacts = %config.artifacts.display(),
        targets = config.targets.len(),
        "Loaded deployment configuration"
    );

    let verifier = if skip_verify || !network.verify {
        None
    } else {
        let delay = verify_delay
            .map(Duration::from_secs)
            .unwrap_or_else(|| network.verify_delay());
        Some(submitter(
            config,
            &network,
            credentials.etherscan_api_key.as_deref(),
            delay,
        )?)
    };

    let client = chain_client(config, &credentials)?;
    let pipeline = Pipeline::new(
        Deployer::new(client, registry, network),
        RecordStore::new(&config.records_dir),
        verifier,
    );

    let report = pipeline.run(&config.targets).await.inspect_err(|e| {
        tracing::error!(kind = e.kind(), "Deployment aborted");
    })?;

    if let Some(e) = report.record_error {
        return Err(e.context("Contracts were deployed but their addresses could not be recorded"));
    }

    tracing::info!(
        network = %report.network,
        contracts = report.results.len(),
        records = ?report.records_path,
        "Deployment complete"
    );
    Ok(())
}

/// Verify one contract. Explorer failures are reported, not returned.
async fn verify(
    cli: &Cli,
    config: &DeployConfig,
    address: Address,
    contract: &str,
    args: Vec<String>,
) -> Result<()> {
    let network = config.selected_network()?;
    let registry = ContractRegistry::load(&config.artifacts)?;
    let factory = registry.resolve(contract)?;
    let args = args.iter().map(|a| ConstructorArg::from(a.as_str())).collect();

    let chain_id = match network.chain_id {
        Some(chain_id) => chain_id,
        None => {
            let credentials = cli.secrets.credentials();
            let rpc_url = credentials
                .rpc_url_for(&network, |key| std::env::var(key).ok())
                .with_context(|| {
                    format!(
                        "Network `{}` has no chain_id configured and no RPC URL to query it",
                        network.name
                    )
                })?;
            RpcChainClient::new(rpc_url, Vec::new(), config.rpc_timeout())?
                .chain_id()
                .await?
        }
    };

    let request = VerificationRequest::for_address(address, factory, args, chain_id)?;
    let api_key = cli
        .secrets
        .etherscan_api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty());
    let report = submitter(config, &network, api_key, Duration::ZERO)?
        .verify_one(&request)
        .await;

    match (&report.outcome, &report.manual_command) {
        (VerificationOutcome::Verified, _) => println!("{} verified at {}", contract, address),
        (VerificationOutcome::Failed(failure), Some(command)) => {
            println!("{} not verified: {}", contract, failure);
            println!("Retry with: {}", command);
        }
        (VerificationOutcome::Failed(failure), None) => {
            println!("{} not verified: {}", contract, failure)
        }
    }
    Ok(())
}

async fn info(cli: &Cli, config: &DeployConfig) -> Result<()> {
    let network = config.selected_network()?;
    let credentials = cli.secrets.credentials().resolve(&network)?;
    let client = chain_client(config, &credentials)?;

    let info = network_info(&client, &network).await?;
    println!("{}", info);
    Ok(())
}

async fn check_config(cli: &Cli, config: &DeployConfig) -> Result<()> {
    let network = config.selected_network()?;
    let credentials = cli.secrets.credentials();

    let check = ConfigCheck::new(&credentials, &network, |key| std::env::var(key).ok());
    println!("{}", check);
    if !check.is_ready() {
        anyhow::bail!("Configuration for `{}` is incomplete", network.name);
    }

    println!();
    info(cli, config).await
}
