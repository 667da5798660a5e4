//! End-to-end runs of the deployment pipeline against an in-process chain and explorer.
//!
//! Artifacts are written to a temporary directory in the Hardhat layout, so the
//! registry, record store and verification requests are exercised as in a real run.

use std::{
    path::Path,
    sync::{Mutex, atomic::AtomicUsize, atomic::Ordering},
    time::Duration,
};

use alloy_core::primitives::{Address, B256, Bytes, U256, keccak256};
use kiln_deploy::{
    ChainClient, ConstructorArg, ContractRegistry, DeployError, Deployer, DeploymentTarget,
    NetworkConfig, Pipeline, Receipt, RecordStore, VerificationFailure, VerificationOutcome,
    VerificationRequest, VerificationService, VerificationSubmitter,
};
use serde_json::{Value, json};
use tempdir::TempDir;

const DEPLOYER: Address = Address::repeat_byte(0xcc);
const BYTECODE: &str = "0x6080604052348015600f57600080fd5b50";

/// Chain with one funded signer; every transaction is mined in its own block.
struct LocalChain {
    balance: U256,
    sent: Mutex<Vec<Bytes>>,
    reverting: Option<usize>,
    receipts: AtomicUsize,
}

impl LocalChain {
    fn funded() -> Self {
        Self {
            balance: U256::from(5u64) * U256::from(10u64).pow(U256::from(17)),
            sent: Mutex::new(Vec::new()),
            reverting: None,
            receipts: AtomicUsize::new(0),
        }
    }

    fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }
}

impl ChainClient for LocalChain {
    async fn signers(&self) -> Result<Vec<Address>, DeployError> {
        Ok(vec![DEPLOYER])
    }

    async fn balance(&self, _address: Address) -> Result<U256, DeployError> {
        Ok(self.balance)
    }

    async fn chain_id(&self) -> Result<u64, DeployError> {
        Ok(11155111)
    }

    async fn send_deployment(&self, _from: Address, init_code: Bytes) -> Result<B256, DeployError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(init_code);
        Ok(B256::with_last_byte(sent.len() as u8))
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        _confirmations: u64,
    ) -> Result<Receipt, DeployError> {
        let index = self.receipts.fetch_add(1, Ordering::SeqCst);
        Ok(Receipt {
            transaction_hash: tx_hash,
            contract_address: Some(Address::from_word(keccak256(tx_hash))),
            block_number: 7_000_000 + index as u64,
            gas_used: 120_000,
            success: self.reverting != Some(index),
        })
    }
}

/// Explorer answering from a script, in submission order.
struct Explorer {
    answers: Mutex<Vec<Result<(), VerificationFailure>>>,
    requests: Mutex<Vec<VerificationRequest>>,
}

impl Explorer {
    fn new(answers: Vec<Result<(), VerificationFailure>>) -> Self {
        Self {
            answers: Mutex::new(answers),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl VerificationService for &Explorer {
    async fn submit(&self, request: &VerificationRequest) -> Result<(), VerificationFailure> {
        self.requests.lock().unwrap().push(request.clone());
        self.answers.lock().unwrap().remove(0)
    }
}

/// Route the pipeline's logs to the test harness, shown for failing tests.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn write_json(path: &Path, value: &Value) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

/// Hardhat artifacts for `Storage`, `Owner` and `Subasta(string,uint256)`.
fn hardhat_artifacts(root: &Path) {
    for (name, inputs) in [
        ("Storage", json!([])),
        ("Owner", json!([])),
        (
            "Subasta",
            json!([
                {"name": "_descripcion", "type": "string", "internalType": "string"},
                {"name": "_duracionHoras", "type": "uint256", "internalType": "uint256"}
            ]),
        ),
    ] {
        let dir = root.join(format!("contracts/{name}.sol"));
        write_json(
            &dir.join(format!("{name}.json")),
            &json!({
                "_format": "hh-sol-artifact-1",
                "contractName": name,
                "sourceName": format!("contracts/{name}.sol"),
                "abi": [{"type": "constructor", "inputs": inputs, "stateMutability": "nonpayable"}],
                "bytecode": BYTECODE,
                "deployedBytecode": "0x00",
                "linkReferences": {},
                "deployedLinkReferences": {}
            }),
        );
        write_json(
            &dir.join(format!("{name}.dbg.json")),
            &json!({"_format": "hh-sol-dbg-1", "buildInfo": "../../build-info/f00d.json"}),
        );
    }
    write_json(
        &root.join("build-info/f00d.json"),
        &json!({
            "solcLongVersion": "0.8.19+commit.7dd6d404",
            "input": {"language": "Solidity", "sources": {}, "settings": {}}
        }),
    );
}

fn sepolia() -> NetworkConfig {
    NetworkConfig {
        chain_id: Some(11155111),
        explorer_url: Some("https://sepolia.etherscan.io".to_string()),
        verify: true,
        ..NetworkConfig::named("sepolia")
    }
}

struct Fixture {
    _dir: TempDir,
    registry: ContractRegistry,
    records: RecordStore,
}

fn fixture() -> Fixture {
    init_tracing();
    let dir = TempDir::new("kiln-pipeline").unwrap();
    hardhat_artifacts(&dir.path().join("artifacts"));
    let registry = ContractRegistry::load(&dir.path().join("artifacts")).unwrap();
    let records = RecordStore::new(dir.path());
    Fixture {
        _dir: dir,
        registry,
        records,
    }
}

#[tokio::test]
async fn test_deploy_record_and_verify() {
    let fixture = fixture();
    let explorer = Explorer::new(vec![Err(VerificationFailure::AlreadyVerified), Ok(())]);
    let pipeline = Pipeline::new(
        Deployer::new(LocalChain::funded(), fixture.registry, sepolia()),
        fixture.records.clone(),
        Some(VerificationSubmitter::new(&explorer, "sepolia", Duration::ZERO)),
    );

    let report = pipeline
        .run(&[DeploymentTarget::new("Storage"), DeploymentTarget::new("Owner")])
        .await
        .unwrap();

    // Deployment and records.
    assert!(report.is_success());
    assert_eq!(report.results.len(), 2);
    let records = fixture.records.load("sepolia").unwrap();
    assert_eq!(records.network, "sepolia");
    assert_eq!(records.deployer, DEPLOYER);
    let labels: Vec<&str> = records.entries.iter().map(|(l, _)| l.as_str()).collect();
    assert_eq!(labels, vec!["Storage", "Owner"]);
    assert_eq!(records.get("Owner"), Some(report.results[1].contract_address));

    // The first verification fails without blocking the second.
    assert_eq!(
        report.verification[0].outcome,
        VerificationOutcome::Failed(VerificationFailure::AlreadyVerified)
    );
    assert!(
        report.verification[0]
            .manual_command
            .as_deref()
            .unwrap()
            .contains("kiln verify --network sepolia")
    );
    assert_eq!(report.verification[1].outcome, VerificationOutcome::Verified);

    let requests = explorer.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].contract, "contracts/Storage.sol:Storage");
    assert_eq!(requests[0].chain_id, 11155111);
    let source = requests[0].source.as_ref().expect("build info is linked");
    assert_eq!(source.compiler_version, "0.8.19+commit.7dd6d404");
}

#[tokio::test]
async fn test_constructor_args_reach_chain_and_explorer() {
    let fixture = fixture();
    let explorer = Explorer::new(vec![Ok(())]);
    let args = vec![ConstructorArg::from("Obra de Arte Digital"), ConstructorArg::Int(24)];
    let pipeline = Pipeline::new(
        Deployer::new(LocalChain::funded(), fixture.registry.clone(), sepolia()),
        fixture.records.clone(),
        Some(VerificationSubmitter::new(&explorer, "sepolia", Duration::ZERO)),
    );

    let report = pipeline
        .run(&[DeploymentTarget::new("Subasta")
            .with_args(args.clone())
            .with_label("Auction")])
        .await
        .unwrap();

    let expected = fixture
        .registry
        .resolve("Subasta")
        .unwrap()
        .encode_args(&args)
        .unwrap();
    let result = &report.results[0];
    assert_eq!(result.args, args);
    assert_eq!(result.encoded_args, expected);

    // The creation payload ends with the encoded arguments.
    let sent = pipeline.deployer().client().sent();
    assert!(sent[0].ends_with(&expected));

    let requests = explorer.requests.lock().unwrap();
    assert_eq!(requests[0].label, "Auction");
    assert_eq!(requests[0].args, args);
    assert_eq!(requests[0].encoded_args, expected);

    let records = fixture.records.load("sepolia").unwrap();
    assert!(records.get("Auction").is_some());
}

#[tokio::test]
async fn test_failure_aborts_remaining_targets() {
    let fixture = fixture();
    let mut chain = LocalChain::funded();
    chain.reverting = Some(0);
    let explorer = Explorer::new(Vec::new());
    let pipeline = Pipeline::new(
        Deployer::new(chain, fixture.registry, sepolia()),
        fixture.records.clone(),
        Some(VerificationSubmitter::new(&explorer, "sepolia", Duration::ZERO)),
    );

    let err = pipeline
        .run(&[DeploymentTarget::new("Storage"), DeploymentTarget::new("Owner")])
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::TransactionFailure { .. }));
    assert_eq!(pipeline.deployer().client().sent().len(), 1);
    assert!(!fixture.records.path_for("sepolia").exists());
    assert!(explorer.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unfunded_deployer_sends_nothing() {
    let fixture = fixture();
    let mut chain = LocalChain::funded();
    chain.balance = U256::ZERO;
    let pipeline: Pipeline<_, &Explorer> = Pipeline::new(
        Deployer::new(chain, fixture.registry, sepolia()),
        fixture.records.clone(),
        None,
    );

    let err = pipeline
        .run(&[DeploymentTarget::new("Storage")])
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::InsufficientFunds { .. }));
    assert!(pipeline.deployer().client().sent().is_empty());
}

#[tokio::test]
async fn test_manual_only_verification() {
    let fixture = fixture();
    let pipeline = Pipeline::new(
        Deployer::new(LocalChain::funded(), fixture.registry, sepolia()),
        fixture.records.clone(),
        Some(VerificationSubmitter::<&Explorer>::manual_only("sepolia")),
    );

    let report = pipeline.run(&[DeploymentTarget::new("Storage")]).await.unwrap();

    assert!(report.is_success());
    assert_eq!(
        report.verification[0].outcome,
        VerificationOutcome::Failed(VerificationFailure::MissingApiKey)
    );
}
