//! Source verification against an Etherscan-compatible explorer.
//!
//! Verification is best effort: every failure is contained here, logged together
//! with a command the operator can run later, and never affects the deployment
//! records or the exit status.

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, Bytes};
use anyhow::Result;
use backon::{ConstantBuilder, Retryable};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    ConstructorArg, ContractFactory, DeploymentResult, TargetState, rpc::create_client,
};

/// Interval between `checkverifystatus` polls.
pub const DEFAULT_STATUS_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Number of status polls before giving up on a queued submission.
pub const DEFAULT_MAX_STATUS_POLLS: usize = 12;

/// Why a contract could not be verified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationFailure {
    #[error("contract is already verified")]
    AlreadyVerified,

    #[error("explorer rate limit reached")]
    RateLimited,

    #[error("explorer has not indexed the contract yet")]
    NotIndexed,

    /// No standard-JSON compiler input is available for the contract.
    #[error("no compiler input available for the contract")]
    MissingSource,

    #[error("no explorer API key configured")]
    MissingApiKey,

    #[error("verification still pending on the explorer")]
    Pending,

    #[error("explorer rejected the submission: {0}")]
    Rejected(String),

    #[error("failed to reach explorer: {0}")]
    Transport(String),
}

impl VerificationFailure {
    /// Classify an explorer error message.
    pub(crate) fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("already verified") {
            Self::AlreadyVerified
        } else if lower.contains("rate limit") || lower.contains("max calls") {
            Self::RateLimited
        } else if lower.contains("unable to locate contractcode")
            || lower.contains("does not have bytecode")
            || lower.contains("not found")
        {
            Self::NotIndexed
        } else if lower.contains("pending in queue") {
            Self::Pending
        } else {
            Self::Rejected(message.to_string())
        }
    }
}

/// Result of verifying one contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    Failed(VerificationFailure),
}

impl VerificationOutcome {
    pub fn state(&self) -> TargetState {
        match self {
            Self::Verified => TargetState::Verified,
            Self::Failed(_) => TargetState::VerificationFailed,
        }
    }
}

/// Standard-JSON compiler input of a contract.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilerInput {
    /// Full compiler version without the `v` prefix, e.g. `0.8.19+commit.7dd6d404`.
    pub compiler_version: String,
    pub standard_json: Value,
}

/// Everything needed to verify one deployed contract.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationRequest {
    pub label: String,
    pub address: Address,
    /// `source:Name` when the source file is known, otherwise the bare name.
    pub contract: String,
    pub chain_id: u64,
    pub args: Vec<ConstructorArg>,
    pub encoded_args: Bytes,
    pub source: Option<CompilerInput>,
}

impl VerificationRequest {
    /// Build the request for a confirmed deployment of `factory`.
    pub fn for_deployment(
        result: &DeploymentResult,
        factory: &ContractFactory,
        chain_id: u64,
    ) -> Self {
        Self {
            label: result.label.clone(),
            address: result.contract_address,
            contract: factory.fully_qualified_name(),
            chain_id,
            args: result.args.clone(),
            encoded_args: result.encoded_args.clone(),
            source: compiler_input(factory),
        }
    }

    /// Build a request for a contract deployed in an earlier run.
    pub fn for_address(
        address: Address,
        factory: &ContractFactory,
        args: Vec<ConstructorArg>,
        chain_id: u64,
    ) -> Result<Self, crate::DeployError> {
        let encoded_args = factory.encode_args(&args)?;
        Ok(Self {
            label: factory.name.clone(),
            address,
            contract: factory.fully_qualified_name(),
            chain_id,
            args,
            encoded_args,
            source: compiler_input(factory),
        })
    }
}

fn compiler_input(factory: &ContractFactory) -> Option<CompilerInput> {
    match factory.load_build_info() {
        Ok(info) => info.map(|info| CompilerInput {
            compiler_version: info.solc_long_version,
            standard_json: info.input,
        }),
        Err(e) => {
            tracing::warn!(contract = %factory.name, error = %e, "Build info unavailable");
            None
        }
    }
}

/// An explorer accepting source verification requests.
pub trait VerificationService: Send + Sync {
    /// Submit `request` and wait for the explorer's verdict.
    fn submit(
        &self,
        request: &VerificationRequest,
    ) -> impl Future<Output = Result<(), VerificationFailure>> + Send;
}

#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

impl EtherscanResponse {
    fn result_text(&self) -> String {
        match &self.result {
            Value::String(s) => s.clone(),
            Value::Null => self.message.clone(),
            other => other.to_string(),
        }
    }
}

/// Etherscan v2 (multichain) verification client.
#[derive(Debug, Clone)]
pub struct EtherscanVerifier {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    poll_interval: Duration,
    max_polls: usize,
}

impl EtherscanVerifier {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: create_client(timeout)?,
            api_url: api_url.into(),
            api_key: api_key.into(),
            poll_interval: DEFAULT_STATUS_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_STATUS_POLLS,
        })
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: usize) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    async fn call(
        &self,
        chain_id: u64,
        form: &[(&str, String)],
    ) -> Result<EtherscanResponse, VerificationFailure> {
        let response = self
            .client
            .post(&self.api_url)
            .query(&[("chainid", chain_id.to_string())])
            .form(form)
            .send()
            .await
            .map_err(|e| VerificationFailure::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(VerificationFailure::RateLimited);
        }
        if !response.status().is_success() {
            return Err(VerificationFailure::Transport(format!(
                "HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| VerificationFailure::Transport(e.to_string()))
    }

    /// One `checkverifystatus` round trip. `Pending` while the job is queued.
    async fn check_status(&self, chain_id: u64, guid: &str) -> Result<(), VerificationFailure> {
        let form = [
            ("apikey", self.api_key.clone()),
            ("module", "contract".to_string()),
            ("action", "checkverifystatus".to_string()),
            ("guid", guid.to_string()),
        ];
        let response = self.call(chain_id, &form).await?;
        parse_status(&response)
    }
}

/// Form fields of a `verifysourcecode` submission.
fn submission_form(
    request: &VerificationRequest,
    source: &CompilerInput,
    api_key: &str,
) -> Vec<(&'static str, String)> {
    vec![
        ("apikey", api_key.to_string()),
        ("module", "contract".to_string()),
        ("action", "verifysourcecode".to_string()),
        ("contractaddress", format!("{:#x}", request.address)),
        ("sourceCode", source.standard_json.to_string()),
        ("codeformat", "solidity-standard-json-input".to_string()),
        ("contractname", request.contract.clone()),
        ("compilerversion", format!("v{}", source.compiler_version)),
        // Field name as spelled by the Etherscan API.
        ("constructorArguements", hex::encode(&request.encoded_args)),
    ]
}

fn parse_status(response: &EtherscanResponse) -> Result<(), VerificationFailure> {
    let result = response.result_text();
    if response.status == "1" || result.to_lowercase().starts_with("pass") {
        Ok(())
    } else {
        Err(VerificationFailure::classify(&result))
    }
}

impl VerificationService for EtherscanVerifier {
    async fn submit(&self, request: &VerificationRequest) -> Result<(), VerificationFailure> {
        let source = request
            .source
            .as_ref()
            .ok_or(VerificationFailure::MissingSource)?;

        let form = submission_form(request, source, &self.api_key);
        let response = self.call(request.chain_id, &form).await?;
        if response.status != "1" {
            return Err(VerificationFailure::classify(&response.result_text()));
        }

        let guid = response.result_text();
        tracing::debug!(address = %request.address, %guid, "Verification submitted");

        (|| self.check_status(request.chain_id, &guid))
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.poll_interval)
                    .with_max_times(self.max_polls),
            )
            .when(|e| *e == VerificationFailure::Pending)
            .notify(|_, delay| {
                tracing::debug!(%guid, ?delay, "Verification pending in queue");
            })
            .await
    }
}

/// Command the operator can run to verify a contract by hand.
pub fn manual_command(network: &str, request: &VerificationRequest) -> String {
    let mut words = vec![
        "kiln".to_string(),
        "verify".to_string(),
        "--network".to_string(),
        network.to_string(),
        request.address.to_string(),
        request.contract.clone(),
    ];
    words.extend(request.args.iter().map(ToString::to_string));
    shell_words::join(words)
}

/// Outcome of one contract's verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub label: String,
    pub address: Address,
    pub outcome: VerificationOutcome,
    /// Set when the contract still needs manual verification.
    pub manual_command: Option<String>,
}

/// Verifies deployed contracts one by one after a settling delay.
pub struct VerificationSubmitter<V> {
    /// `None` runs in manual-only mode.
    service: Option<V>,
    network: String,
    delay: Duration,
}

impl<V: VerificationService> VerificationSubmitter<V> {
    pub fn new(service: V, network: impl Into<String>, delay: Duration) -> Self {
        Self {
            service: Some(service),
            network: network.into(),
            delay,
        }
    }

    /// Submitter that only prints manual commands.
    pub fn manual_only(network: impl Into<String>) -> Self {
        Self {
            service: None,
            network: network.into(),
            delay: Duration::ZERO,
        }
    }

    /// Verify every request in order. Never fails; each outcome is reported.
    pub async fn verify_all(&self, requests: &[VerificationRequest]) -> Vec<VerificationReport> {
        if requests.is_empty() {
            return Vec::new();
        }

        if self.service.is_none() {
            tracing::warn!(
                network = %self.network,
                "No explorer API key configured, verify the contracts manually"
            );
        } else if !self.delay.is_zero() {
            tracing::info!(
                delay_secs = self.delay.as_secs(),
                "Waiting for the explorer to index the contracts"
            );
            tokio::time::sleep(self.delay).await;
        }

        let mut reports = Vec::with_capacity(requests.len());
        for request in requests {
            reports.push(self.verify_one(request).await);
        }
        reports
    }

    /// Verify a single contract without any delay.
    pub async fn verify_one(&self, request: &VerificationRequest) -> VerificationReport {
        let outcome = match &self.service {
            Some(service) => {
                tracing::info!(
                    label = %request.label,
                    address = %request.address,
                    state = %TargetState::VerificationRequested,
                    "Verifying contract"
                );
                match service.submit(request).await {
                    Ok(()) => VerificationOutcome::Verified,
                    Err(e) => VerificationOutcome::Failed(e),
                }
            }
            None => VerificationOutcome::Failed(VerificationFailure::MissingApiKey),
        };

        let manual_command = match &outcome {
            VerificationOutcome::Verified => {
                tracing::info!(
                    label = %request.label,
                    address = %request.address,
                    state = %outcome.state(),
                    "Contract verified"
                );
                None
            }
            VerificationOutcome::Failed(failure) => {
                let command = manual_command(&self.network, request);
                tracing::warn!(
                    label = %request.label,
                    address = %request.address,
                    state = %outcome.state(),
                    reason = %failure,
                    "Automatic verification failed, verify manually with: {}",
                    command
                );
                Some(command)
            }
        };

        VerificationReport {
            label: request.label.clone(),
            address: request.address,
            outcome,
            manual_command,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use alloy_core::primitives::address;

    use super::*;

    const STORAGE: Address = address!("0x5FbDB2315678afecb367f032d93F642f64180aa3");
    const OWNER: Address = address!("0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512");

    fn request(label: &str, address: Address) -> VerificationRequest {
        VerificationRequest {
            label: label.to_string(),
            address,
            contract: format!("contracts/{label}.sol:{label}"),
            chain_id: 11155111,
            args: Vec::new(),
            encoded_args: Bytes::new(),
            source: Some(CompilerInput {
                compiler_version: "0.8.19+commit.7dd6d404".to_string(),
                standard_json: serde_json::json!({"language": "Solidity", "sources": {}}),
            }),
        }
    }

    /// Replays scripted answers and records which addresses were submitted.
    struct ScriptedExplorer {
        answers: Mutex<Vec<Result<(), VerificationFailure>>>,
        submitted: Mutex<Vec<Address>>,
    }

    impl ScriptedExplorer {
        fn new(answers: Vec<Result<(), VerificationFailure>>) -> Self {
            Self {
                answers: Mutex::new(answers),
                submitted: Mutex::new(Vec::new()),
            }
        }
    }

    impl VerificationService for ScriptedExplorer {
        async fn submit(&self, request: &VerificationRequest) -> Result<(), VerificationFailure> {
            self.submitted.lock().unwrap().push(request.address);
            self.answers.lock().unwrap().remove(0)
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_block_next_contract() {
        let explorer = ScriptedExplorer::new(vec![Err(VerificationFailure::AlreadyVerified), Ok(())]);
        let submitter = VerificationSubmitter::new(explorer, "sepolia", Duration::ZERO);

        let reports = submitter
            .verify_all(&[request("Storage", STORAGE), request("Owner", OWNER)])
            .await;

        assert_eq!(reports.len(), 2);
        assert_eq!(
            reports[0].outcome,
            VerificationOutcome::Failed(VerificationFailure::AlreadyVerified)
        );
        let command = reports[0].manual_command.as_deref().unwrap();
        assert!(command.starts_with("kiln verify --network sepolia "));
        assert!(command.contains("contracts/Storage.sol:Storage"));

        assert_eq!(reports[1].outcome, VerificationOutcome::Verified);
        assert!(reports[1].manual_command.is_none());
        assert_eq!(
            *submitter.service.as_ref().unwrap().submitted.lock().unwrap(),
            vec![STORAGE, OWNER]
        );
    }

    #[tokio::test]
    async fn test_manual_only_mode() {
        let submitter = VerificationSubmitter::<ScriptedExplorer>::manual_only("sepolia");

        let reports = submitter.verify_all(&[request("Storage", STORAGE)]).await;

        assert_eq!(
            reports[0].outcome,
            VerificationOutcome::Failed(VerificationFailure::MissingApiKey)
        );
        assert!(reports[0].manual_command.is_some());
        assert_eq!(reports[0].outcome.state(), TargetState::VerificationFailed);
    }

    #[tokio::test]
    async fn test_nothing_to_verify() {
        let explorer = ScriptedExplorer::new(Vec::new());
        let submitter = VerificationSubmitter::new(explorer, "sepolia", Duration::from_secs(3600));
        // Returns immediately, without sleeping through the delay.
        assert!(submitter.verify_all(&[]).await.is_empty());
    }

    #[test]
    fn test_manual_command_quotes_args() {
        let mut auction = request("Subasta", STORAGE);
        auction.args = vec![ConstructorArg::from("Obra de Arte Digital"), ConstructorArg::Int(24)];

        let command = manual_command("sepolia", &auction);
        let address = STORAGE.to_string();

        assert_eq!(
            shell_words::split(&command).unwrap(),
            vec![
                "kiln",
                "verify",
                "--network",
                "sepolia",
                address.as_str(),
                "contracts/Subasta.sol:Subasta",
                "Obra de Arte Digital",
                "24",
            ]
        );
        assert!(command.contains("'Obra de Arte Digital'"));
    }

    #[test]
    fn test_manual_command_args_encode_unchanged() {
        use alloy_core::{dyn_abi::DynSolValue, primitives::U256};

        let auction = crate::artifact::tests::factory(
            "Subasta",
            &[("description", "string"), ("hours", "uint256")],
        );
        let description = "  \"Obra\" de Arte  ";
        let deployed = VerificationRequest::for_address(
            STORAGE,
            &auction,
            vec![ConstructorArg::from(description), ConstructorArg::Int(24)],
            11155111,
        )
        .unwrap();

        // Re-run the printed command's arguments the way `kiln verify` parses them.
        let words = shell_words::split(&manual_command("sepolia", &deployed)).unwrap();
        let args = words[6..].iter().map(|a| ConstructorArg::from(a.as_str())).collect();
        let retried = VerificationRequest::for_address(STORAGE, &auction, args, 11155111).unwrap();

        let expected = DynSolValue::Tuple(vec![
            DynSolValue::String(description.to_string()),
            DynSolValue::Uint(U256::from(24), 256),
        ])
        .abi_encode_params();
        assert_eq!(&deployed.encoded_args[..], expected.as_slice());
        assert_eq!(retried.encoded_args, deployed.encoded_args);
    }

    #[test]
    fn test_classify_explorer_messages() {
        use VerificationFailure::*;

        assert_eq!(VerificationFailure::classify("Contract source code already verified"), AlreadyVerified);
        assert_eq!(VerificationFailure::classify("Already Verified"), AlreadyVerified);
        assert_eq!(VerificationFailure::classify("Max rate limit reached"), RateLimited);
        assert_eq!(
            VerificationFailure::classify("Unable to locate ContractCode at 0x5fbd"),
            NotIndexed
        );
        assert_eq!(VerificationFailure::classify("Pending in queue"), Pending);
        assert_eq!(
            VerificationFailure::classify("Fail - Unable to verify"),
            Rejected("Fail - Unable to verify".to_string())
        );
    }

    #[test]
    fn test_parse_status() {
        let pass: EtherscanResponse = serde_json::from_value(serde_json::json!({
            "status": "1", "message": "OK", "result": "Pass - Verified"
        }))
        .unwrap();
        assert_eq!(parse_status(&pass), Ok(()));

        let pending: EtherscanResponse = serde_json::from_value(serde_json::json!({
            "status": "0", "message": "NOTOK", "result": "Pending in queue"
        }))
        .unwrap();
        assert_eq!(parse_status(&pending), Err(VerificationFailure::Pending));

        let already: EtherscanResponse = serde_json::from_value(serde_json::json!({
            "status": "0", "message": "NOTOK", "result": "Already Verified"
        }))
        .unwrap();
        assert_eq!(parse_status(&already), Err(VerificationFailure::AlreadyVerified));
    }

    #[test]
    fn test_submission_form() {
        let mut req = request("Storage", STORAGE);
        req.encoded_args = Bytes::from(vec![0x00, 0x2a]);
        let source = req.source.clone().unwrap();

        let form = submission_form(&req, &source, "KEY");
        let field = |name: &str| {
            form.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.clone())
                .unwrap()
        };

        assert_eq!(field("action"), "verifysourcecode");
        assert_eq!(field("contractaddress"), "0x5fbdb2315678afecb367f032d93f642f64180aa3");
        assert_eq!(field("contractname"), "contracts/Storage.sol:Storage");
        assert_eq!(field("compilerversion"), "v0.8.19+commit.7dd6d404");
        assert_eq!(field("constructorArguements"), "002a");
        assert_eq!(field("codeformat"), "solidity-standard-json-input");
        let input: Value = serde_json::from_str(&field("sourceCode")).unwrap();
        assert_eq!(input["language"], "Solidity");
    }

    #[tokio::test]
    async fn test_missing_source_skips_http() {
        // Unroutable endpoint: reaching the network would be a transport failure.
        let verifier =
            EtherscanVerifier::new("http://127.0.0.1:9", "KEY", Duration::from_secs(1)).unwrap();
        let mut req = request("Storage", STORAGE);
        req.source = None;

        assert_eq!(verifier.submit(&req).await, Err(VerificationFailure::MissingSource));
    }
}
