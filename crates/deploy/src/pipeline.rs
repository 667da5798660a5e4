//! The full run: deploy every target, record the addresses, then verify.

use std::path::PathBuf;

use alloy_core::primitives::Address;
use comfy_table::{Table, presets::UTF8_FULL};

use crate::{
    ChainClient, DeployError, Deployer, DeploymentRecordSet, DeploymentResult, DeploymentTarget,
    RecordStore, TargetState, VerificationReport, VerificationRequest, VerificationService,
    VerificationSubmitter,
};

/// What a completed run produced.
#[derive(Debug)]
pub struct PipelineReport {
    pub network: String,
    pub chain_id: u64,
    /// Default signer, as written to the record file.
    pub deployer: Address,
    pub results: Vec<DeploymentResult>,
    /// Where the records were written, when the write succeeded.
    pub records_path: Option<PathBuf>,
    /// Why the records could not be written. The contracts are deployed regardless.
    pub record_error: Option<anyhow::Error>,
    /// Empty when verification is disabled.
    pub verification: Vec<VerificationReport>,
}

impl PipelineReport {
    /// Whether every contract is both deployed and recorded.
    pub fn is_success(&self) -> bool {
        self.record_error.is_none()
    }

    pub fn summary_table(&self) -> Table {
        summary_table(&self.results)
    }
}

/// Deployed contracts as a table.
pub fn summary_table(results: &[DeploymentResult]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Contract", "Address", "Deployer", "Block", "Gas used"]);
    for result in results {
        table.add_row(vec![
            result.label.clone(),
            result.contract_address.to_string(),
            result.deployer_address.to_string(),
            result.block_number.to_string(),
            result.gas_used.to_string(),
        ]);
    }
    table
}

/// Deploys, records and verifies a batch of targets on one network.
pub struct Pipeline<C, V> {
    deployer: Deployer<C>,
    records: RecordStore,
    /// `None` when verification is disabled for this run.
    verifier: Option<VerificationSubmitter<V>>,
}

impl<C: ChainClient, V: VerificationService> Pipeline<C, V> {
    pub fn new(
        deployer: Deployer<C>,
        records: RecordStore,
        verifier: Option<VerificationSubmitter<V>>,
    ) -> Self {
        Self {
            deployer,
            records,
            verifier,
        }
    }

    pub fn deployer(&self) -> &Deployer<C> {
        &self.deployer
    }

    /// Run the whole flow.
    ///
    /// Fails only on fatal deployment errors. A failed record write is reported in
    /// [`PipelineReport::record_error`] after verification has still run.
    pub async fn run(&self, targets: &[DeploymentTarget]) -> Result<PipelineReport, DeployError> {
        let network = self.deployer.network().name.clone();
        tracing::info!(%network, targets = targets.len(), "Starting deployment");

        let chain_id = self.deployer.check_chain_id().await?;
        let default_signer = self
            .deployer
            .client()
            .signers()
            .await?
            .first()
            .copied()
            .ok_or(DeployError::NoSigners)?;

        let results = self.deployer.deploy_all(targets).await?;
        tracing::info!("Deployment summary:\n{}", summary_table(&results));

        let record_set = DeploymentRecordSet::new(&network, default_signer, &results);
        let (records_path, record_error) = match self.records.save(&record_set) {
            Ok(path) => {
                for result in &results {
                    tracing::debug!(
                        label = %result.label,
                        state = %TargetState::Recorded,
                        "Deployment recorded"
                    );
                }
                (Some(path), None)
            }
            Err(e) => {
                tracing::error!(
                    error = %format!("{e:#}"),
                    path = %self.records.path_for(&network).display(),
                    "Failed to write deployment records, the contracts below are deployed but unrecorded"
                );
                for result in &results {
                    tracing::error!(
                        label = %result.label,
                        address = %result.contract_address,
                        tx_hash = %result.transaction_hash,
                        "Unrecorded deployment"
                    );
                }
                (None, Some(e))
            }
        };

        let verification = match &self.verifier {
            Some(verifier) => {
                let requests = self.verification_requests(targets, &results, chain_id)?;
                verifier.verify_all(&requests).await
            }
            None => {
                tracing::info!(%network, "Verification disabled");
                Vec::new()
            }
        };

        Ok(PipelineReport {
            network,
            chain_id,
            deployer: default_signer,
            results,
            records_path,
            record_error,
            verification,
        })
    }

    fn verification_requests(
        &self,
        targets: &[DeploymentTarget],
        results: &[DeploymentResult],
        chain_id: u64,
    ) -> Result<Vec<VerificationRequest>, DeployError> {
        targets
            .iter()
            .zip(results)
            .map(|(target, result)| {
                let factory = self.deployer.registry().resolve(&target.contract)?;
                Ok(VerificationRequest::for_deployment(result, factory, chain_id))
            })
            .collect()
    }
}
