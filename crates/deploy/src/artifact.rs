//! Compiled contract artifacts and the registry that turns them into factories.
//!
//! Both Hardhat (`artifacts/contracts/<File>.sol/<Name>.json`) and Foundry
//! (`out/<File>.sol/<Name>.json`) layouts are understood. Hardhat artifacts also
//! carry a pointer to the build-info file holding the standard-JSON compiler input,
//! which is what source verification needs.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue, Specifier},
    json_abi::JsonAbi,
    primitives::{Address, B256, Bytes},
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{DeployError, chain::ChainClient, deployer::DeploymentResult};

/// Directory name Hardhat uses for compiler build-info files.
const BUILD_INFO_DIR: &str = "build-info";

/// Suffix of Hardhat debug files that sit next to each artifact.
const DBG_SUFFIX: &str = ".dbg.json";

/// A constructor argument as written in the configuration file.
///
/// Values stay in their written form until they are coerced against the
/// constructor ABI, so the same list can be re-encoded for verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstructorArg {
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<ConstructorArg>),
}

impl fmt::Display for ConstructorArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match item {
                        Self::Text(s) if s.contains([',', '[', ']', '"']) || s.contains(' ') => {
                            write!(f, "{}", Value::String(s.clone()))?
                        }
                        other => write!(f, "{other}")?,
                    }
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for ConstructorArg {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for ConstructorArg {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Shape shared by Hardhat and Foundry artifact files.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    contract_name: Option<String>,
    source_name: Option<String>,
    abi: JsonAbi,
    bytecode: RawBytecode,
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    /// Hardhat: `"bytecode": "0x6080..."`.
    Hex(String),
    /// Foundry: `"bytecode": {"object": "0x6080...", ...}`.
    Object { object: String },
}

impl RawBytecode {
    fn as_str(&self) -> &str {
        match self {
            Self::Hex(s) => s,
            Self::Object { object } => object,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebugFile {
    build_info: String,
}

/// Compiler input recorded by Hardhat for a compilation job.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    /// Full compiler version, e.g. `0.8.19+commit.7dd6d404`.
    pub solc_long_version: String,
    /// Standard-JSON compiler input.
    pub input: Value,
}

/// A deployable contract: creation bytecode plus the ABI needed to encode its
/// constructor arguments.
#[derive(Debug, Clone)]
pub struct ContractFactory {
    pub name: String,
    /// Source file the contract lives in, e.g. `contracts/Storage.sol`.
    pub source_name: Option<String>,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
    /// Hardhat build-info file, when the artifact points at one.
    pub build_info: Option<PathBuf>,
}

impl ContractFactory {
    /// `source:Name` as expected by explorers, or the bare name when the source is unknown.
    pub fn fully_qualified_name(&self) -> String {
        match &self.source_name {
            Some(source) => format!("{}:{}", source, self.name),
            None => self.name.clone(),
        }
    }

    /// ABI-encode constructor arguments against the constructor inputs.
    ///
    /// Arguments are matched positionally; the result excludes the bytecode.
    pub fn encode_args(&self, args: &[ConstructorArg]) -> Result<Bytes, DeployError> {
        let invalid = |reason: String| DeployError::InvalidConstructorArgs {
            contract: self.name.clone(),
            reason,
        };

        let inputs = self
            .abi
            .constructor
            .as_ref()
            .map(|c| c.inputs.as_slice())
            .unwrap_or_default();

        if inputs.len() != args.len() {
            return Err(invalid(format!(
                "expected {} argument(s), got {}",
                inputs.len(),
                args.len()
            )));
        }

        let values = inputs
            .iter()
            .zip(args)
            .map(|(param, arg)| {
                let ty = param
                    .resolve()
                    .map_err(|e| invalid(format!("unsupported type for `{}`: {e}", param.name)))?;
                coerce_arg(&ty, arg)
                    .map_err(|e| invalid(format!("`{}` is not a valid {}: {e}", arg, param.ty)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DynSolValue::Tuple(values).abi_encode_params().into())
    }

    /// Creation transaction payload: bytecode followed by the encoded arguments.
    pub fn init_code(&self, encoded_args: &Bytes) -> Bytes {
        [&self.bytecode[..], &encoded_args[..]].concat().into()
    }

    /// Encode the arguments and broadcast the creation transaction from `from`.
    pub async fn deploy<C: ChainClient>(
        &self,
        client: &C,
        from: Address,
        args: &[ConstructorArg],
    ) -> Result<PendingDeployment, DeployError> {
        let encoded_args = self.encode_args(args)?;
        let tx_hash = client
            .send_deployment(from, self.init_code(&encoded_args))
            .await?;

        Ok(PendingDeployment {
            contract_name: self.name.clone(),
            abi: self.abi.clone(),
            deployer: from,
            tx_hash,
            args: args.to_vec(),
            encoded_args,
        })
    }

    /// Load the Hardhat build-info this artifact was produced by, if any.
    pub fn load_build_info(&self) -> anyhow::Result<Option<BuildInfo>> {
        let Some(path) = &self.build_info else {
            return Ok(None);
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read build info {}", path.display()))?;
        let info = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse build info {}", path.display()))?;
        Ok(Some(info))
    }
}

/// Convert an argument to an ABI value by its structure.
///
/// Strings and booleans are taken as written. Only scalar text that needs parsing
/// (addresses, integers, fixed bytes) or a list written as one string goes through
/// the textual coercion.
fn coerce_arg(ty: &DynSolType, arg: &ConstructorArg) -> Result<DynSolValue, String> {
    match (ty, arg) {
        (DynSolType::String, ConstructorArg::Text(s)) => Ok(DynSolValue::String(s.clone())),
        (DynSolType::Bool, ConstructorArg::Bool(b)) => Ok(DynSolValue::Bool(*b)),
        (DynSolType::Array(inner), ConstructorArg::List(items)) => {
            coerce_items(inner, items).map(DynSolValue::Array)
        }
        (DynSolType::FixedArray(inner, len), ConstructorArg::List(items)) => {
            if items.len() != *len {
                return Err(format!("expected {len} element(s), got {}", items.len()));
            }
            coerce_items(inner, items).map(DynSolValue::FixedArray)
        }
        (DynSolType::Tuple(types), ConstructorArg::List(items)) => {
            if items.len() != types.len() {
                return Err(format!(
                    "expected {} component(s), got {}",
                    types.len(),
                    items.len()
                ));
            }
            types
                .iter()
                .zip(items)
                .map(|(ty, item)| coerce_arg(ty, item))
                .collect::<Result<Vec<_>, _>>()
                .map(DynSolValue::Tuple)
        }
        (_, ConstructorArg::List(_)) => Err("a list is not accepted here".to_string()),
        _ => ty.coerce_str(&arg.to_string()).map_err(|e| e.to_string()),
    }
}

fn coerce_items(ty: &DynSolType, items: &[ConstructorArg]) -> Result<Vec<DynSolValue>, String> {
    items.iter().map(|item| coerce_arg(ty, item)).collect()
}

/// A broadcast but not yet confirmed deployment.
#[derive(Debug, Clone)]
pub struct PendingDeployment {
    pub contract_name: String,
    pub abi: JsonAbi,
    pub deployer: Address,
    pub tx_hash: B256,
    pub args: Vec<ConstructorArg>,
    pub encoded_args: Bytes,
}

impl PendingDeployment {
    /// Wait until the transaction is `confirmations` blocks deep and collect the result.
    pub async fn confirmed<C: ChainClient>(
        self,
        client: &C,
        confirmations: u64,
    ) -> Result<DeploymentResult, DeployError> {
        let receipt = client.wait_for_receipt(self.tx_hash, confirmations).await?;

        if !receipt.success {
            return Err(DeployError::TransactionFailure {
                tx_hash: Some(self.tx_hash),
                reason: format!("transaction reverted in block {}", receipt.block_number),
            });
        }

        let contract_address =
            receipt
                .contract_address
                .ok_or_else(|| DeployError::TransactionFailure {
                    tx_hash: Some(self.tx_hash),
                    reason: "receipt carries no contract address".to_string(),
                })?;

        Ok(DeploymentResult {
            label: self.contract_name.clone(),
            contract: ContractHandle {
                name: self.contract_name.clone(),
                address: contract_address,
                abi: self.abi,
            },
            contract_name: self.contract_name,
            contract_address,
            deployer_address: self.deployer,
            transaction_hash: self.tx_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            args: self.args,
            encoded_args: self.encoded_args,
        })
    }
}

/// Handle on a deployed contract.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractHandle {
    pub name: String,
    pub address: Address,
    pub abi: JsonAbi,
}

/// Name-indexed set of deployable contracts.
#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    factories: BTreeMap<String, ContractFactory>,
}

impl ContractRegistry {
    /// Walk an artifacts directory and register every contract with bytecode.
    ///
    /// Interfaces and abstract contracts (empty bytecode), debug files and
    /// build-info files are skipped. Each contract is reachable by its bare name and
    /// by `source:Name`; on bare-name clashes the first artifact found wins.
    pub fn load(dir: &Path) -> Result<Self, DeployError> {
        if !dir.is_dir() {
            return Err(DeployError::Artifact(format!(
                "artifacts directory not found: {}",
                dir.display()
            )));
        }

        let mut files = Vec::new();
        collect_artifact_files(dir, &mut files)
            .map_err(|e| DeployError::Artifact(format!("{}: {e}", dir.display())))?;
        files.sort();

        let mut registry = Self::default();
        for path in files {
            match load_factory(&path) {
                Ok(Some(factory)) => registry.insert(factory),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Skipping non-artifact file");
                }
            }
        }

        tracing::debug!(
            dir = %dir.display(),
            contracts = registry.factories.len(),
            "Artifacts loaded"
        );

        Ok(registry)
    }

    /// Register a factory under its bare and fully-qualified names.
    pub fn insert(&mut self, factory: ContractFactory) {
        if factory.source_name.is_some() {
            self.factories
                .insert(factory.fully_qualified_name(), factory.clone());
        }

        if let Some(existing) = self.factories.get(&factory.name) {
            tracing::warn!(
                contract = %factory.name,
                kept = %existing.fully_qualified_name(),
                ignored = %factory.fully_qualified_name(),
                "Several artifacts share a contract name, use `source:Name` to pick one"
            );
            return;
        }
        self.factories.insert(factory.name.clone(), factory);
    }

    /// Look up a contract by bare or fully-qualified name.
    pub fn resolve(&self, name: &str) -> Result<&ContractFactory, DeployError> {
        self.factories
            .get(name)
            .ok_or_else(|| DeployError::ArtifactNotFound(name.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

fn collect_artifact_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|n| n == BUILD_INFO_DIR) {
                continue;
            }
            collect_artifact_files(&path, out)?;
        } else {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if name.ends_with(".json") && !name.ends_with(DBG_SUFFIX) {
                out.push(path);
            }
        }
    }
    Ok(())
}

/// Parse one artifact file. `Ok(None)` means the contract has no creation code.
fn load_factory(path: &Path) -> anyhow::Result<Option<ContractFactory>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let raw: RawArtifact = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let name = match raw.contract_name {
        Some(name) => name,
        None => path
            .file_stem()
            .and_then(|s| s.to_str())
            .context("Artifact file name is not valid UTF-8")?
            .to_string(),
    };

    let code = raw.bytecode.as_str().trim_start_matches("0x");
    if code.is_empty() {
        return Ok(None);
    }
    if code.contains("__") {
        tracing::warn!(contract = %name, path = %path.display(), "Skipping artifact with unlinked libraries");
        return Ok(None);
    }
    let bytecode = hex::decode(code).with_context(|| format!("Invalid bytecode in {}", path.display()))?;

    let source_name = raw
        .source_name
        .or_else(|| raw.metadata.as_ref().and_then(|m| foundry_source_name(m, &name)));

    Ok(Some(ContractFactory {
        name,
        source_name,
        abi: raw.abi,
        bytecode: bytecode.into(),
        build_info: hardhat_build_info(path),
    }))
}

/// Foundry records the source file under `metadata.settings.compilationTarget`.
fn foundry_source_name(metadata: &Value, name: &str) -> Option<String> {
    metadata["settings"]["compilationTarget"]
        .as_object()?
        .iter()
        .find(|(_, target)| target.as_str() == Some(name))
        .map(|(source, _)| source.clone())
}

/// Resolve the build-info path referenced by the `.dbg.json` sibling of an artifact.
fn hardhat_build_info(artifact: &Path) -> Option<PathBuf> {
    let stem = artifact.file_stem()?.to_str()?;
    let dbg_path = artifact.with_file_name(format!("{stem}{DBG_SUFFIX}"));
    let content = std::fs::read_to_string(dbg_path).ok()?;
    let dbg: DebugFile = serde_json::from_str(&content).ok()?;
    let path = artifact.parent()?.join(dbg.build_info);
    path.exists().then_some(path)
}
