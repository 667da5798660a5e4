//! Deployment record files (`deployed-addresses-<network>.json`).
//!
//! A record set is written once per run and replaces any earlier file for the same
//! network. The on-chain deployments and the file are not transactionally linked:
//! a failed write leaves contracts deployed but unrecorded.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, MapAccess, Visitor},
    ser::SerializeMap,
};

use crate::DeploymentResult;

/// Keys of the record document that cannot be used as labels.
pub const RESERVED_KEYS: [&str; 3] = ["network", "deployer", "timestamp"];

/// Addresses confirmed in one run on one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRecordSet {
    pub network: String,
    /// `label -> address`, in deployment order.
    pub entries: Vec<(String, Address)>,
    pub deployer: Address,
    /// ISO-8601 UTC with millisecond precision, e.g. `2025-06-01T12:00:00.000Z`.
    pub timestamp: String,
}

impl DeploymentRecordSet {
    /// Record set for `results`, stamped with the current time.
    ///
    /// `deployer` is the run's default signer, reported even when individual targets
    /// used an override.
    pub fn new(network: impl Into<String>, deployer: Address, results: &[DeploymentResult]) -> Self {
        Self {
            network: network.into(),
            entries: results
                .iter()
                .map(|r| (r.label.clone(), r.contract_address))
                .collect(),
            deployer,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn get(&self, label: &str) -> Option<Address> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, address)| *address)
    }
}

impl Serialize for DeploymentRecordSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len() + 3))?;
        map.serialize_entry("network", &self.network)?;
        for (label, address) in &self.entries {
            map.serialize_entry(label, address)?;
        }
        map.serialize_entry("deployer", &self.deployer)?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for DeploymentRecordSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = DeploymentRecordSet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a deployment record object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut network = None;
                let mut deployer = None;
                let mut timestamp = None;
                let mut entries = Vec::new();

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "network" => network = Some(map.next_value()?),
                        "deployer" => deployer = Some(map.next_value()?),
                        "timestamp" => timestamp = Some(map.next_value()?),
                        _ => entries.push((key, map.next_value()?)),
                    }
                }

                Ok(DeploymentRecordSet {
                    network: network.ok_or_else(|| de::Error::missing_field("network"))?,
                    entries,
                    deployer: deployer.ok_or_else(|| de::Error::missing_field("deployer"))?,
                    timestamp: timestamp.ok_or_else(|| de::Error::missing_field("timestamp"))?,
                })
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

/// Directory holding one record file per network.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File the records of `network` live in.
    pub fn path_for(&self, network: &str) -> PathBuf {
        self.dir.join(format!("deployed-addresses-{network}.json"))
    }

    /// Write `records`, replacing any existing file for the same network.
    pub fn save(&self, records: &DeploymentRecordSet) -> Result<PathBuf> {
        let path = self.path_for(&records.network);
        let json =
            serde_json::to_string_pretty(records).context("Failed to serialize deployment records")?;

        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir).context(format!(
                "Failed to create records directory: {}",
                self.dir.display()
            ))?;
        }
        std::fs::write(&path, json).context(format!(
            "Failed to write deployment records to file: {}",
            path.display()
        ))?;

        tracing::info!(
            path = %path.display(),
            contracts = records.entries.len(),
            "Deployment records saved"
        );
        Ok(path)
    }

    /// Read the records of `network`, preserving entry order.
    pub fn load(&self, network: &str) -> Result<DeploymentRecordSet> {
        load_from_file(&self.path_for(network))
    }
}

fn load_from_file(path: &Path) -> Result<DeploymentRecordSet> {
    let content = std::fs::read_to_string(path).context(format!(
        "Failed to read deployment records from file: {}",
        path.display()
    ))?;
    serde_json::from_str(&content).context("Failed to parse deployment records JSON")
}
