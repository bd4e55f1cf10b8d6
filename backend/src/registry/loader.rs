use serde::Deserialize;
use std::path::PathBuf;
use tracing::{info, warn};

use super::RegistryError;
use crate::types::{ChainDescriptor, ChainEntry, Descriptive, SecondaryIds, SocialLink, SourceTag};

/// Descriptor file of one network family, as stored on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryFile {
    pub subnet_id: String,
    pub name: String,
    pub description: Option<String>,
    pub website: Option<String>,
    #[serde(default)]
    pub socials: Vec<RegistrySocial>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub chains: Vec<RegistryChain>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrySocial {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryChain {
    pub chain_name: String,
    #[serde(default, deserialize_with = "optional_id")]
    pub evm_chain_id: Option<String>,
    pub blockchain_id: Option<String>,
    pub platform_chain_id: Option<String>,
    #[serde(default)]
    pub rpc_urls: Vec<String>,
}

/// Result of one wholesale load of the registry tree.
#[derive(Debug, Clone, Default)]
pub struct RegistryLoad {
    pub descriptors: Vec<ChainDescriptor>,
    pub skipped: Vec<String>,
}

pub struct RegistryLoader {
    root: PathBuf,
    descriptor_file: String,
}

impl RegistryLoader {
    pub fn new(root: impl Into<PathBuf>, descriptor_file: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            descriptor_file: descriptor_file.into(),
        }
    }

    /// Loads every `<family>/<descriptor_file>`; malformed files are skipped, not fatal.
    pub async fn load(&self) -> Result<RegistryLoad, RegistryError> {
        if !tokio::fs::metadata(&self.root).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(RegistryError::DirectoryMissing(self.root.clone()));
        }

        let mut families = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                families.push(entry.path());
            }
        }
        // deterministic pass order
        families.sort();

        let mut load = RegistryLoad::default();
        for family in families {
            let path = family.join(&self.descriptor_file);
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!("Skipping unreadable registry file {}: {}", path.display(), e);
                    load.skipped.push(path.display().to_string());
                    continue;
                }
            };

            let folder = family
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            match parse_descriptor(&raw, &folder) {
                Ok(descriptor) => load.descriptors.push(descriptor),
                Err(reason) => {
                    warn!("Skipping malformed registry file {}: {}", path.display(), reason);
                    load.skipped.push(path.display().to_string());
                }
            }
        }

        if load.descriptors.is_empty() {
            return Err(RegistryError::NoValidDescriptors {
                dir: self.root.clone(),
                skipped: load.skipped.len(),
            });
        }

        info!(
            "Loaded {} registry descriptors from {} ({} skipped)",
            load.descriptors.len(),
            self.root.display(),
            load.skipped.len()
        );
        Ok(load)
    }
}

pub fn parse_descriptor(raw: &[u8], folder: &str) -> Result<ChainDescriptor, String> {
    let file: RegistryFile = serde_json::from_slice(raw).map_err(|e| e.to_string())?;
    file.into_descriptor(folder)
}

impl RegistryFile {
    pub fn into_descriptor(self, folder: &str) -> Result<ChainDescriptor, String> {
        let subnet_id = self.subnet_id.trim().to_string();
        if subnet_id.is_empty() {
            return Err("subnetId is empty".to_string());
        }
        let primary = self.chains.first().ok_or("no chain entries")?;

        let ids = SecondaryIds {
            legacy_numeric_id: primary.evm_chain_id.clone(),
            ledger_id: primary.blockchain_id.clone(),
            platform_id: primary.platform_chain_id.clone(),
        }
        .normalized();

        let mut rpc_urls: Vec<String> = self.chains.iter().flat_map(|c| c.rpc_urls.iter().cloned()).collect();
        rpc_urls.dedup();

        let descriptive = Descriptive {
            name: self.name.trim().to_string(),
            description: self.description,
            website: self.website,
            socials: self
                .socials
                .into_iter()
                .map(|s| SocialLink { name: s.name, url: s.url })
                .collect(),
            categories: self.categories,
            rpc_urls,
            chains: self
                .chains
                .into_iter()
                .map(|c| ChainEntry {
                    chain_name: c.chain_name,
                    evm_chain_id: c.evm_chain_id,
                    blockchain_id: c.blockchain_id,
                    platform_chain_id: c.platform_chain_id,
                    rpc_urls: c.rpc_urls,
                })
                .collect(),
        };

        Ok(ChainDescriptor {
            source: SourceTag::Registry,
            subnet_id: Some(subnet_id),
            ids,
            descriptive: Some(descriptive),
            live: None,
            origin_folder: Some(folder.to_string()),
        })
    }
}

fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde_json::Value;
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!("invalid chain id {}", other))),
    }
}
