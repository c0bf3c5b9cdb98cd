// src/config.rs
//! Relay manager configuration - thresholds, advertised URL and chain environment

use anyhow::{Context, Result};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Advertised relay endpoint and ledger location
    pub app: AppConfig,

    /// Balance and stake thresholds
    pub blockchain: BlockchainConfig,

    /// Hub contract addresses
    pub contracts: ContractsConfig,

    /// Network constants
    #[serde(default)]
    pub environment: EnvironmentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// URL registered on the hub
    pub url: String,

    /// Port appended to `url` when the URL has none
    #[serde(default)]
    pub port: u16,

    /// Directory holding the transaction ledger
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,

    /// Keep the ledger in memory only
    #[serde(default)]
    pub in_memory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockchainConfig {
    /// Manager balance required before registering
    #[serde(with = "amount")]
    pub manager_min_balance: U256,

    /// Stake required before registering
    #[serde(with = "amount")]
    pub manager_min_stake: U256,

    /// Manager balance the replenisher aims to keep
    #[serde(with = "amount")]
    pub manager_target_balance: U256,

    /// Worker balance the replenisher tops up to
    #[serde(with = "amount")]
    pub worker_target_balance: U256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    pub relay_hub_address: Address,
}

/// Per-network constants, passed explicitly to every component that needs them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentConfig {
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Gas used by a plain value transfer
    #[serde(default = "default_min_tx_gas_cost")]
    pub min_tx_gas_cost: u64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            min_tx_gas_cost: default_min_tx_gas_cost(),
        }
    }
}

// Default values
fn default_workdir() -> PathBuf {
    PathBuf::from("/tmp/relay-manager")
}

fn default_chain_id() -> u64 {
    33
}

fn default_min_tx_gas_cost() -> u64 {
    21_000
}

impl ManagerConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context("Failed to read config file")?;

        let config: ManagerConfig = toml::from_str(&content)
            .context("Failed to parse config file")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.app.url.is_empty() {
            anyhow::bail!("Relay URL cannot be empty");
        }

        if !self.app.in_memory && self.app.workdir.as_os_str().is_empty() {
            anyhow::bail!("Ledger workdir cannot be empty unless in_memory is set");
        }

        if self.blockchain.manager_target_balance < self.blockchain.manager_min_balance {
            anyhow::bail!(
                "Manager target balance {} is below the minimum balance {}",
                self.blockchain.manager_target_balance,
                self.blockchain.manager_min_balance
            );
        }

        if self.environment.min_tx_gas_cost == 0 {
            anyhow::bail!("Minimum transaction gas cost must be greater than 0");
        }

        Ok(())
    }
}

impl AppConfig {
    /// URL as it must appear in the hub's relay record.
    pub fn registration_url(&self) -> String {
        if !has_embedded_port(&self.url) && self.port > 0 {
            format!("{}:{}", self.url, self.port)
        } else {
            self.url.clone()
        }
    }
}

/// True when the authority part of `url` ends in `:<digits>`.
fn has_embedded_port(url: &str) -> bool {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split('/').next().unwrap_or(rest);

    match authority.rsplit_once(':') {
        Some((_, port)) => !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// Wei amounts written as decimal strings or plain integers.
mod amount {
    use ethers::types::U256;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Int(value) => Ok(U256::from(value)),
            Raw::Text(text) => U256::from_dec_str(text.trim())
                .map_err(|e| D::Error::custom(format!("invalid amount {:?}: {}", text, e))),
        }
    }
}
