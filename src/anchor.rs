//! On-chain anchoring
//!
//! Submits ultimate Merkle roots to the anchor contract and verifies past
//! submissions by parsing the `MerkleRootSubmitted` event out of the
//! transaction receipt.

use alloy::primitives::{Address, FixedBytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::crypto::hash::Hash256;
use crate::error::{IssuerError, Result};

sol! {
    #[sol(rpc)]
    contract AnchorStore {
        event MerkleRootSubmitted(
            uint256 indexed timeWindow,
            bytes32 indexed root,
            address indexed issuer,
            uint256 blockNumber
        );

        function putRootLegacy(uint256 timeWindow, bytes32 root) external;

        function putRootEmitOnly(uint256 timeWindow, bytes32 root) external;
    }
}

/// Which contract entry point to call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractType {
    Legacy,
    EmitOnly,
}

impl ContractType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "legacy" => Some(Self::Legacy),
            "emit-only" | "emit_only" => Some(Self::EmitOnly),
            _ => None,
        }
    }
}

/// Anchor service configuration
#[derive(Debug, Clone)]
pub struct AnchorConfig {
    pub rpc_url: String,
    pub private_key: String,
    pub contract_address: Address,
    pub contract_type: ContractType,
    pub chain_id: u64,
    pub network: String,
    /// Override of the per-network minimum priority fee, in gwei
    pub min_priority_fee_gwei: Option<u128>,
    /// Floor for the max fee cap, in gwei
    pub min_max_fee_gwei: Option<u128>,
}

impl AnchorConfig {
    /// Load configuration from environment variables; `None` when the chain
    /// is not configured (anchoring degrades to "anchored-later").
    pub fn from_env() -> Option<Self> {
        let rpc_url = std::env::var("RPC_URL").ok()?;
        let private_key = std::env::var("PRIVATE_KEY").ok()?;
        let contract_address = std::env::var("ANCHORSTORE_ADDRESS")
            .ok()
            .and_then(|s| s.parse().ok())?;
        let contract_type = std::env::var("CONTRACT_TYPE")
            .ok()
            .and_then(|s| ContractType::parse(&s))
            .unwrap_or(ContractType::Legacy);
        let chain_id = std::env::var("CHAIN_ID")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(80002);
        let network = std::env::var("NETWORK").unwrap_or_else(|_| default_network(chain_id));
        let min_priority_fee_gwei = std::env::var("MIN_PRIORITY_FEE_GWEI")
            .ok()
            .and_then(|s| s.parse().ok());
        let min_max_fee_gwei = std::env::var("MIN_MAX_FEE_GWEI")
            .ok()
            .and_then(|s| s.parse().ok());

        Some(Self {
            rpc_url,
            private_key,
            contract_address,
            contract_type,
            chain_id,
            network,
            min_priority_fee_gwei,
            min_max_fee_gwei,
        })
    }
}

fn default_network(chain_id: u64) -> String {
    match chain_id {
        1 => "ethereum",
        137 => "polygon",
        80002 => "polygon-amoy",
        11155111 => "sepolia",
        _ => "unknown",
    }
    .to_string()
}

/// Explorer transaction URL for the known networks
pub fn explorer_url(network: &str, tx_hash: &str) -> Option<String> {
    let base = match network {
        "ethereum" => "https://etherscan.io",
        "sepolia" => "https://sepolia.etherscan.io",
        "polygon" => "https://polygonscan.com",
        "polygon-amoy" => "https://amoy.polygonscan.com",
        _ => return None,
    };
    Some(format!("{base}/tx/{tx_hash}"))
}

const GWEI: u128 = 1_000_000_000;

/// Default minimum priority fee per network, in wei.
fn network_min_priority_fee(network: &str) -> u128 {
    match network {
        // Amoy validators drop transactions tipping under 25 gwei.
        "polygon" | "polygon-amoy" => 25 * GWEI,
        _ => GWEI,
    }
}

/// EIP-1559 fee discipline: a tip no lower than the network floor, and a
/// cap that survives a doubled base fee.
fn compute_fee_caps(base_fee: u128, suggested_tip: u128, config: &AnchorConfig) -> (u128, u128) {
    let floor = config
        .min_priority_fee_gwei
        .map(|g| g * GWEI)
        .unwrap_or_else(|| network_min_priority_fee(&config.network));
    let priority = suggested_tip.max(floor);

    let env_min = config.min_max_fee_gwei.map(|g| g * GWEI).unwrap_or(0);
    let max_fee = (2 * base_fee + priority).max(2 * priority).max(env_min);

    (max_fee, priority)
}

/// Result of a successful anchor submission
#[derive(Debug, Clone)]
pub struct AnchorReceipt {
    pub tx_hash: String,
    pub network: String,
    pub block_number: Option<u64>,
    /// Root parsed back out of the emitted event, when present
    pub root_from_event: Option<String>,
}

/// Result of verifying a past anchor transaction
#[derive(Debug, Clone)]
pub struct AnchorVerification {
    pub verified: bool,
    pub block_number: Option<u64>,
    pub mru_from_event: Option<String>,
    /// Set only when an expected root was supplied
    pub mru_matches: Option<bool>,
    pub explorer_url: Option<String>,
}

#[async_trait]
pub trait AnchorClient: Send + Sync {
    /// Submit the ultimate root; `time_window` is the oldest `finalized_at`
    /// (epoch seconds) among the batches sharing the root. Waits for one
    /// confirmation.
    async fn anchor(&self, root: &Hash256, time_window: u64) -> Result<AnchorReceipt>;

    /// Check a past submission: the transaction must exist, have succeeded,
    /// and - when `expected_root` is given - have emitted exactly that root.
    async fn verify_transaction(
        &self,
        tx_hash: &str,
        expected_root: Option<&Hash256>,
    ) -> Result<AnchorVerification>;

    fn network(&self) -> &str;
}

/// Alloy-backed anchor client
pub struct EvmAnchorClient {
    config: AnchorConfig,
}

impl EvmAnchorClient {
    pub fn new(config: AnchorConfig) -> Self {
        Self { config }
    }

    fn to_bytes32(hash: &Hash256) -> FixedBytes<32> {
        FixedBytes::from_slice(hash)
    }
}

#[async_trait]
impl AnchorClient for EvmAnchorClient {
    async fn anchor(&self, root: &Hash256, time_window: u64) -> Result<AnchorReceipt> {
        info!(
            root = %hex::encode(root),
            time_window,
            network = %self.config.network,
            "anchoring ultimate root"
        );

        let signer: PrivateKeySigner = self
            .config
            .private_key
            .parse()
            .map_err(|e| IssuerError::Configuration(format!("invalid private key: {e}")))?;

        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(alloy::network::EthereumWallet::from(signer))
            .on_http(
                self.config
                    .rpc_url
                    .parse()
                    .map_err(|e| IssuerError::Configuration(format!("invalid RPC URL: {e}")))?,
            );

        // Suggested tip plus the legacy gas price give a workable base-fee
        // estimate without depending on block shape.
        let suggested_tip = provider
            .get_max_priority_fee_per_gas()
            .await
            .unwrap_or(GWEI);
        let gas_price = provider.get_gas_price().await.unwrap_or(suggested_tip);
        let base_fee = gas_price.saturating_sub(suggested_tip);
        let (max_fee, priority) = compute_fee_caps(base_fee, suggested_tip, &self.config);

        let contract = AnchorStore::new(self.config.contract_address, &provider);
        let window = U256::from(time_window);
        let root_bytes = Self::to_bytes32(root);

        let pending = match self.config.contract_type {
            ContractType::Legacy => contract
                .putRootLegacy(window, root_bytes)
                .max_fee_per_gas(max_fee)
                .max_priority_fee_per_gas(priority)
                .send()
                .await
                .map_err(|e| IssuerError::Chain(format!("failed to send transaction: {e}")))?,
            ContractType::EmitOnly => contract
                .putRootEmitOnly(window, root_bytes)
                .max_fee_per_gas(max_fee)
                .max_priority_fee_per_gas(priority)
                .send()
                .await
                .map_err(|e| IssuerError::Chain(format!("failed to send transaction: {e}")))?,
        };

        info!(tx_hash = %pending.tx_hash(), "anchor transaction sent");

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| IssuerError::Chain(format!("failed to get receipt: {e}")))?;

        if !receipt.status() {
            return Err(IssuerError::Chain(format!(
                "anchor transaction {} reverted",
                receipt.transaction_hash
            )));
        }

        let root_from_event = receipt.inner.logs().iter().find_map(|log| {
            log.log_decode::<AnchorStore::MerkleRootSubmitted>()
                .ok()
                .map(|ev| hex::encode(ev.inner.data.root))
        });

        info!(
            tx_hash = %receipt.transaction_hash,
            block = receipt.block_number.unwrap_or(0),
            "ultimate root anchored"
        );

        Ok(AnchorReceipt {
            tx_hash: format!("{:#x}", receipt.transaction_hash),
            network: self.config.network.clone(),
            block_number: receipt.block_number,
            root_from_event,
        })
    }

    async fn verify_transaction(
        &self,
        tx_hash: &str,
        expected_root: Option<&Hash256>,
    ) -> Result<AnchorVerification> {
        let provider = ProviderBuilder::new().on_http(
            self.config
                .rpc_url
                .parse()
                .map_err(|e| IssuerError::Configuration(format!("invalid RPC URL: {e}")))?,
        );

        let hash: B256 = tx_hash
            .parse()
            .map_err(|e| IssuerError::Validation(format!("invalid tx hash: {e}")))?;

        let receipt = provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| IssuerError::Chain(format!("receipt lookup failed: {e}")))?;

        let receipt = match receipt {
            Some(receipt) => receipt,
            None => {
                warn!(tx_hash, "anchor transaction not found");
                return Ok(AnchorVerification {
                    verified: false,
                    block_number: None,
                    mru_from_event: None,
                    mru_matches: expected_root.map(|_| false),
                    explorer_url: explorer_url(&self.config.network, tx_hash),
                });
            }
        };

        let success = receipt.status();
        let mru_from_event = receipt.inner.logs().iter().find_map(|log| {
            log.log_decode::<AnchorStore::MerkleRootSubmitted>()
                .ok()
                .map(|ev| hex::encode(ev.inner.data.root))
        });

        let mru_matches = expected_root.map(|expected| {
            mru_from_event.as_deref() == Some(hex::encode(expected).as_str())
        });

        let verified = success
            && mru_from_event.is_some()
            && mru_matches.unwrap_or(true);

        Ok(AnchorVerification {
            verified,
            block_number: receipt.block_number,
            mru_from_event,
            mru_matches,
            explorer_url: explorer_url(&self.config.network, tx_hash),
        })
    }

    fn network(&self) -> &str {
        &self.config.network
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(network: &str) -> AnchorConfig {
        AnchorConfig {
            rpc_url: "http://localhost:8545".to_string(),
            private_key: format!("0x{}", "01".repeat(32)),
            contract_address: Address::ZERO,
            contract_type: ContractType::Legacy,
            chain_id: 80002,
            network: network.to_string(),
            min_priority_fee_gwei: None,
            min_max_fee_gwei: None,
        }
    }

    #[test]
    fn test_amoy_priority_floor() {
        let cfg = config("polygon-amoy");
        // Suggested tip below the 25 gwei floor is raised to it.
        let (_, priority) = compute_fee_caps(30 * GWEI, GWEI, &cfg);
        assert_eq!(priority, 25 * GWEI);
    }

    #[test]
    fn test_priority_floor_override() {
        let mut cfg = config("polygon-amoy");
        cfg.min_priority_fee_gwei = Some(40);
        let (_, priority) = compute_fee_caps(30 * GWEI, GWEI, &cfg);
        assert_eq!(priority, 40 * GWEI);
    }

    #[test]
    fn test_max_fee_covers_doubled_base() {
        let cfg = config("polygon-amoy");
        let (max_fee, priority) = compute_fee_caps(100 * GWEI, 30 * GWEI, &cfg);
        assert_eq!(max_fee, 200 * GWEI + priority);
        assert!(max_fee >= 2 * priority);
    }

    #[test]
    fn test_max_fee_env_floor() {
        let mut cfg = config("polygon-amoy");
        cfg.min_max_fee_gwei = Some(1000);
        let (max_fee, _) = compute_fee_caps(GWEI, GWEI, &cfg);
        assert_eq!(max_fee, 1000 * GWEI);
    }

    #[test]
    fn test_max_fee_at_least_twice_priority() {
        let cfg = config("polygon-amoy");
        // Negligible base fee: the 2x-priority branch dominates.
        let (max_fee, priority) = compute_fee_caps(0, 30 * GWEI, &cfg);
        assert_eq!(max_fee, 2 * priority);
    }

    #[test]
    fn test_contract_type_parse() {
        assert_eq!(ContractType::parse("legacy"), Some(ContractType::Legacy));
        assert_eq!(ContractType::parse("emit-only"), Some(ContractType::EmitOnly));
        assert_eq!(ContractType::parse("emit_only"), Some(ContractType::EmitOnly));
        assert_eq!(ContractType::parse("other"), None);
    }

    #[test]
    fn test_explorer_urls() {
        assert_eq!(
            explorer_url("polygon-amoy", "0xabc").as_deref(),
            Some("https://amoy.polygonscan.com/tx/0xabc")
        );
        assert!(explorer_url("unknown", "0xabc").is_none());
    }

    #[test]
    fn test_bytes32_conversion() {
        let hash: Hash256 = [7u8; 32];
        let bytes = EvmAnchorClient::to_bytes32(&hash);
        assert_eq!(bytes.0, hash);
    }

    #[test]
    fn test_default_networks() {
        assert_eq!(default_network(80002), "polygon-amoy");
        assert_eq!(default_network(1), "ethereum");
        assert_eq!(default_network(424242), "unknown");
    }
}
