//! # Explorer sources
//!
//! HTTP-backed `TransactionSource`s. Each network is served by one explorer:
//!
//! | Network | Explorer | History lookup |
//! |---------|----------|----------------|
//! | ethereum | Etherscan v2 (chain id 1) | `txlist` over a block range |
//! | bsc | Etherscan v2 (chain id 56) | `txlist` over a block range |
//! | bitcoin | Blockstream Esplora | newest transactions of the address |
//!
//! `OklinkClient` sits beside them: it grades addresses rather than serving
//! transactions, and is only used when a key is configured.
//!
//! Responses are normalized into `Transaction`s: values in native units, EVM
//! addresses lowercased, timestamps in milliseconds.

pub mod blockstream;
pub mod etherscan;
pub mod oklink;

pub use blockstream::BlockstreamClient;
pub use etherscan::EtherscanClient;
pub use oklink::OklinkClient;

use crate::{config::ExplorerConfig, data_sources::TransactionSource, error::SourceError, types::*};
use alloy_primitives::{U256, utils::format_units};
use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Routes each lookup to the explorer configured for its network.
pub struct ExplorerSource {
    ethereum: Option<EtherscanClient>,
    bsc: Option<EtherscanClient>,
    bitcoin: Option<BlockstreamClient>,
}

impl ExplorerSource {
    pub fn new(
        ethereum: Option<EtherscanClient>,
        bsc: Option<EtherscanClient>,
        bitcoin: Option<BlockstreamClient>,
    ) -> Self {
        Self {
            ethereum,
            bsc,
            bitcoin,
        }
    }

    /// Etherscan-family networks are only wired up when an API key is available.
    pub fn from_config(config: &ExplorerConfig) -> Result<Self, SourceError> {
        let http = config.http_client()?;

        let etherscan = |key: Option<&str>, network: Network| {
            key.map(|key| {
                EtherscanClient::new(http.clone(), &config.etherscan_api_url, key, network)
            })
            .transpose()
        };
        let ethereum = etherscan(config.etherscan_api_key.as_deref(), Network::Ethereum)?;
        let bsc = etherscan(config.bsc_api_key(), Network::Bsc)?;
        let bitcoin = Some(BlockstreamClient::new(http.clone(), &config.blockstream_api_url));

        info!(
            "Explorers configured: ethereum={}, bsc={}, bitcoin={}",
            ethereum.is_some(),
            bsc.is_some(),
            bitcoin.is_some()
        );
        Ok(Self::new(ethereum, bsc, bitcoin))
    }

    fn etherscan_for(&self, network: Network) -> Result<&EtherscanClient, SourceError> {
        let client = match network {
            Network::Ethereum => self.ethereum.as_ref(),
            Network::Bsc => self.bsc.as_ref(),
            Network::Bitcoin => None,
        };
        client.ok_or_else(|| not_configured(network))
    }

    fn blockstream(&self) -> Result<&BlockstreamClient, SourceError> {
        self.bitcoin
            .as_ref()
            .ok_or_else(|| not_configured(Network::Bitcoin))
    }
}

fn not_configured(network: Network) -> SourceError {
    SourceError::UnsupportedNetwork(format!("{network} (no explorer configured)"))
}

#[async_trait]
impl TransactionSource for ExplorerSource {
    async fn fetch_transaction(
        &self,
        hash: &str,
        network: Network,
    ) -> Result<Option<Transaction>, SourceError> {
        match network {
            Network::Bitcoin => self.blockstream()?.transaction(hash).await,
            _ => self.etherscan_for(network)?.transaction(hash).await,
        }
    }

    async fn fetch_address_history(
        &self,
        address: &str,
        network: Network,
        window: HistoryWindow,
    ) -> Result<Vec<Transaction>, SourceError> {
        match network {
            Network::Bitcoin => self.blockstream()?.address_history(address, window).await,
            _ => {
                self.etherscan_for(network)?
                    .address_history(address, window)
                    .await
            }
        }
    }
}

/// Format a base-unit amount (wei, satoshi) in the network's native unit.
pub(crate) fn format_native(amount: U256, network: Network) -> Result<String, SourceError> {
    format_units(amount, network.decimals())
        .map(|s| trim_decimal(&s))
        .map_err(|e| SourceError::Malformed(e.to_string()))
}

/// "1.500000" -> "1.5", "2.000" -> "2"
pub(crate) fn trim_decimal(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

pub(crate) fn parse_hex_u64(s: &str) -> Result<u64, SourceError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| SourceError::Malformed(format!("hex quantity {s}: {e}")))
}

/// Stand-in timestamp for transactions that are not in a block yet.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
