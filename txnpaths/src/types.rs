use crate::error::SourceError;
use alloy_primitives::{
    U256,
    utils::{ParseUnits, parse_units},
};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;
use std::{
    fmt::{Debug, Display},
    str::FromStr,
};

/// Default number of transactions requested per address history lookup.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

///
/// Network
///
/// The closed set of chains we know how to fetch from.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Ethereum,
    Bitcoin,
    Bsc,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Ethereum => "ethereum",
            Network::Bitcoin => "bitcoin",
            Network::Bsc => "bsc",
        }
    }

    /// Decimals of the native unit (wei per ether, satoshi per bitcoin).
    pub fn decimals(&self) -> u8 {
        match self {
            Network::Ethereum | Network::Bsc => 18,
            Network::Bitcoin => 8,
        }
    }

    /// Chain id used by the Etherscan v2 multichain API.
    pub fn etherscan_chain_id(&self) -> Option<u64> {
        match self {
            Network::Ethereum => Some(1),
            Network::Bsc => Some(56),
            Network::Bitcoin => None,
        }
    }

    /// The history lookup strategy for this network.
    ///
    /// Block radii are roughly one hour of blocks: 12s blocks on Ethereum, 3s on BSC.
    pub fn history_strategy(&self) -> HistoryStrategy {
        match self {
            Network::Ethereum => HistoryStrategy::AccountBlocks { radius: 300 },
            Network::Bsc => HistoryStrategy::AccountBlocks { radius: 1200 },
            Network::Bitcoin => HistoryStrategy::LedgerRecent,
        }
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ethereum" | "eth" => Ok(Network::Ethereum),
            "bitcoin" | "btc" => Ok(Network::Bitcoin),
            "bsc" | "binance" => Ok(Network::Bsc),
            other => Err(SourceError::UnsupportedNetwork(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Success,
    Failed,
    Pending,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Success => "success",
            TxStatus::Failed => "failed",
            TxStatus::Pending => "pending",
        }
    }
}

impl Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(TxStatus::Success),
            "failed" => Ok(TxStatus::Failed),
            "pending" | "" => Ok(TxStatus::Pending),
            other => Err(SourceError::Malformed(format!("unknown status {other}"))),
        }
    }
}

///
/// Transaction
///
/// A transaction normalized from whichever explorer returned it.
///
/// `to` is empty for contract creations, `block_number` is 0 when unknown and
/// `timestamp` is in milliseconds. Gas fields and status are carried along but
/// play no part in tracing.
///
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub network: Network,
    pub from: String,
    pub to: String,
    pub value: String,
    pub block_number: u64,
    pub timestamp: u64,
    pub gas: String,
    pub gas_price: String,
    pub gas_used: String,
    pub input: String,
    pub status: TxStatus,
}

impl Transaction {
    /// Builds a transaction with the fields tracing cares about; gas fields default to "0".
    pub fn new(
        hash: impl Into<String>,
        network: Network,
        from: impl Into<String>,
        to: impl Into<String>,
        value: impl Into<String>,
        block_number: u64,
        timestamp: u64,
    ) -> Self {
        Self {
            hash: hash.into(),
            network,
            from: from.into(),
            to: to.into(),
            value: value.into(),
            block_number,
            timestamp,
            gas: "0".to_string(),
            gas_price: "0".to_string(),
            gas_used: "0".to_string(),
            input: String::new(),
            status: TxStatus::Success,
        }
    }

    /// The value as a positive finite number, or `None` if zero or unparseable.
    pub fn value_amount(&self) -> Option<f64> {
        self.value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v > 0.0)
    }

    /// The value in base units (wei, satoshi), or `None` if zero, negative or unparseable.
    /// Exact, unlike `value_amount`.
    pub fn base_units(&self) -> Option<U256> {
        match parse_units(self.value.trim(), self.network.decimals()) {
            Ok(ParseUnits::U256(units)) if !units.is_zero() => Some(units),
            _ => None,
        }
    }

    pub fn is_contract_creation(&self) -> bool {
        self.to.is_empty()
    }
}

impl Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Transaction {{ hash: {}, network: {}, from: {}, to: {}, value: {}, block_number: {}, timestamp: {}, status: {} }}",
            self.hash,
            self.network,
            self.from,
            self.to,
            self.value,
            self.block_number,
            self.timestamp,
            self.status
        )
    }
}

impl Display for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.18} {:.16} -> {:.16} {} ({})",
            self.hash, self.from, self.to, self.value, self.network
        )
    }
}

///
/// RiskLevel
///
/// Address risk grade reported by a know-your-address service, lowest first.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Severe,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Severe => "SEVERE",
        }
    }
}

impl Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaliciousAddress {
    pub category: String,
    pub value: String,
}

///
/// AddressRisk
///
/// Risk assessment of one address. `associate_black_addresses`, `interaction_time`
/// and `amount` are passed through as the service reports them.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRisk {
    #[serde(default)]
    pub address: String,
    pub level: RiskLevel,
    #[serde(default, deserialize_with = "number_or_string")]
    pub risk_score: f64,
    #[serde(default, deserialize_with = "string_or_number")]
    pub associate_black_addresses: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub interaction_time: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub amount: String,
    #[serde(default)]
    pub malicious_address_list: Vec<MaliciousAddress>,
}

fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| de::Error::custom("risk score out of range")),
        Value::String(s) => s.trim().parse().map_err(de::Error::custom),
        Value::Null => Ok(0.0),
        other => Err(de::Error::custom(format!("unexpected risk score {other}"))),
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(de::Error::custom(format!("expected string, got {other}"))),
    }
}

///
/// HistoryWindow
///
/// How much of an address's history to ask a source for.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryWindow {
    /// Inclusive block range.
    Blocks { start: u64, end: u64 },
    /// The `n` most recent transactions.
    Recent(usize),
}

impl HistoryWindow {
    pub fn contains_block(&self, block_number: u64) -> bool {
        match self {
            HistoryWindow::Blocks { start, end } => (*start..=*end).contains(&block_number),
            HistoryWindow::Recent(_) => true,
        }
    }
}

///
/// HistoryStrategy
///
/// Account-based chains can be queried by block range around a transaction.
/// Ledger-style chains only expose an address's most recent transactions.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStrategy {
    AccountBlocks { radius: u64 },
    LedgerRecent,
}

impl HistoryStrategy {
    pub fn window_for(&self, tx: &Transaction, limit: usize) -> HistoryWindow {
        match self {
            // an unknown block gives us nothing to center on
            HistoryStrategy::AccountBlocks { .. } if tx.block_number == 0 => {
                HistoryWindow::Recent(limit)
            }
            HistoryStrategy::AccountBlocks { radius } => HistoryWindow::Blocks {
                start: tx.block_number.saturating_sub(*radius),
                end: tx.block_number.saturating_add(*radius),
            },
            HistoryStrategy::LedgerRecent => HistoryWindow::Recent(limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_parses_tags_and_aliases() {
        assert_eq!("ethereum".parse::<Network>().unwrap(), Network::Ethereum);
        assert_eq!("ETH".parse::<Network>().unwrap(), Network::Ethereum);
        assert_eq!("btc".parse::<Network>().unwrap(), Network::Bitcoin);
        assert_eq!("Binance".parse::<Network>().unwrap(), Network::Bsc);
        assert!(matches!(
            "solana".parse::<Network>(),
            Err(SourceError::UnsupportedNetwork(_))
        ));
    }

    #[test]
    fn value_amount_rejects_zero_and_garbage() {
        let mut tx = Transaction::new("0x1", Network::Ethereum, "a", "b", "1.5", 1, 0);
        assert_eq!(tx.value_amount(), Some(1.5));
        tx.value = "0".to_string();
        assert_eq!(tx.value_amount(), None);
        tx.value = "0.000".to_string();
        assert_eq!(tx.value_amount(), None);
        tx.value = "abc".to_string();
        assert_eq!(tx.value_amount(), None);
        tx.value = "-3".to_string();
        assert_eq!(tx.value_amount(), None);
    }

    #[test]
    fn base_units_are_exact() {
        let mut tx = Transaction::new("0x1", Network::Ethereum, "a", "b", "0.07", 1, 0);
        assert_eq!(tx.base_units(), Some(U256::from(70_000_000_000_000_000u64)));
        tx.value = "0".to_string();
        assert_eq!(tx.base_units(), None);
        tx.value = "-3".to_string();
        assert_eq!(tx.base_units(), None);
        tx.value = "abc".to_string();
        assert_eq!(tx.base_units(), None);

        let btc = Transaction::new("ab", Network::Bitcoin, "a", "b", "0.75", 1, 0);
        assert_eq!(btc.base_units(), Some(U256::from(75_000_000u64)));
    }

    #[test]
    fn account_window_centers_on_block() {
        let tx = Transaction::new("0x1", Network::Ethereum, "a", "b", "1", 1_000, 0);
        let window = Network::Ethereum.history_strategy().window_for(&tx, 50);
        assert_eq!(window, HistoryWindow::Blocks { start: 700, end: 1_300 });

        let early = Transaction::new("0x2", Network::Bsc, "a", "b", "1", 10, 0);
        let window = Network::Bsc.history_strategy().window_for(&early, 50);
        assert_eq!(window, HistoryWindow::Blocks { start: 0, end: 1_210 });
    }

    #[test]
    fn unknown_block_and_ledger_use_recent() {
        let tx = Transaction::new("0x1", Network::Ethereum, "a", "b", "1", 0, 0);
        assert_eq!(
            Network::Ethereum.history_strategy().window_for(&tx, 25),
            HistoryWindow::Recent(25)
        );

        let btc = Transaction::new("ab", Network::Bitcoin, "bc1a", "bc1b", "1", 800_000, 0);
        assert_eq!(
            Network::Bitcoin.history_strategy().window_for(&btc, 25),
            HistoryWindow::Recent(25)
        );
    }

    #[test]
    fn transaction_serializes_camel_case() {
        let tx = Transaction::new("0x1", Network::Bsc, "a", "", "2", 5, 1_000);
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["blockNumber"], 5);
        assert_eq!(json["network"], "bsc");
        assert_eq!(json["status"], "success");
        assert!(tx.is_contract_creation());
    }

    #[test]
    fn risk_levels_order_and_tolerate_loose_fields() {
        assert!(RiskLevel::Severe > RiskLevel::High);
        assert!(RiskLevel::Low < RiskLevel::Medium);

        let risk: AddressRisk = serde_json::from_value(serde_json::json!({
            "address": "0xabc",
            "level": "HIGH",
            "riskScore": "87.5",
            "associateBlackAddresses": 3,
            "interactionTime": null
        }))
        .unwrap();
        assert_eq!(risk.level, RiskLevel::High);
        assert_eq!(risk.risk_score, 87.5);
        assert_eq!(risk.associate_black_addresses, "3");
        assert_eq!(risk.interaction_time, "");
        assert!(risk.malicious_address_list.is_empty());
        assert_eq!(risk.level.to_string(), "HIGH");
    }
}
