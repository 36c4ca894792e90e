//! Etherscan v2 multichain client, used for Ethereum and BSC.

use super::{format_native, now_ms, parse_hex_u64};
use crate::{error::SourceError, types::*};
use alloy_primitives::{U256, utils::format_units};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use std::str::FromStr;
use tracing::{debug, warn};

const NO_TRANSACTIONS: &str = "No transactions found";
const LATEST_BLOCK: u64 = 99_999_999;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcTransaction {
    pub hash: String,
    pub block_number: Option<String>,
    pub from: String,
    pub to: Option<String>,
    pub value: String,
    pub gas: String,
    pub gas_price: Option<String>,
    #[serde(default)]
    pub input: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcReceipt {
    pub gas_used: String,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcBlock {
    pub timestamp: String,
}

/// One row of `module=account&action=txlist`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountTransaction {
    pub block_number: String,
    pub time_stamp: String,
    pub hash: String,
    pub from: String,
    #[serde(default)]
    pub to: String,
    pub value: String,
    pub gas: String,
    pub gas_price: String,
    pub gas_used: String,
    #[serde(default)]
    pub is_error: String,
    #[serde(default)]
    pub txreceipt_status: String,
    #[serde(default)]
    pub input: String,
}

pub struct EtherscanClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    network: Network,
    chain_id: u64,
}

impl EtherscanClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        network: Network,
    ) -> Result<Self, SourceError> {
        let chain_id = network
            .etherscan_chain_id()
            .ok_or_else(|| SourceError::UnsupportedNetwork(network.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            network,
            chain_id,
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    async fn get(&self, params: &[(&str, String)]) -> Result<Value, SourceError> {
        let body = self
            .http
            .get(&self.base_url)
            .query(&[
                ("chainid", self.chain_id.to_string()),
                ("apikey", self.api_key.clone()),
            ])
            .query(params)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(body)
    }

    async fn proxy<T: DeserializeOwned>(
        &self,
        action: &str,
        params: &[(&str, String)],
    ) -> Result<Option<T>, SourceError> {
        let mut query = vec![("module", "proxy".to_string()), ("action", action.to_string())];
        query.extend(params.iter().cloned());
        proxy_result(self.get(&query).await?)
    }

    pub async fn transaction(&self, hash: &str) -> Result<Option<Transaction>, SourceError> {
        let txhash = [("txhash", hash.to_string())];
        let Some(tx) = self
            .proxy::<RpcTransaction>("eth_getTransactionByHash", &txhash)
            .await?
        else {
            return Ok(None);
        };

        let receipt = self
            .proxy::<RpcReceipt>("eth_getTransactionReceipt", &txhash)
            .await
            .unwrap_or_else(|e| {
                warn!("Receipt lookup for {} failed: {}", hash, e);
                None
            });

        let block_timestamp = match tx.block_number.as_deref() {
            Some(block) => self
                .proxy::<RpcBlock>(
                    "eth_getBlockByNumber",
                    &[("tag", block.to_string()), ("boolean", "false".to_string())],
                )
                .await
                .unwrap_or_else(|e| {
                    warn!("Block lookup for {} failed: {}", hash, e);
                    None
                })
                .map(|b| parse_hex_u64(&b.timestamp))
                .transpose()?,
            None => None,
        };

        normalize_proxy(self.network, tx, receipt, block_timestamp).map(Some)
    }

    pub async fn address_history(
        &self,
        address: &str,
        window: HistoryWindow,
    ) -> Result<Vec<Transaction>, SourceError> {
        let mut query = vec![
            ("module", "account".to_string()),
            ("action", "txlist".to_string()),
            ("address", address.to_string()),
        ];
        match window {
            HistoryWindow::Blocks { start, end } => {
                query.push(("startblock", start.to_string()));
                query.push(("endblock", end.min(LATEST_BLOCK).to_string()));
                query.push(("sort", "asc".to_string()));
            }
            HistoryWindow::Recent(limit) => {
                query.push(("startblock", "0".to_string()));
                query.push(("endblock", LATEST_BLOCK.to_string()));
                query.push(("page", "1".to_string()));
                query.push(("offset", limit.to_string()));
                query.push(("sort", "desc".to_string()));
            }
        }

        let history = parse_account_history(self.network, self.get(&query).await?)?;
        debug!(
            "{} history for {}: {} transactions",
            self.network,
            address,
            history.len()
        );
        Ok(history)
    }
}

/// Unwraps a JSON-RPC style proxy response. A null result means not found.
pub(crate) fn proxy_result<T: DeserializeOwned>(body: Value) -> Result<Option<T>, SourceError> {
    if let Some(message) = body.pointer("/error/message").and_then(Value::as_str) {
        return Err(SourceError::Api(message.to_string()));
    }
    match body.get("result") {
        None | Some(Value::Null) => Ok(None),
        // NOTOK responses carry the reason as a bare string
        Some(Value::String(reason)) => Err(SourceError::Api(reason.clone())),
        Some(result) => Ok(Some(serde_json::from_value(result.clone())?)),
    }
}

pub(crate) fn parse_account_history(
    network: Network,
    body: Value,
) -> Result<Vec<Transaction>, SourceError> {
    let status = body.get("status").and_then(Value::as_str).unwrap_or("0");
    let message = body.get("message").and_then(Value::as_str).unwrap_or_default();

    let rows = match body.get("result") {
        Some(Value::Array(rows)) => rows,
        Some(Value::String(reason)) if status != "1" => {
            return Err(SourceError::Api(reason.clone()));
        }
        _ if message == NO_TRANSACTIONS => return Ok(Vec::new()),
        _ => return Err(SourceError::Malformed(format!("txlist: {message}"))),
    };
    if status != "1" && !rows.is_empty() {
        return Err(SourceError::Api(message.to_string()));
    }

    Ok(rows
        .iter()
        .filter_map(|row| {
            serde_json::from_value::<AccountTransaction>(row.clone())
                .map_err(SourceError::from)
                .and_then(|tx| normalize_account(network, tx))
                .inspect_err(|e| debug!("Skipping txlist row: {}", e))
                .ok()
        })
        .collect())
}

pub(crate) fn normalize_proxy(
    network: Network,
    tx: RpcTransaction,
    receipt: Option<RpcReceipt>,
    block_timestamp: Option<u64>,
) -> Result<Transaction, SourceError> {
    let block_number = tx
        .block_number
        .as_deref()
        .map(parse_hex_u64)
        .transpose()?
        .unwrap_or_default();

    let mut normalized = Transaction::new(
        tx.hash,
        network,
        tx.from.to_ascii_lowercase(),
        tx.to.unwrap_or_default().to_ascii_lowercase(),
        format_native(parse_u256(&tx.value)?, network)?,
        block_number,
        block_timestamp.map(|secs| secs.saturating_mul(1000)).unwrap_or_else(now_ms),
    );
    normalized.gas = parse_hex_u64(&tx.gas)?.to_string();
    normalized.gas_price = match tx.gas_price.as_deref() {
        Some(price) => format_gwei(parse_u256(price)?)?,
        None => "0".to_string(),
    };
    normalized.input = tx.input;

    match receipt {
        Some(receipt) => {
            normalized.gas_used = parse_hex_u64(&receipt.gas_used)?.to_string();
            normalized.status = match receipt.status.as_deref() {
                Some("0x1") | None => TxStatus::Success,
                Some(_) => TxStatus::Failed,
            };
        }
        None => normalized.status = TxStatus::Pending,
    }
    Ok(normalized)
}

pub(crate) fn normalize_account(
    network: Network,
    tx: AccountTransaction,
) -> Result<Transaction, SourceError> {
    let parse_dec = |field: &str, s: &str| {
        s.parse::<u64>()
            .map_err(|e| SourceError::Malformed(format!("{field} {s}: {e}")))
    };

    let mut normalized = Transaction::new(
        tx.hash,
        network,
        tx.from.to_ascii_lowercase(),
        tx.to.to_ascii_lowercase(),
        format_native(parse_u256(&tx.value)?, network)?,
        parse_dec("blockNumber", &tx.block_number)?,
        parse_dec("timeStamp", &tx.time_stamp)?.saturating_mul(1000),
    );
    normalized.gas = tx.gas;
    normalized.gas_price = format_gwei(parse_u256(&tx.gas_price)?)?;
    normalized.gas_used = tx.gas_used;
    normalized.input = tx.input;
    normalized.status = if tx.is_error == "1" || tx.txreceipt_status == "0" {
        TxStatus::Failed
    } else {
        TxStatus::Success
    };
    Ok(normalized)
}

/// Hex (`0x` prefixed) or decimal quantity.
fn parse_u256(s: &str) -> Result<U256, SourceError> {
    U256::from_str(s).map_err(|e| SourceError::Malformed(format!("quantity {s}: {e}")))
}

fn format_gwei(wei: U256) -> Result<String, SourceError> {
    format_units(wei, "gwei")
        .map(|s| super::trim_decimal(&s))
        .map_err(|e| SourceError::Malformed(e.to_string()))
}
