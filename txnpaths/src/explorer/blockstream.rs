//! Blockstream (Esplora) client for Bitcoin.

use super::{format_native, now_ms};
use crate::{error::SourceError, types::*};
use alloy_primitives::U256;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub(crate) struct EsploraTransaction {
    pub txid: String,
    pub status: Option<EsploraStatus>,
    #[serde(default)]
    pub vin: Vec<EsploraInput>,
    #[serde(default)]
    pub vout: Vec<EsploraOutput>,
    pub fee: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EsploraStatus {
    #[serde(default)]
    pub confirmed: bool,
    pub block_height: Option<u64>,
    pub block_time: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EsploraInput {
    pub prevout: Option<EsploraOutput>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EsploraOutput {
    pub value: u64,
    pub scriptpubkey_address: Option<String>,
}

pub struct BlockstreamClient {
    http: reqwest::Client,
    base_url: String,
}

impl BlockstreamClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn transaction(&self, txid: &str) -> Result<Option<Transaction>, SourceError> {
        let response = self
            .http
            .get(format!("{}/tx/{}", self.base_url, txid))
            .send()
            .await?;

        if is_unknown_transaction(response.status()) {
            return Ok(None);
        }

        let tx = response
            .error_for_status()?
            .json::<EsploraTransaction>()
            .await?;
        normalize(tx).map(Some)
    }

    /// Esplora only lists an address's newest transactions, so a block window is
    /// applied to that page rather than to the whole history.
    pub async fn address_history(
        &self,
        address: &str,
        window: HistoryWindow,
    ) -> Result<Vec<Transaction>, SourceError> {
        let page = self
            .http
            .get(format!("{}/address/{}/txs", self.base_url, address))
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<EsploraTransaction>>()
            .await?;

        let history = select_window(page, window);
        debug!("bitcoin history for {}: {} transactions", address, history.len());
        Ok(history)
    }
}

/// Esplora answers 400 for hashes it can't parse and 404 for unknown ones.
pub(crate) fn is_unknown_transaction(status: StatusCode) -> bool {
    matches!(status, StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST)
}

pub(crate) fn select_window(page: Vec<EsploraTransaction>, window: HistoryWindow) -> Vec<Transaction> {
    let normalized = page.into_iter().filter_map(|tx| {
        normalize(tx)
            .inspect_err(|e| debug!("Skipping esplora transaction: {}", e))
            .ok()
    });

    match window {
        HistoryWindow::Recent(limit) => normalized.take(limit).collect(),
        HistoryWindow::Blocks { .. } => normalized
            .filter(|tx| window.contains_block(tx.block_number))
            .collect(),
    }
}

/// First input's funding address becomes `from`, first output's address `to`,
/// and the value is everything the transaction pays out.
pub(crate) fn normalize(tx: EsploraTransaction) -> Result<Transaction, SourceError> {
    let from = tx
        .vin
        .first()
        .and_then(|input| input.prevout.as_ref())
        .and_then(|prevout| prevout.scriptpubkey_address.clone())
        .unwrap_or_default();
    let to = tx
        .vout
        .first()
        .and_then(|output| output.scriptpubkey_address.clone())
        .unwrap_or_default();
    let paid_out: u64 = tx.vout.iter().map(|output| output.value).sum();

    let (confirmed, block_number, block_time) = match &tx.status {
        Some(status) => (
            status.confirmed,
            status.block_height.unwrap_or_default(),
            status.block_time,
        ),
        None => (false, 0, None),
    };

    let mut normalized = Transaction::new(
        tx.txid,
        Network::Bitcoin,
        from,
        to,
        format_native(U256::from(paid_out), Network::Bitcoin)?,
        block_number,
        block_time.map(|secs| secs.saturating_mul(1000)).unwrap_or_else(now_ms),
    );
    normalized.gas_used = tx.fee.unwrap_or_default().to_string();
    normalized.status = if confirmed {
        TxStatus::Success
    } else {
        TxStatus::Pending
    };
    Ok(normalized)
}
