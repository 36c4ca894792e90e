use crate::{error::SourceError, types::*};
use anyhow::Context;
use async_trait::async_trait;
use polars::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// TransactionSource
///
/// A generic trait across the places we can fetch transactions from.
///
/// `fetch_transaction` returns `Ok(None)` when the hash is unknown to the source.
/// Retries, auth and timeouts belong to the implementation.
///
#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn fetch_transaction(
        &self,
        hash: &str,
        network: Network,
    ) -> Result<Option<Transaction>, SourceError>;

    async fn fetch_address_history(
        &self,
        address: &str,
        network: Network,
        window: HistoryWindow,
    ) -> Result<Vec<Transaction>, SourceError>;
}

/// FrameTransactionSource
///
/// An offline data source backed by a polars DataFrame of already normalized transactions.
///
/// Each row of the DataFrame should be a single transaction, and it should have the following columns:
/// - `hash`
/// - `network`
/// - `from`
/// - `to`
/// - `value`
/// - `block_number`
/// - `timestamp`
///
/// `gas`, `gas_price`, `gas_used` and `status` are picked up when present.
/// This is the same layout `graph_utils::write_path_csv` writes, so a traced path
/// (or any export in that shape) can be replayed without touching an explorer.
///
pub struct FrameTransactionSource {
    pub transactions: DataFrame,
}

const OPTIONAL_COLUMNS: [&str; 4] = ["gas", "gas_price", "gas_used", "status"];

impl FrameTransactionSource {
    pub fn new(transactions: DataFrame) -> Self {
        Self { transactions }
    }

    /// Load a CSV export. Every column is read as a string and cast where needed.
    pub fn from_csv(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let transactions = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .with_context(|| format!("Failed to open {}", path.display()))?
            .finish()
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        info!(
            "Loaded {} transactions from {}",
            transactions.height(),
            path.display()
        );
        Ok(Self::new(transactions))
    }

    fn select(&self, predicate: Expr) -> Result<Vec<Transaction>, SourceError> {
        let mut columns = vec![
            col("hash").cast(DataType::String),
            col("network").cast(DataType::String),
            col("from").cast(DataType::String),
            col("to").cast(DataType::String),
            col("value").cast(DataType::String),
            col("block_number").cast(DataType::UInt64),
            col("timestamp").cast(DataType::UInt64),
        ];
        let optional: Vec<&str> = OPTIONAL_COLUMNS
            .into_iter()
            .filter(|name| self.transactions.column(name).is_ok())
            .collect();
        columns.extend(optional.iter().map(|name| col(*name).cast(DataType::String)));

        let rows = self
            .transactions
            .clone()
            .lazy()
            .filter(predicate)
            .select(columns)
            .collect()?;

        debug!("frame rows matched: {}", rows.height());

        let col_hash = rows.column("hash")?.str()?;
        let col_network = rows.column("network")?.str()?;
        let col_from = rows.column("from")?.str()?;
        let col_to = rows.column("to")?.str()?;
        let col_value = rows.column("value")?.str()?;
        let col_block_number = rows.column("block_number")?.u64()?;
        let col_timestamp = rows.column("timestamp")?.u64()?;

        let mut transactions = Vec::with_capacity(rows.height());
        for row in 0..rows.height() {
            let hash = col_hash
                .get(row)
                .ok_or_else(|| SourceError::Malformed(format!("missing hash in row {row}")))?;
            let network: Network = col_network
                .get(row)
                .ok_or_else(|| SourceError::Malformed(format!("missing network in row {row}")))?
                .parse()?;

            let mut tx = Transaction::new(
                hash,
                network,
                col_from.get(row).unwrap_or_default(),
                col_to.get(row).unwrap_or_default(),
                col_value.get(row).unwrap_or("0"),
                col_block_number.get(row).unwrap_or_default(),
                col_timestamp.get(row).unwrap_or_default(),
            );

            for name in &optional {
                let value = rows.column(name)?.str()?.get(row).unwrap_or_default();
                match *name {
                    "gas" => tx.gas = value.to_string(),
                    "gas_price" => tx.gas_price = value.to_string(),
                    "gas_used" => tx.gas_used = value.to_string(),
                    "status" => tx.status = value.parse().unwrap_or(TxStatus::Pending),
                    _ => {}
                }
            }
            transactions.push(tx);
        }

        Ok(transactions)
    }
}

#[async_trait]
impl TransactionSource for FrameTransactionSource {
    async fn fetch_transaction(
        &self,
        hash: &str,
        network: Network,
    ) -> Result<Option<Transaction>, SourceError> {
        let predicate = col("hash")
            .cast(DataType::String)
            .eq(lit(hash.to_string()))
            .and(col("network").cast(DataType::String).eq(lit(network.as_str())));

        Ok(self.select(predicate)?.into_iter().next())
    }

    async fn fetch_address_history(
        &self,
        address: &str,
        network: Network,
        window: HistoryWindow,
    ) -> Result<Vec<Transaction>, SourceError> {
        let mut predicate = col("from")
            .cast(DataType::String)
            .eq(lit(address.to_string()))
            .or(col("to").cast(DataType::String).eq(lit(address.to_string())))
            .and(col("network").cast(DataType::String).eq(lit(network.as_str())));

        if let HistoryWindow::Blocks { start, end } = window {
            let block = col("block_number").cast(DataType::UInt64);
            predicate = predicate.and(block.clone().gt_eq(lit(start)).and(block.lt_eq(lit(end))));
        }

        let mut transactions = self.select(predicate)?;
        if let HistoryWindow::Recent(limit) = window {
            transactions.sort_by(|a, b| b.block_number.cmp(&a.block_number));
            transactions.truncate(limit);
        }
        Ok(transactions)
    }
}

/// In-memory source for tests: serves registered transactions, derives address
/// histories from them, and can be told to fail lookups for given hashes or addresses.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct MemorySource {
        transactions: Vec<Transaction>,
        failing: HashSet<String>,
        failing_seeds: HashSet<String>,
        pub history_calls: AtomicUsize,
        pub windows: Mutex<Vec<(String, HistoryWindow)>>,
    }

    impl MemorySource {
        pub fn new(transactions: Vec<Transaction>) -> Self {
            Self {
                transactions,
                ..Default::default()
            }
        }

        pub fn failing_on(mut self, address: &str) -> Self {
            self.failing.insert(address.to_string());
            self
        }

        pub fn failing_seed(mut self, hash: &str) -> Self {
            self.failing_seeds.insert(hash.to_string());
            self
        }

        pub fn calls(&self) -> usize {
            self.history_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TransactionSource for MemorySource {
        async fn fetch_transaction(
            &self,
            hash: &str,
            network: Network,
        ) -> Result<Option<Transaction>, SourceError> {
            if self.failing_seeds.contains(hash) {
                return Err(SourceError::Api(format!("lookup of {hash} failed")));
            }
            Ok(self
                .transactions
                .iter()
                .find(|tx| tx.hash == hash && tx.network == network)
                .cloned())
        }

        async fn fetch_address_history(
            &self,
            address: &str,
            network: Network,
            window: HistoryWindow,
        ) -> Result<Vec<Transaction>, SourceError> {
            self.history_calls.fetch_add(1, Ordering::SeqCst);
            self.windows
                .lock()
                .unwrap()
                .push((address.to_string(), window));

            if self.failing.contains(address) {
                return Err(SourceError::Api(format!("lookup failed for {address}")));
            }

            let mut history: Vec<Transaction> = self
                .transactions
                .iter()
                .filter(|tx| tx.network == network)
                .filter(|tx| tx.from == address || tx.to == address)
                .filter(|tx| window.contains_block(tx.block_number))
                .cloned()
                .collect();
            if let HistoryWindow::Recent(limit) = window {
                history.sort_by(|a, b| b.block_number.cmp(&a.block_number));
                history.truncate(limit);
            }
            Ok(history)
        }
    }
}
