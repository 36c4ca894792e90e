use crate::{data_sources::*, types::*};
use alloy_primitives::U256;
use std::collections::HashSet;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_DEPTH: usize = 5;
pub const DEFAULT_FAN_OUT: usize = 3;
pub const DEFAULT_TIME_WINDOW_MS: u64 = 60 * 60 * 1000;

///
/// ValueRatio
///
/// A bound on candidate value / parent value, kept as a fraction so it can be
/// checked against base-unit amounts without rounding.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRatio {
    pub numerator: u64,
    pub denominator: u64,
}

impl ValueRatio {
    pub const fn new(numerator: u64, denominator: u64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// `candidate / parent > self`
    pub fn exceeded_by(&self, candidate: U256, parent: U256) -> bool {
        candidate.saturating_mul(U256::from(self.denominator))
            > parent.saturating_mul(U256::from(self.numerator))
    }

    /// `candidate / parent < self`
    pub fn undercut_by(&self, candidate: U256, parent: U256) -> bool {
        candidate.saturating_mul(U256::from(self.denominator))
            < parent.saturating_mul(U256::from(self.numerator))
    }
}

///
/// TraceConfig
///
/// Heuristic knobs for `PathTracer`.
///
#[derive(Debug, Clone, PartialEq)]
pub struct TraceConfig {
    /// Nodes at this depth are kept but not expanded.
    pub max_depth: usize,
    /// Candidates expanded per node.
    pub fan_out: usize,
    /// Candidates must be strictly closer than this in time.
    pub time_window_ms: u64,
    /// Exclusive lower bound on candidate value / parent value.
    pub min_value_ratio: ValueRatio,
    /// Exclusive upper bound on candidate value / parent value.
    pub max_value_ratio: ValueRatio,
    /// Passed to ledger-style history lookups, and account lookups when the block is unknown.
    pub history_limit: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            fan_out: DEFAULT_FAN_OUT,
            time_window_ms: DEFAULT_TIME_WINDOW_MS,
            min_value_ratio: ValueRatio::new(1, 10),
            max_value_ratio: ValueRatio::new(10, 1),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

///
/// TraceStack
///
/// Transactions still to visit, with their depth. Popped LIFO so the walk is depth-first.
///
type TraceStack = Vec<(Transaction, usize)>;

///
/// PathTracer
///
/// Builds a best-effort chain of transactions that plausibly belong to one fund flow,
/// starting from a seed transaction and linking through shared addresses, time and value.
///
pub struct PathTracer<D: TransactionSource> {
    source: D,
    config: TraceConfig,
}

impl<D: TransactionSource> PathTracer<D> {
    pub fn new(source: D, config: TraceConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn source(&self) -> &D {
        &self.source
    }

    pub async fn trace_path(&self, seed_hash: &str, network: Network) -> Vec<Transaction> {
        self.trace_path_with_depth(seed_hash, network, self.config.max_depth)
            .await
    }

    /// Trace from `seed_hash`, returning transactions in discovery order with the seed first.
    ///
    /// Never fails: an unresolvable seed gives an empty path, and failed history lookups
    /// just contribute no candidates.
    pub async fn trace_path_with_depth(
        &self,
        seed_hash: &str,
        network: Network,
        max_depth: usize,
    ) -> Vec<Transaction> {
        let seed = match self.source.fetch_transaction(seed_hash, network).await {
            Ok(Some(seed)) => seed,
            Ok(None) => {
                info!("Seed transaction {} not found on {}", seed_hash, network);
                return Vec::new();
            }
            Err(e) => {
                warn!("Failed to fetch seed transaction {}: {}", seed_hash, e);
                return Vec::new();
            }
        };

        info!(
            "Tracing from {} on {} (max depth {})",
            seed.hash, network, max_depth
        );

        let mut path: Vec<Transaction> = Vec::new();
        // visited holds every hash already in the path
        let mut visited: HashSet<String> = HashSet::new();
        let mut stack = TraceStack::new();
        stack.push((seed, 0));

        while let Some((tx, depth)) = stack.pop() {
            // a sibling's subtree may have reached this one first
            if !visited.insert(tx.hash.clone()) {
                continue;
            }
            path.push(tx.clone());

            if depth >= max_depth {
                continue;
            }

            let candidates = self.ranked_candidates(&tx, &visited).await;
            debug!(
                "{} at depth {}: {} candidates, expanding up to {}",
                tx.hash,
                depth,
                candidates.len(),
                self.config.fan_out
            );

            // pushed in reverse so the best candidate is popped first
            for (candidate, _) in candidates.into_iter().take(self.config.fan_out).rev() {
                stack.push((candidate, depth + 1));
            }
        }

        info!("Traced {} transactions from {}", path.len(), seed_hash);
        path
    }

    /// Candidates for continuing from `tx`, filtered and sorted by descending score.
    /// Ties keep the order they were fetched in.
    async fn ranked_candidates(
        &self,
        tx: &Transaction,
        visited: &HashSet<String>,
    ) -> Vec<(Transaction, f64)> {
        let merged = self.related_transactions(tx).await;

        let mut seen: HashSet<String> = HashSet::new();
        let mut ranked: Vec<(Transaction, f64)> = merged
            .into_iter()
            .filter(|candidate| candidate.hash != tx.hash && !visited.contains(&candidate.hash))
            .filter(|candidate| seen.insert(candidate.hash.clone()))
            .filter(|candidate| self.is_likely_chained(tx, candidate))
            .map(|candidate| {
                let score = self.likelihood_score(tx, &candidate);
                (candidate, score)
            })
            .collect();

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    /// History of `tx.from` followed by history of `tx.to`.
    async fn related_transactions(&self, tx: &Transaction) -> Vec<Transaction> {
        let window = tx
            .network
            .history_strategy()
            .window_for(tx, self.config.history_limit);

        let mut related = Vec::new();
        for address in [&tx.from, &tx.to] {
            if address.is_empty() {
                continue;
            }
            match self
                .source
                .fetch_address_history(address, tx.network, window)
                .await
            {
                Ok(history) => related.extend(history),
                Err(e) => warn!(
                    "History lookup for {} on {} failed, skipping branch: {}",
                    address, tx.network, e
                ),
            }
        }
        related
    }

    /// Address connectivity, temporal proximity and value relation must all hold.
    pub fn is_likely_chained(&self, parent: &Transaction, candidate: &Transaction) -> bool {
        if candidate.from.is_empty() || candidate.to.is_empty() {
            return false;
        }

        let connected = (!parent.to.is_empty() && candidate.from == parent.to)
            || (!parent.from.is_empty() && candidate.to == parent.from);
        if !connected {
            return false;
        }

        if parent.timestamp.abs_diff(candidate.timestamp) >= self.config.time_window_ms {
            return false;
        }

        match (parent.base_units(), candidate.base_units()) {
            (Some(parent_value), Some(candidate_value)) => {
                self.config.min_value_ratio.exceeded_by(candidate_value, parent_value)
                    && self.config.max_value_ratio.undercut_by(candidate_value, parent_value)
            }
            _ => false,
        }
    }

    /// Ranking score: 50 for a forward continuation, 30 for a reflux back to the sender,
    /// up to 20 for closeness in minutes and up to 10 for similar value.
    pub fn likelihood_score(&self, parent: &Transaction, candidate: &Transaction) -> f64 {
        let mut score = 0.0;

        if !parent.to.is_empty() && parent.to == candidate.from {
            score += 50.0;
        }
        if !parent.from.is_empty() && parent.from == candidate.to {
            score += 30.0;
        }

        let minutes_apart = parent.timestamp.abs_diff(candidate.timestamp) as f64 / 60_000.0;
        score += (20.0 - minutes_apart).max(0.0);

        if let (Some(a), Some(b)) = (parent.value_amount(), candidate.value_amount()) {
            score += 10.0 * a.min(b) / a.max(b);
        }

        score
    }
}
