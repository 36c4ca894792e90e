use crate::types::{AddressRisk, Network, RiskLevel, Transaction};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;

///
/// Hop
///
/// One transaction of a traced path, reduced to what a report shows.
///
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hop {
    pub hash: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_risk: Option<RiskLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_risk: Option<RiskLevel>,
}

impl From<&Transaction> for Hop {
    fn from(tx: &Transaction) -> Self {
        Self {
            hash: tx.hash.clone(),
            from: tx.from.clone(),
            to: tx.to.clone(),
            value: tx.value.clone(),
            timestamp: tx.timestamp,
            from_risk: None,
            to_risk: None,
        }
    }
}

impl Display for Hop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.18} {:.42} -> {:.42} {} at {}",
            self.hash, self.from, self.to, self.value, self.timestamp
        )?;
        if self.from_risk.is_some() || self.to_risk.is_some() {
            let level = |risk: Option<RiskLevel>| risk.map_or("-", |r| r.as_str());
            write!(f, " [risk {} -> {}]", level(self.from_risk), level(self.to_risk))?;
        }
        Ok(())
    }
}

/// Hops between one pair of addresses, folded together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedFlow {
    pub from: String,
    pub to: String,
    pub no_hops: usize,
    pub total_value: f64,
}

impl Display for AggregatedFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.42} -> {:.42} moved {} over {} hops",
            self.from, self.to, self.total_value, self.no_hops
        )
    }
}

/// PathSummary
///
/// What the report layer needs from a traced path: the hops in discovery order plus a few totals.
///
/// The per-address-pair flow table is optional, same as building it is.
#[derive(Debug, Clone, Serialize)]
pub struct PathSummary {
    pub network: Option<Network>,
    pub hops: Vec<Hop>,
    pub total_hops: usize,
    pub distinct_addresses: usize,
    /// Sum of every parseable hop value, in native units.
    pub total_value: f64,
    /// Milliseconds between the earliest and latest hop.
    pub time_span_ms: u64,
    pub flow_table: Option<Vec<AggregatedFlow>>,
    pub address_risks: Option<Vec<AddressRisk>>,
}

impl PathSummary {
    pub fn from_path(path: &[Transaction]) -> Self {
        let hops: Vec<Hop> = path.iter().map(Hop::from).collect();

        let distinct_addresses = path
            .iter()
            .flat_map(|tx| [tx.from.as_str(), tx.to.as_str()])
            .filter(|address| !address.is_empty())
            .collect::<HashSet<_>>()
            .len();

        let total_value = path.iter().filter_map(Transaction::value_amount).sum();

        let time_span_ms = match (
            path.iter().map(|tx| tx.timestamp).min(),
            path.iter().map(|tx| tx.timestamp).max(),
        ) {
            (Some(earliest), Some(latest)) => latest - earliest,
            _ => 0,
        };

        PathSummary {
            network: path.first().map(|tx| tx.network),
            total_hops: hops.len(),
            hops,
            distinct_addresses,
            total_value,
            time_span_ms,
            flow_table: None,
            address_risks: None,
        }
    }

    pub fn with_flow_table(self) -> Self {
        // keyed by address pair, in first-seen order
        let mut order: Vec<(String, String)> = Vec::new();
        let mut acc: HashMap<(String, String), (usize, f64)> = HashMap::new();

        for hop in &self.hops {
            let key = (hop.from.clone(), hop.to.clone());
            let value = hop.value.parse::<f64>().unwrap_or(0.0);
            let entry = acc.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                (0, 0.0)
            });
            entry.0 += 1;
            entry.1 += value;
        }

        let flow_table = order
            .into_iter()
            .map(|(from, to)| {
                let (no_hops, total_value) = acc[&(from.clone(), to.clone())];
                AggregatedFlow {
                    from,
                    to,
                    no_hops,
                    total_value,
                }
            })
            .collect();

        Self {
            flow_table: Some(flow_table),
            ..self
        }
    }

    /// Tag each hop with the risk of its endpoints. Addresses match case-insensitively.
    pub fn with_address_risks(self, risks: Vec<AddressRisk>) -> Self {
        let by_address: HashMap<String, RiskLevel> = risks
            .iter()
            .map(|risk| (risk.address.to_ascii_lowercase(), risk.level))
            .collect();
        let lookup = |address: &str| by_address.get(&address.to_ascii_lowercase()).copied();

        let hops = self
            .hops
            .into_iter()
            .map(|hop| Hop {
                from_risk: lookup(&hop.from),
                to_risk: lookup(&hop.to),
                ..hop
            })
            .collect();

        Self {
            hops,
            address_risks: Some(risks),
            ..self
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn has_flow_table(&self) -> bool {
        self.flow_table.is_some()
    }

    pub fn has_address_risks(&self) -> bool {
        self.address_risks.is_some()
    }
}

impl Display for PathSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return writeln!(f, "No traceable path.");
        }

        let network = self.network.map(|n| n.to_string()).unwrap_or_default();
        writeln!(
            f,
            "Path on {}: {} hops across {} addresses, {} moved over {}s",
            network,
            self.total_hops,
            self.distinct_addresses,
            self.total_value,
            self.time_span_ms / 1000
        )?;
        for (i, hop) in self.hops.iter().enumerate() {
            writeln!(f, "  {:>2}. {}", i, hop)?;
        }

        if let Some(table) = &self.flow_table {
            writeln!(f, "Flows:")?;
            let mut sorted_table = table.clone();
            sorted_table.sort_by(|a, b| b.no_hops.cmp(&a.no_hops));
            for flow in sorted_table {
                writeln!(f, "  {}", flow)?;
            }
        }

        if let Some(risks) = &self.address_risks {
            writeln!(f, "Address risk:")?;
            let mut sorted_risks = risks.clone();
            sorted_risks.sort_by(|a, b| b.level.cmp(&a.level));
            for risk in sorted_risks {
                writeln!(
                    f,
                    "  {:.42} {} (score {}, {} flagged counterparties)",
                    risk.address, risk.level, risk.risk_score, risk.associate_black_addresses
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(hash: &str, from: &str, to: &str, value: &str, timestamp: u64) -> Transaction {
        Transaction::new(hash, Network::Ethereum, from, to, value, 1, timestamp)
    }

    #[test]
    fn totals_cover_the_whole_path() {
        let path = vec![
            tx("A", "0x1", "0x2", "10", 5_000),
            tx("B", "0x2", "0x3", "9.5", 65_000),
            tx("C", "0x3", "", "junk", 1_000),
        ];
        let summary = PathSummary::from_path(&path);

        assert_eq!(summary.total_hops, 3);
        assert_eq!(summary.distinct_addresses, 3);
        assert_eq!(summary.total_value, 19.5);
        assert_eq!(summary.time_span_ms, 64_000);
        assert_eq!(summary.network, Some(Network::Ethereum));
        assert_eq!(summary.hops[1].hash, "B");
        assert!(!summary.has_flow_table());
    }

    #[test]
    fn flow_table_folds_repeated_pairs() {
        let path = vec![
            tx("A", "0x1", "0x2", "10", 0),
            tx("B", "0x2", "0x1", "4", 0),
            tx("C", "0x1", "0x2", "5", 0),
        ];
        let summary = PathSummary::from_path(&path).with_flow_table();
        let table = summary.flow_table.as_ref().unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table[0].from, "0x1");
        assert_eq!(table[0].no_hops, 2);
        assert_eq!(table[0].total_value, 15.0);
        assert_eq!(table[1].no_hops, 1);
    }

    #[test]
    fn empty_path_renders_as_no_path() {
        let summary = PathSummary::from_path(&[]);
        assert!(summary.is_empty());
        assert_eq!(summary.network, None);
        assert_eq!(summary.to_string(), "No traceable path.\n");
    }

    fn risk(address: &str, level: RiskLevel) -> AddressRisk {
        AddressRisk {
            address: address.to_string(),
            level,
            risk_score: 0.0,
            associate_black_addresses: "0".to_string(),
            interaction_time: String::new(),
            amount: String::new(),
            malicious_address_list: Vec::new(),
        }
    }

    #[test]
    fn address_risks_tag_hops() {
        let path = vec![tx("A", "0xab", "0xcd", "10", 0), tx("B", "0xcd", "0xef", "9", 0)];
        let summary = PathSummary::from_path(&path).with_address_risks(vec![
            risk("0xAB", RiskLevel::Low),
            risk("0xcd", RiskLevel::Severe),
        ]);

        assert!(summary.has_address_risks());
        assert_eq!(summary.hops[0].from_risk, Some(RiskLevel::Low));
        assert_eq!(summary.hops[0].to_risk, Some(RiskLevel::Severe));
        assert_eq!(summary.hops[1].from_risk, Some(RiskLevel::Severe));
        assert_eq!(summary.hops[1].to_risk, None);

        let rendered = summary.to_string();
        assert!(rendered.contains("[risk LOW -> SEVERE]"));
        assert!(rendered.contains("[risk SEVERE -> -]"));
        // worst first
        let severe = rendered.find("0xcd SEVERE").unwrap();
        let low = rendered.find("0xAB LOW").unwrap();
        assert!(severe < low);
    }
}
