use crate::types::Transaction;
use anyhow::{Context, Result};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{Graph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Directed;
use polars::prelude::*;
use std::collections::HashMap;
use std::fmt::{Display, Write};
use std::fs::File;
use std::path::Path;

///
/// PathGraph
///
/// A traced path laid out as a directed graph: nodes are addresses, edges are the hops between them.
///
pub type PathGraph = Graph<String, HopEdge, Directed>;

#[derive(Debug, Clone, PartialEq)]
pub struct HopEdge {
    pub tx_hash: String,
    pub value: String,
    pub block_number: u64,
}

impl Display for HopEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "HopEdge {{ tx_hash: {}, value: {}, block_number: {} }}",
            self.tx_hash, self.value, self.block_number
        )
    }
}

/// Lay a path out as an address graph. Contract creations have no `to` and are left out.
pub fn build_path_graph(path: &[Transaction]) -> PathGraph {
    let mut graph = PathGraph::new();
    let mut addr_idx_map: HashMap<String, NodeIndex> = HashMap::new();

    for tx in path.iter().filter(|tx| !tx.from.is_empty() && !tx.to.is_empty()) {
        let from_idx = *addr_idx_map
            .entry(tx.from.clone())
            .or_insert_with(|| graph.add_node(tx.from.clone()));
        let to_idx = *addr_idx_map
            .entry(tx.to.clone())
            .or_insert_with(|| graph.add_node(tx.to.clone()));

        graph.add_edge(
            from_idx,
            to_idx,
            HopEdge {
                tx_hash: tx.hash.clone(),
                value: tx.value.clone(),
                block_number: tx.block_number,
            },
        );
    }

    graph
}

/// Write a PathGraph into a DOT string for visualization
///
/// Paste into `https://dreampuf.github.io/GraphvizOnline/?engine=dot` or pipe to `dot -Tsvg`.
pub fn write_graph_to_dot(graph: &PathGraph) -> String {
    let mut dot = String::new();
    writeln!(dot, "digraph PathGraph {{").unwrap();
    writeln!(dot, "  node [shape=ellipse];").unwrap();
    writeln!(dot, "  edge [dir=forward];").unwrap();
    writeln!(dot).unwrap();

    for node_idx in graph.node_indices() {
        let address = &graph[node_idx];
        writeln!(dot, "  \"{}\" [label=\"{:.10}...\"];", address, address).unwrap();
    }

    writeln!(dot).unwrap();

    for edge in graph.edge_references() {
        let from_addr = &graph[edge.source()];
        let to_addr = &graph[edge.target()];
        let hop = edge.weight();

        writeln!(
            dot,
            "  \"{}\" -> \"{}\" [label=\"{}\\nBlock {}\" tooltip=\"Tx: {}\"];",
            from_addr, to_addr, hop.value, hop.block_number, hop.tx_hash
        )
        .unwrap();
    }

    writeln!(dot, "}}").unwrap();
    dot
}

/// Strongly connected groups of more than one address, i.e. funds that came back around.
pub fn find_closed_loops(graph: &PathGraph) -> Vec<PathGraph> {
    let mut closed_loops = Vec::new();

    let mut components = tarjan_scc(graph);
    components.retain(|scc| scc.len() > 1);

    for scc in components {
        let mut index_mapping = HashMap::new();
        let mut loop_graph = PathGraph::new();

        for node in &scc {
            let new_idx = loop_graph.add_node(graph[*node].clone());
            index_mapping.insert(*node, new_idx);
        }

        for edge in graph.edge_references() {
            let (source, target) = (edge.source(), edge.target());
            if let (Some(new_source), Some(new_target)) =
                (index_mapping.get(&source), index_mapping.get(&target))
            {
                loop_graph.add_edge(*new_source, *new_target, edge.weight().clone());
            }
        }

        closed_loops.push(loop_graph);
    }

    closed_loops
}

/// A path as a DataFrame, in the column layout `FrameTransactionSource` reads.
pub fn path_to_frame(path: &[Transaction]) -> PolarsResult<DataFrame> {
    let strings = |f: fn(&Transaction) -> &str| path.iter().map(f).collect::<Vec<&str>>();

    df!(
        "hash" => strings(|tx| tx.hash.as_str()),
        "network" => strings(|tx| tx.network.as_str()),
        "from" => strings(|tx| tx.from.as_str()),
        "to" => strings(|tx| tx.to.as_str()),
        "value" => strings(|tx| tx.value.as_str()),
        "block_number" => path.iter().map(|tx| tx.block_number).collect::<Vec<u64>>(),
        "timestamp" => path.iter().map(|tx| tx.timestamp).collect::<Vec<u64>>(),
        "gas" => strings(|tx| tx.gas.as_str()),
        "gas_price" => strings(|tx| tx.gas_price.as_str()),
        "gas_used" => strings(|tx| tx.gas_used.as_str()),
        "status" => strings(|tx| tx.status.as_str()),
    )
}

/// Save a path as CSV so it can be replayed later with `FrameTransactionSource::from_csv`.
pub fn write_path_csv(path: &[Transaction], output: impl AsRef<Path>) -> Result<()> {
    let output = output.as_ref();
    let mut frame = path_to_frame(path).context("Failed to build path frame")?;
    let mut file = File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut frame)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_sources::{FrameTransactionSource, TransactionSource};
    use crate::types::{HistoryWindow, Network, TxStatus};

    fn tx(hash: &str, from: &str, to: &str, value: &str) -> Transaction {
        Transaction::new(hash, Network::Ethereum, from, to, value, 7, 1_000)
    }

    #[test]
    fn graph_has_one_node_per_address() {
        let path = vec![
            tx("A", "0x1", "0x2", "10"),
            tx("B", "0x2", "0x3", "9"),
            tx("C", "0x3", "", "1"),
        ];
        let graph = build_path_graph(&path);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);

        let dot = write_graph_to_dot(&graph);
        assert!(dot.starts_with("digraph PathGraph {"));
        assert!(dot.contains("\"0x1\" -> \"0x2\""));
        assert!(dot.contains("tooltip=\"Tx: B\""));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn empty_graph_is_still_valid_dot() {
        let dot = write_graph_to_dot(&PathGraph::new());
        assert_eq!(
            dot,
            "digraph PathGraph {\n  node [shape=ellipse];\n  edge [dir=forward];\n\n\n}\n"
        );
    }

    #[test]
    fn reflux_is_a_closed_loop() {
        let path = vec![
            tx("A", "0x1", "0x2", "10"),
            tx("B", "0x2", "0x1", "9"),
            tx("C", "0x2", "0x3", "1"),
        ];
        let loops = find_closed_loops(&build_path_graph(&path));
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].node_count(), 2);
        assert_eq!(loops[0].edge_count(), 2);

        let straight = vec![tx("A", "0x1", "0x2", "10"), tx("B", "0x2", "0x3", "9")];
        assert!(find_closed_loops(&build_path_graph(&straight)).is_empty());
    }

    #[tokio::test]
    async fn exported_frame_can_be_replayed() {
        let mut failed = tx("B", "0x2", "0x3", "9");
        failed.status = TxStatus::Failed;
        let path = vec![tx("A", "0x1", "0x2", "10"), failed];

        let source = FrameTransactionSource::new(path_to_frame(&path).unwrap());
        let replayed = source
            .fetch_transaction("B", Network::Ethereum)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replayed, path[1]);

        let history = source
            .fetch_address_history("0x2", Network::Ethereum, HistoryWindow::Recent(10))
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("path.csv");
        let path = vec![tx("A", "0x1", "0x2", "10"), tx("B", "0x2", "", "0.5")];

        write_path_csv(&path, &file).unwrap();
        let source = FrameTransactionSource::from_csv(&file).unwrap();

        let replayed = source
            .fetch_transaction("B", Network::Ethereum)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replayed.to, "");
        assert_eq!(replayed.value, "0.5");
        assert_eq!(replayed.block_number, 7);
        assert_eq!(replayed.timestamp, 1_000);
    }
}
