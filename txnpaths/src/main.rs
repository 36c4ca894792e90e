use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use txnpaths::{
    config::*,
    data_sources::*,
    explorer::{ExplorerSource, OklinkClient},
    graph_utils::*,
    summary::*,
    traversal::*, types::*,
};

#[derive(Parser, Debug)]
#[command(version, about = "Trace a plausible fund-flow path from a seed transaction")]
struct Args {
    #[arg(short = 't', long)]
    tx_hash: String,
    #[arg(short, long, default_value = "ethereum")]
    network: Network,
    #[arg(short = 'd', long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,
    #[arg(long, default_value_t = DEFAULT_FAN_OUT)]
    fan_out: usize,
    #[arg(long, default_value_t = DEFAULT_TIME_WINDOW_MS / 1000)]
    time_window_secs: u64,
    #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
    history_limit: usize,
    /// Replay transactions from a CSV export instead of querying explorers.
    #[arg(long)]
    csv_source: Option<PathBuf>,
    /// Write the traced path as CSV.
    #[arg(long)]
    output_csv: Option<PathBuf>,
    /// Print the address graph in DOT format, plus any closed loops.
    #[arg(long)]
    dot: bool,
    /// Print the path as JSON instead of a summary. Skips address risk lookups.
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    explorer: ExplorerConfig,
}

impl Args {
    fn trace_config(&self) -> TraceConfig {
        TraceConfig {
            max_depth: self.max_depth,
            fan_out: self.fan_out,
            time_window_ms: self.time_window_secs.saturating_mul(1000),
            history_limit: self.history_limit,
            ..TraceConfig::default()
        }
    }
}

fn init_tracing() {
    // logs go to stderr so stdout stays clean for --json / --dot
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match std::env::var(LOG_FORMAT_ENV).as_deref() {
        Ok("json") => builder.json().init(),
        _ => builder.init(),
    }
}

async fn trace<D: TransactionSource>(args: &Args, source: D) -> Vec<Transaction> {
    let tracer = PathTracer::new(source, args.trace_config());
    tracer.trace_path(&args.tx_hash, args.network).await
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting txnpaths");
    let args = Args::parse();
    info!("Seed transaction: {} on {}", args.tx_hash, args.network);
    if args.fan_out == 0 {
        warn!("Fan-out is 0, only the seed transaction will be returned.");
    }

    let path = match &args.csv_source {
        Some(csv) => {
            info!("Initializing FrameTransactionSource from {}", csv.display());
            let source = FrameTransactionSource::from_csv(csv)?;
            trace(&args, source).await
        }
        None => {
            info!("Initializing ExplorerSource");
            let source = ExplorerSource::from_config(&args.explorer)
                .context("Failed to configure explorers")?;
            trace(&args, source).await
        }
    };

    if path.is_empty() {
        warn!(
            "No path: {} could not be resolved on {}",
            args.tx_hash, args.network
        );
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&path).context("Failed to serialize path")?
        );
    } else {
        let mut summary = PathSummary::from_path(&path).with_flow_table();
        if let Some(risk_client) = OklinkClient::from_config(&args.explorer)? {
            let risks = risk_client.path_risks(&path).await;
            info!("Risk data for {} addresses", risks.len());
            summary = summary.with_address_risks(risks);
        }
        print!("{}", summary);
    }

    if args.dot && !path.is_empty() {
        let graph = build_path_graph(&path);
        println!("{}", write_graph_to_dot(&graph));

        let closed_loops = find_closed_loops(&graph);
        for (i, loop_graph) in closed_loops.iter().enumerate() {
            info!(
                "Closed loop {} spans {} addresses over {} hops",
                i,
                loop_graph.node_count(),
                loop_graph.edge_count()
            );
        }
    }

    if let Some(output) = &args.output_csv {
        write_path_csv(&path, output)?;
        info!("Path written to {}", output.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_time_window_saturates() {
        let args = Args::try_parse_from([
            "txnpaths",
            "-t",
            "0xabc",
            "--time-window-secs",
            "18446744073709551615",
        ])
        .unwrap();
        assert_eq!(args.trace_config().time_window_ms, u64::MAX);
        assert_eq!(args.network, Network::Ethereum);
    }
}
