// Basic types used throughout txnpaths
pub mod types;
pub mod error;
pub mod config;

// Source trait and a polars-backed offline source
pub mod data_sources;
// Explorer sources (Etherscan, Blockstream) and OKLink address risk
pub mod explorer;
// The path tracer itself
pub mod traversal;

// Types and functions for summarizing a traced path
pub mod summary;

// Graph view, DOT/CSV export and loop detection for a traced path
pub mod graph_utils;
