//! # Explorer configuration
//!
//! Explorer endpoints and credentials. Each setting can be given as a flag or
//! through the environment.
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `ETHERSCAN_API_KEY` | Etherscan v2 key, enables Ethereum | unset |
//! | `BSCSCAN_API_KEY` | Key used for BSC, falls back to `ETHERSCAN_API_KEY` | unset |
//! | `ETHERSCAN_API_URL` | Etherscan v2 endpoint | `https://api.etherscan.io/v2/api` |
//! | `BLOCKSTREAM_API_URL` | Esplora endpoint for Bitcoin | `https://blockstream.info/api` |
//! | `OKLINK_API_KEY` | OKLink key, enables per-address risk in the report | unset |
//! | `OKLINK_API_URL` | OKLink know-your-address endpoint | `https://www.oklink.com/api/v5/tracker/kya` |
//! | `EXPLORER_TIMEOUT_SECS` | Per-request timeout | `30` |
//! | `LOG_FORMAT` | `json` or `pretty` (binary only) | `pretty` |
//! | `RUST_LOG` | Log level filter (binary only) | `info` |

use crate::error::SourceError;
use clap::Args;
use std::time::Duration;

pub const ETHERSCAN_API_KEY_ENV: &str = "ETHERSCAN_API_KEY";
pub const BSCSCAN_API_KEY_ENV: &str = "BSCSCAN_API_KEY";
pub const ETHERSCAN_API_URL_ENV: &str = "ETHERSCAN_API_URL";
pub const BLOCKSTREAM_API_URL_ENV: &str = "BLOCKSTREAM_API_URL";
pub const OKLINK_API_KEY_ENV: &str = "OKLINK_API_KEY";
pub const OKLINK_API_URL_ENV: &str = "OKLINK_API_URL";
pub const EXPLORER_TIMEOUT_SECS_ENV: &str = "EXPLORER_TIMEOUT_SECS";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_ETHERSCAN_API_URL: &str = "https://api.etherscan.io/v2/api";
pub const DEFAULT_BLOCKSTREAM_API_URL: &str = "https://blockstream.info/api";
pub const DEFAULT_OKLINK_API_URL: &str = "https://www.oklink.com/api/v5/tracker/kya";
pub const DEFAULT_EXPLORER_TIMEOUT_SECS: u64 = 30;

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ExplorerConfig {
    #[arg(long, env = ETHERSCAN_API_KEY_ENV, hide_env_values = true)]
    pub etherscan_api_key: Option<String>,
    #[arg(long, env = BSCSCAN_API_KEY_ENV, hide_env_values = true)]
    pub bscscan_api_key: Option<String>,
    #[arg(long, env = ETHERSCAN_API_URL_ENV, default_value = DEFAULT_ETHERSCAN_API_URL)]
    pub etherscan_api_url: String,
    #[arg(long, env = BLOCKSTREAM_API_URL_ENV, default_value = DEFAULT_BLOCKSTREAM_API_URL)]
    pub blockstream_api_url: String,
    #[arg(long, env = OKLINK_API_KEY_ENV, hide_env_values = true)]
    pub oklink_api_key: Option<String>,
    #[arg(long, env = OKLINK_API_URL_ENV, default_value = DEFAULT_OKLINK_API_URL)]
    pub oklink_api_url: String,
    #[arg(long, env = EXPLORER_TIMEOUT_SECS_ENV, default_value_t = DEFAULT_EXPLORER_TIMEOUT_SECS)]
    pub explorer_timeout_secs: u64,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            etherscan_api_key: None,
            bscscan_api_key: None,
            etherscan_api_url: DEFAULT_ETHERSCAN_API_URL.to_string(),
            blockstream_api_url: DEFAULT_BLOCKSTREAM_API_URL.to_string(),
            oklink_api_key: None,
            oklink_api_url: DEFAULT_OKLINK_API_URL.to_string(),
            explorer_timeout_secs: DEFAULT_EXPLORER_TIMEOUT_SECS,
        }
    }
}

impl ExplorerConfig {
    pub fn bsc_api_key(&self) -> Option<&str> {
        self.bscscan_api_key
            .as_deref()
            .or(self.etherscan_api_key.as_deref())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.explorer_timeout_secs)
    }

    pub fn http_client(&self) -> Result<reqwest::Client, SourceError> {
        Ok(reqwest::Client::builder()
            .timeout(self.timeout())
            .user_agent(concat!("txnpaths/", env!("CARGO_PKG_VERSION")))
            .build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        explorer: ExplorerConfig,
    }

    #[test]
    fn flags_override_defaults() {
        let parsed = Wrapper::try_parse_from([
            "txnpaths",
            "--etherscan-api-key",
            "abc",
            "--blockstream-api-url",
            "http://localhost:3000",
            "--explorer-timeout-secs",
            "5",
            "--oklink-api-key",
            "ok",
        ])
        .unwrap();

        assert_eq!(parsed.explorer.etherscan_api_key.as_deref(), Some("abc"));
        assert_eq!(parsed.explorer.blockstream_api_url, "http://localhost:3000");
        assert_eq!(parsed.explorer.timeout(), Duration::from_secs(5));
        assert_eq!(parsed.explorer.oklink_api_key.as_deref(), Some("ok"));
    }

    #[test]
    fn bsc_key_falls_back_to_etherscan() {
        let mut config = ExplorerConfig {
            etherscan_api_key: Some("eth".to_string()),
            ..ExplorerConfig::default()
        };
        assert_eq!(config.bsc_api_key(), Some("eth"));

        config.bscscan_api_key = Some("bsc".to_string());
        assert_eq!(config.bsc_api_key(), Some("bsc"));

        assert_eq!(ExplorerConfig::default().bsc_api_key(), None);
    }
}
