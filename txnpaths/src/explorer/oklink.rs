//! OKLink know-your-address risk lookups.

use crate::{config::ExplorerConfig, error::SourceError, types::*};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, warn};

const ACCESS_KEY_HEADER: &str = "Ok-Access-Key";

pub struct OklinkClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OklinkClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// `None` when no OKLink key is configured.
    pub fn from_config(config: &ExplorerConfig) -> Result<Option<Self>, SourceError> {
        let Some(key) = config.oklink_api_key.as_deref() else {
            return Ok(None);
        };
        let client = Self::new(config.http_client()?, &config.oklink_api_url, key);
        info!("Address risk lookups enabled");
        Ok(Some(client))
    }

    pub async fn address_risk(
        &self,
        address: &str,
        network: Network,
    ) -> Result<Option<AddressRisk>, SourceError> {
        let body = self
            .http
            .get(format!("{}/address-risk-level", self.base_url))
            .header(ACCESS_KEY_HEADER, &self.api_key)
            .query(&[("network", oklink_network(network)), ("address", address)])
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        parse_risk_response(address, body)
    }

    /// Risk of every distinct address on the path, in first-seen order.
    /// Failed lookups are logged and left out.
    pub async fn path_risks(&self, path: &[Transaction]) -> Vec<AddressRisk> {
        let mut seen = HashSet::new();
        let mut risks = Vec::new();

        for tx in path {
            for address in [&tx.from, &tx.to] {
                if address.is_empty() || !seen.insert(address.to_ascii_lowercase()) {
                    continue;
                }
                match self.address_risk(address, tx.network).await {
                    Ok(Some(risk)) => risks.push(risk),
                    Ok(None) => debug!("No risk data for {}", address),
                    Err(e) => warn!("Risk lookup for {} failed: {}", address, e),
                }
            }
        }
        risks
    }
}

pub(crate) fn oklink_network(network: Network) -> &'static str {
    match network {
        Network::Ethereum => "ETH",
        Network::Bitcoin => "BTC",
        Network::Bsc => "BSC",
    }
}

/// Unwraps the `{code, msg, data: [..]}` envelope. Empty `data` means the address is unknown.
pub(crate) fn parse_risk_response(
    address: &str,
    body: Value,
) -> Result<Option<AddressRisk>, SourceError> {
    let code = body.get("code").and_then(Value::as_str).unwrap_or("0");
    if code != "0" {
        let msg = body.get("msg").and_then(Value::as_str).unwrap_or_default();
        return Err(SourceError::Api(format!("oklink {code}: {msg}")));
    }

    let first = match body.get("data") {
        Some(Value::Array(rows)) => rows.first().cloned(),
        Some(Value::Object(_)) => body.get("data").cloned(),
        _ => None,
    };
    let Some(row) = first else {
        return Ok(None);
    };

    let mut risk: AddressRisk = serde_json::from_value(row)?;
    if risk.address.is_empty() {
        risk.address = address.to_string();
    }
    Ok(Some(risk))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recorded_payload_is_parsed() {
        let body = json!({
            "code": "0",
            "msg": "",
            "data": [{
                "address": "0x098b716b8aaf21512996dc57eb0615e2383e2f96",
                "level": "SEVERE",
                "riskScore": 100,
                "associateBlackAddresses": "12",
                "interactionTime": "1648526400000",
                "amount": "624000000",
                "maliciousAddressList": [
                    {"category": "Hack", "value": "Ronin Bridge Exploiter"}
                ]
            }]
        });

        let risk = parse_risk_response("0x098b", body).unwrap().unwrap();
        assert_eq!(risk.address, "0x098b716b8aaf21512996dc57eb0615e2383e2f96");
        assert_eq!(risk.level, RiskLevel::Severe);
        assert_eq!(risk.risk_score, 100.0);
        assert_eq!(risk.associate_black_addresses, "12");
        assert_eq!(risk.malicious_address_list[0].category, "Hack");
    }

    #[test]
    fn missing_address_is_filled_in() {
        let body = json!({"code": "0", "data": [{"level": "LOW", "riskScore": 0}]});
        let risk = parse_risk_response("0xabc", body).unwrap().unwrap();
        assert_eq!(risk.address, "0xabc");
        assert_eq!(risk.level, RiskLevel::Low);
    }

    #[test]
    fn empty_data_and_error_codes() {
        let empty = json!({"code": "0", "msg": "", "data": []});
        assert_eq!(parse_risk_response("0xabc", empty).unwrap(), None);

        let denied = json!({"code": "50111", "msg": "Invalid OK-ACCESS-KEY", "data": []});
        let err = parse_risk_response("0xabc", denied).unwrap_err();
        assert!(matches!(err, SourceError::Api(ref m) if m.contains("Invalid OK-ACCESS-KEY")));

        let garbled = json!({"code": "0", "data": [{"level": "PURPLE"}]});
        assert!(matches!(
            parse_risk_response("0xabc", garbled),
            Err(SourceError::Malformed(_))
        ));
    }

    #[test]
    fn networks_map_to_oklink_codes() {
        assert_eq!(oklink_network(Network::Ethereum), "ETH");
        assert_eq!(oklink_network(Network::Bitcoin), "BTC");
        assert_eq!(oklink_network(Network::Bsc), "BSC");
    }

    #[test]
    fn client_needs_a_key() {
        assert!(OklinkClient::from_config(&ExplorerConfig::default()).unwrap().is_none());

        let config = ExplorerConfig {
            oklink_api_key: Some("key".to_string()),
            ..ExplorerConfig::default()
        };
        assert!(OklinkClient::from_config(&config).unwrap().is_some());
    }
}
