use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::types::{ChainDescriptor, LiveDataUpdate, SecondaryIds, SourceTag, Validator};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainListPage {
    #[serde(default)]
    pub chains: Vec<ApiChain>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiChain {
    #[serde(deserialize_with = "string_or_number")]
    pub chain_id: String,
    pub chain_name: Option<String>,
    pub subnet_id: Option<String>,
    pub blockchain_id: Option<String>,
    pub platform_chain_id: Option<String>,
    pub validators: Option<Vec<ApiValidator>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiValidator {
    pub node_id: String,
    pub weight: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPage {
    #[serde(default)]
    pub results: Vec<RawSample>,
    pub next_page_token: Option<String>,
}

/// A sample as delivered upstream; either field may be a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawSample {
    #[serde(default)]
    pub timestamp: Value,
    #[serde(default)]
    pub value: Value,
}

impl RawSample {
    pub fn new(timestamp: impl Into<Value>, value: impl Into<Value>) -> Self {
        Self {
            timestamp: timestamp.into(),
            value: value.into(),
        }
    }

    pub fn timestamp_secs(&self) -> Option<i64> {
        match &self.timestamp {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn numeric_value(&self) -> Option<f64> {
        let value = match &self.value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }?;
        value.is_finite().then_some(value)
    }
}

impl ApiChain {
    pub fn into_descriptor(self) -> ChainDescriptor {
        let ids = SecondaryIds {
            legacy_numeric_id: Some(self.chain_id),
            ledger_id: self.blockchain_id,
            platform_id: self.platform_chain_id,
        }
        .normalized();

        let live = LiveDataUpdate {
            api_name: self.chain_name,
            validators: self.validators.map(|validators| {
                validators
                    .into_iter()
                    .map(|v| Validator {
                        node_id: v.node_id,
                        weight: v.weight,
                    })
                    .collect()
            }),
            latest_metrics: Default::default(),
        };

        ChainDescriptor {
            source: SourceTag::MetricsApi,
            subnet_id: self.subnet_id.filter(|s| !s.trim().is_empty()),
            ids,
            descriptive: None,
            live: Some(live),
            origin_folder: None,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number, got {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chain_list_accepts_numeric_and_string_ids() {
        let page: ChainListPage = serde_json::from_value(json!({
            "chains": [
                { "chainId": 43114, "chainName": "C-Chain", "blockchainId": "2q9e" },
                { "chainId": "53935", "chainName": "DFK", "subnetId": "Vn3a", "validators": [
                    { "nodeId": "NodeID-b", "weight": 20 },
                    { "nodeId": "NodeID-a" }
                ] }
            ],
            "nextPageToken": "abc"
        }))
        .unwrap();

        assert_eq!(page.chains[0].chain_id, "43114");
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));

        let descriptor = page.chains[1].clone().into_descriptor();
        assert_eq!(descriptor.source, SourceTag::MetricsApi);
        assert_eq!(descriptor.subnet_id.as_deref(), Some("Vn3a"));
        assert_eq!(descriptor.ids.legacy_numeric_id.as_deref(), Some("53935"));
        let validators = descriptor.live.unwrap().validators.unwrap();
        assert_eq!(validators.len(), 2);
    }

    #[test]
    fn raw_samples_parse_numbers_and_numeric_strings() {
        assert_eq!(RawSample::new(1_700_000_000, 12.5).timestamp_secs(), Some(1_700_000_000));
        assert_eq!(RawSample::new("1700000000", "7").numeric_value(), Some(7.0));
        assert_eq!(RawSample::new("yesterday", 1).timestamp_secs(), None);
        assert_eq!(RawSample::new(1, "n/a").numeric_value(), None);
        assert_eq!(RawSample::new(1.5, 1).timestamp_secs(), None);
        assert_eq!(RawSample::new(Value::Null, Value::Null).numeric_value(), None);
    }
}
