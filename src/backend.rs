use crate::VoiceError;
use serde_json::{json, Value};
use std::time::Duration;

/// Generic query/mutate contract against the remote document store. The
/// session layer treats every result as opaque JSON; shaping it for display
/// is the caller's concern.
pub trait DataRpc: Send + Sync {
    fn query(&self, name: &str, args: Value) -> crate::Result<Value>;
    fn mutate(&self, name: &str, args: Value) -> crate::Result<Value>;
}

/// HTTP implementation of the data RPC. Blocking client: tool dispatch
/// runs on a blocking task off the session loop.
pub struct HttpDataRpc {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpDataRpc {
    pub fn new(base_url: &str) -> crate::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VoiceError::Backend(format!("failed to build client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn call(&self, kind: &str, name: &str, args: Value) -> crate::Result<Value> {
        let url = format!("{}/api/rpc/{}", self.base_url, kind);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "name": name, "args": args }))
            .send()
            .map_err(|e| VoiceError::Backend(format!("{} {} failed: {}", kind, name, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VoiceError::Backend(format!(
                "{} {} returned {}",
                kind, name, status
            )));
        }
        response
            .json::<Value>()
            .map_err(|e| VoiceError::Backend(format!("{} {} bad body: {}", kind, name, e)))
    }
}

impl DataRpc for HttpDataRpc {
    fn query(&self, name: &str, args: Value) -> crate::Result<Value> {
        self.call("query", name, args)
    }

    fn mutate(&self, name: &str, args: Value) -> crate::Result<Value> {
        self.call("mutate", name, args)
    }
}

/// Canned data source for demo mode and tests. Deterministic; no network.
pub struct StaticDataRpc {
    listings: Vec<Value>,
}

impl StaticDataRpc {
    pub fn new(listings: Vec<Value>) -> Self {
        Self { listings }
    }

    pub fn with_demo_listings() -> Self {
        Self::new(vec![
            json!({
                "id": "prop-001",
                "address": "42 Ocean Street, Bondi Beach NSW 2026",
                "location": "Bondi Beach",
                "price": 1_500_000,
                "bedrooms": 3,
                "bathrooms": 2,
                "propertyType": "house",
                "features": ["Ocean views", "Modern kitchen", "Air conditioning"],
            }),
            json!({
                "id": "prop-002",
                "address": "15 Beach Road, Bondi Beach NSW 2026",
                "location": "Bondi Beach",
                "price": 800_000,
                "bedrooms": 2,
                "bathrooms": 1,
                "propertyType": "apartment",
                "features": ["New kitchen", "Floorboards", "North facing"],
            }),
            json!({
                "id": "prop-003",
                "address": "8 Crown Street, Surry Hills NSW 2010",
                "location": "Surry Hills",
                "price": 1_150_000,
                "bedrooms": 2,
                "bathrooms": 2,
                "propertyType": "apartment",
                "features": ["Balcony", "Study", "Secure parking"],
            }),
        ])
    }
}

impl DataRpc for StaticDataRpc {
    fn query(&self, name: &str, args: Value) -> crate::Result<Value> {
        match name {
            "properties:search" => {
                let location = args
                    .get("location")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_lowercase());
                let matches: Vec<Value> = self
                    .listings
                    .iter()
                    .filter(|listing| match &location {
                        Some(loc) => listing
                            .get("location")
                            .and_then(|v| v.as_str())
                            .map(|l| l.to_lowercase().contains(loc.as_str()))
                            .unwrap_or(false),
                        None => true,
                    })
                    .cloned()
                    .collect();
                Ok(Value::Array(matches))
            }
            "properties:get" => {
                let id = args.get("id").and_then(|v| v.as_str()).unwrap_or("");
                self.listings
                    .iter()
                    .find(|l| l.get("id").and_then(|v| v.as_str()) == Some(id))
                    .cloned()
                    .ok_or_else(|| VoiceError::Backend(format!("no property with id {}", id)))
            }
            other => Err(VoiceError::Backend(format!("unknown query: {}", other))),
        }
    }

    fn mutate(&self, _name: &str, _args: Value) -> crate::Result<Value> {
        Ok(json!({ "success": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_filters_by_location_substring() {
        let rpc = StaticDataRpc::with_demo_listings();
        let results = rpc
            .query("properties:search", json!({ "location": "bondi" }))
            .unwrap();
        assert_eq!(results.as_array().map(|a| a.len()), Some(2));

        let all = rpc.query("properties:search", json!({})).unwrap();
        assert_eq!(all.as_array().map(|a| a.len()), Some(3));
    }

    #[test]
    fn get_by_id_and_missing_id() {
        let rpc = StaticDataRpc::with_demo_listings();
        let found = rpc
            .query("properties:get", json!({ "id": "prop-003" }))
            .unwrap();
        assert_eq!(found["location"], "Surry Hills");

        assert!(rpc
            .query("properties:get", json!({ "id": "prop-999" }))
            .is_err());
    }

    #[test]
    fn unknown_query_name_is_an_error() {
        let rpc = StaticDataRpc::with_demo_listings();
        assert!(rpc.query("agents:list", json!({})).is_err());
    }
}
