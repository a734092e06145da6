//! Feature gate maps
//!
//! Feature gates are stored as `name -> enabled`. Older manifests carry them
//! as a single comma-separated string (`"A=true,B=false,C"`), which is
//! accepted on input and converted into the same map. A bare gate name means
//! enabled.
//!
//! The CRD schema for these fields leaves the type open so the API server
//! admits both forms.

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

/// Parse the comma-separated feature gate form
pub fn parse_feature_gates(raw: &str) -> Result<BTreeMap<String, bool>, String> {
    let mut gates = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, enabled) = match entry.split_once('=') {
            Some((name, value)) => {
                let enabled = value
                    .trim()
                    .parse::<bool>()
                    .map_err(|_| format!("invalid value for feature gate {}: {:?}", name.trim(), value))?;
                (name.trim(), enabled)
            }
            None => (entry, true),
        };
        if name.is_empty() {
            return Err(format!("feature gate entry {:?} has no name", entry));
        }
        gates.insert(name.to_string(), enabled);
    }
    Ok(gates)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FeatureGatesRepr {
    Map(BTreeMap<String, bool>),
    Legacy(String),
}

/// serde `deserialize_with` helper accepting either the map or the string form
pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<FeatureGatesRepr>::deserialize(deserializer)? {
        None => Ok(BTreeMap::new()),
        Some(FeatureGatesRepr::Map(map)) => Ok(map),
        Some(FeatureGatesRepr::Legacy(raw)) => parse_feature_gates(&raw).map_err(serde::de::Error::custom),
    }
}

/// schemars `schema_with` helper for feature gate fields
///
/// Structural schemas only allow an untyped node when unknown fields are
/// preserved, so the node carries that marker instead of `type: object`.
pub fn schema(_generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "description": "Feature gate name to enabled flag, or the comma-separated \"Name=bool\" string form",
        "x-kubernetes-preserve-unknown-fields": true
    })
}
