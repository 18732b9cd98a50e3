//! The simulated node document

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A node object as exchanged with the management server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Node {
    /// Node name
    pub name: String,

    /// Environment the node converges in
    #[serde(default)]
    pub environment: String,

    /// Canonical run-list strings
    #[serde(default)]
    pub run_list: Vec<String>,

    /// Automatic attributes gathered by the (simulated) system profiler
    #[serde(default)]
    pub automatic: Map<String, Value>,

    /// Normal attributes set by the node itself
    #[serde(default)]
    pub normal: Map<String, Value>,
}

impl Node {
    /// A fresh node with the given name and no attributes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The server rejects nodes without a tags attribute, so guarantee at
    /// least an empty list before an update.
    pub fn ensure_tags(&mut self) {
        self.normal
            .entry("tags".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
    }
}

/// Automatic attributes for a node: the supplied profile with the node's
/// identity defaults filled in where the profile is silent.
pub fn automatic_attributes(node_name: &str, profile: &Map<String, Value>) -> Map<String, Value> {
    let mut attributes = profile.clone();
    attributes.insert("fqdn".to_string(), Value::String(node_name.to_string()));
    attributes
        .entry("platform".to_string())
        .or_insert_with(|| Value::String("rhel".to_string()));
    attributes
        .entry("ipaddress".to_string())
        .or_insert_with(|| Value::String("169.254.169.254".to_string()));
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_tags_is_idempotent() {
        let mut node = Node::new("stampede-1");
        node.ensure_tags();
        assert_eq!(node.normal["tags"], Value::Array(Vec::new()));

        node.normal.insert(
            "tags".to_string(),
            serde_json::json!(["web"]),
        );
        node.ensure_tags();
        assert_eq!(node.normal["tags"], serde_json::json!(["web"]));
    }

    #[test]
    fn automatic_attributes_fill_identity_defaults() {
        let mut profile = Map::new();
        profile.insert("platform".to_string(), Value::String("ubuntu".to_string()));

        let attributes = automatic_attributes("stampede-7", &profile);
        assert_eq!(attributes["fqdn"], "stampede-7");
        assert_eq!(attributes["platform"], "ubuntu");
        assert_eq!(attributes["ipaddress"], "169.254.169.254");
    }
}
