//! # Instance Dump
//!
//! Live instances rendered as plain JSON, for inspection and debugging.
//!
//! An instance at depth `d` (the dumped instance is depth 0) expands the
//! instances it references only while `d < max_depth`. Beyond that a
//! reference renders as `<Type:uid>`. The default depth of 1 expands the
//! direct references of each dumped instance and no further.

use crate::graph::{Graph, Node};
use crate::primitives::{TYPE_PREDICATE, UID_KEY};
use crate::{DiggyError, Uid, Value};
use chrono::SecondsFormat;
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Key under which computed values are dumped.
pub const COMPUTED_KEY: &str = "computed";

/// Key holding the edge target inside a dumped facet bundle.
pub const FACET_TARGET_KEY: &str = "obj";

impl Graph {
    /// Render one instance, following references up to `max_depth`.
    pub fn explode(&self, uid: &Uid, max_depth: usize) -> Result<JsonValue, DiggyError> {
        let node = self.node(uid)?;
        Ok(self.explode_node(node, 0, max_depth))
    }

    /// Every registered type with live instances, mapped to its dumped
    /// instances in identifier order.
    pub fn to_json(&self, max_depth: usize) -> JsonValue {
        let mut out = JsonMap::new();
        for node_type in self.registry.types() {
            let dumped: Vec<JsonValue> = self
                .nodes()
                .filter(|n| n.node_type() == node_type.name())
                .map(|n| self.explode_node(n, 0, max_depth))
                .collect();
            if !dumped.is_empty() {
                out.insert(node_type.name().to_string(), JsonValue::Array(dumped));
            }
        }
        JsonValue::Object(out)
    }

    fn explode_node(&self, node: &Node, depth: usize, max_depth: usize) -> JsonValue {
        let mut obj = JsonMap::new();
        obj.insert(TYPE_PREDICATE.to_string(), JsonValue::from(node.node_type()));
        obj.insert(UID_KEY.to_string(), uid_json(node.uid()));

        if let Some(node_type) = self.registry.lookup(node.node_type()) {
            for field in node_type.fields() {
                if let Some(value) = node.value(field.name()) {
                    obj.insert(
                        field.name().to_string(),
                        self.value_json(value, depth, max_depth),
                    );
                }
            }
        }
        for (slot, value) in node.back_references() {
            obj.insert(slot.to_string(), self.value_json(value, depth, max_depth));
        }
        if !node.computed().is_empty() {
            obj.insert(
                COMPUTED_KEY.to_string(),
                JsonValue::Object(node.computed().as_map().clone()),
            );
        }
        JsonValue::Object(obj)
    }

    fn value_json(&self, value: &Value, depth: usize, max_depth: usize) -> JsonValue {
        match value {
            Value::String(s) => JsonValue::from(s.as_str()),
            Value::Int(n) => JsonValue::from(*n),
            Value::Float(n) => JsonValue::from(*n),
            Value::Bool(b) => JsonValue::from(*b),
            Value::DateTime(dt) => {
                JsonValue::from(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::Geo(json) | Value::Json(json) => json.clone(),
            Value::Node(uid) => match self.get_node(uid) {
                Some(target) if depth < max_depth => {
                    self.explode_node(target, depth.saturating_add(1), max_depth)
                }
                Some(target) => JsonValue::from(format!("<{}:{}>", target.node_type(), uid)),
                None => JsonValue::from(format!("<{}>", uid)),
            },
            Value::Facets(facets) => {
                let mut obj = JsonMap::new();
                obj.insert(
                    FACET_TARGET_KEY.to_string(),
                    self.value_json(facets.target(), depth, max_depth),
                );
                for (key, attr) in facets.attrs() {
                    obj.insert(key.to_string(), self.value_json(attr, depth, max_depth));
                }
                JsonValue::Object(obj)
            }
            Value::List(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|item| self.value_json(item, depth, max_depth))
                    .collect(),
            ),
        }
    }
}

fn uid_json(uid: &Uid) -> JsonValue {
    match uid {
        Uid::Persisted(n) => JsonValue::from(*n),
        Uid::Provisional(token) => JsonValue::from(token.as_str()),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::DEFAULT_EXPLODE_DEPTH;
    use crate::registry::{Field, NodeType, ScalarKind, TypeRegistry};
    use crate::Facets;
    use serde_json::json;

    fn regions() -> Graph {
        let mut registry = TypeRegistry::new();
        registry
            .register(
                NodeType::builder("Region")
                    .field(Field::scalar("name", ScalarKind::String))
                    .field(Field::node("borders", "Region").list())
                    .build()
                    .expect("Region"),
            )
            .expect("register");
        let mut g = Graph::new(registry);

        let por = g.build("Region").uid(0x11).set("name", "Portugal").finish().expect("por");
        let spa = g.build("Region").uid(0x12).set("name", "Spain").finish().expect("spa");
        let gas = g.build("Region").set("name", "Gascony").finish().expect("gas");
        g.set(&por, "borders", vec![spa.clone()]).expect("por borders");
        g.set(
            &gas,
            "borders",
            vec![Value::from(Facets::new(spa).with("foo", "bar")), Value::from(por)],
        )
        .expect("gas borders");
        g
    }

    #[test]
    fn default_depth_expands_one_level() {
        let g = regions();
        let dump = g.to_json(DEFAULT_EXPLODE_DEPTH);
        let spain = json!({"_type": "Region", "uid": 18, "name": "Spain"});
        assert_eq!(
            dump["Region"][0],
            json!({"_type": "Region", "uid": 17, "name": "Portugal", "borders": [spain.clone()]})
        );
        assert_eq!(
            dump["Region"][2],
            json!({
                "_type": "Region",
                "uid": "unsaved.0",
                "name": "Gascony",
                "borders": [
                    {"obj": spain, "foo": "bar"},
                    {"_type": "Region", "uid": 17, "name": "Portugal", "borders": ["<Region:0x12>"]},
                ],
            })
        );
    }

    #[test]
    fn zero_depth_renders_references() {
        let g = regions();
        let dump = g.explode(&Uid::provisional(0), 0).expect("explode");
        assert_eq!(
            dump["borders"],
            json!([{"obj": "<Region:0x12>", "foo": "bar"}, "<Region:0x11>"])
        );
    }

    #[test]
    fn deeper_dump_expands_references() {
        let g = regions();
        let dump = g.explode(&Uid::provisional(0), 2).expect("explode");
        assert_eq!(dump["borders"][1]["borders"][0]["name"], json!("Spain"));
        assert_eq!(dump["borders"][1]["borders"][0]["uid"], json!(18));
    }

    #[test]
    fn missing_instance() {
        let g = regions();
        assert!(matches!(
            g.explode(&Uid::Persisted(1), 1),
            Err(DiggyError::NodeNotFound(_))
        ));
    }
}
