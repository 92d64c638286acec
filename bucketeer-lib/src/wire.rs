//! Conversion of request payloads into Discord's wire format.
//!
//! Payloads are built in the caller's own naming convention. Before a
//! payload is sent, a [`PayloadTransformer`] renames its keys and converts
//! values the API expects in a different shape.

use serde_json::{Map, Value};
use std::fmt::Debug;

/// Converts payloads from internal case to wire case
pub trait PayloadTransformer: Debug + Send + Sync {
    /// Convert a single key
    fn to_wire_case(&self, key: &str) -> String;

    /// Convert a whole payload.
    ///
    /// The default implementation renames every object key recursively and
    /// sends snowflakes (`id`, `*_id` and `*_ids` fields) as strings, since
    /// they do not fit into a JSON number without loss of precision.
    fn to_wire(&self, value: &Value) -> Value {
        match value {
            Value::Object(object) => {
                let converted: Map<String, Value> = object
                    .iter()
                    .map(|(key, value)| {
                        let key = self.to_wire_case(key);
                        let value = if is_snowflake_key(&key) {
                            stringify_snowflakes(value)
                        } else {
                            self.to_wire(value)
                        };
                        (key, value)
                    })
                    .collect();
                Value::Object(converted)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.to_wire(v)).collect()),
            other => other.clone(),
        }
    }
}

/// Converts camelCase keys to snake_case.
///
/// A run of capitals counts as one word, so `channelID` becomes `channel_id`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnakeCase;

impl PayloadTransformer for SnakeCase {
    fn to_wire_case(&self, key: &str) -> String {
        let mut out = String::with_capacity(key.len() + 4);
        let mut previous_upper = true;
        for c in key.chars() {
            if c.is_ascii_uppercase() {
                if !previous_upper {
                    out.push('_');
                }
                out.push(c.to_ascii_lowercase());
                previous_upper = true;
            } else {
                out.push(c);
                previous_upper = c == '_';
            }
        }
        out
    }
}

fn is_snowflake_key(key: &str) -> bool {
    key == "id" || key.ends_with("_id") || key.ends_with("_ids")
}

fn stringify_snowflakes(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.is_u64() => Value::String(n.to_string()),
        Value::Array(items) => Value::Array(items.iter().map(stringify_snowflakes).collect()),
        other => other.clone(),
    }
}
