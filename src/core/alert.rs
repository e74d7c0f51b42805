use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A raw Falcon alert as returned by the entities endpoint.
///
/// The vendor owns the schema, so the record is kept as an opaque JSON map
/// and round-trips losslessly; typed accessors cover only the fields the
/// watcher actually reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertRecord(pub Map<String, Value>);

impl AlertRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Full vendor identifier, required for follow-up API calls.
    pub fn full_id(&self) -> Option<&str> {
        self.str_field("id").or_else(|| self.str_field("composite_id"))
    }

    pub fn name(&self) -> Option<&str> {
        self.str_field("name")
            .or_else(|| self.str_field("title"))
            .or_else(|| self.str_field("display_name"))
    }

    pub fn description(&self) -> Option<&str> {
        self.str_field("description")
    }

    pub fn status(&self) -> Option<&str> {
        self.str_field("status")
    }

    pub fn product(&self) -> Option<&str> {
        self.str_field("product")
            .or_else(|| self.str_field("source"))
            .or_else(|| self.str_field("category"))
    }

    pub fn hostname(&self) -> Option<&str> {
        self.device_field("hostname")
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_field("device_id")
    }

    fn device_field(&self, key: &str) -> Option<&str> {
        self.0
            .get("device")
            .and_then(Value::as_object)
            .and_then(|dev| dev.get(key))
            .and_then(Value::as_str)
    }

    /// Severity as a number, when the vendor sent one (or a numeric string).
    pub fn severity_i64(&self) -> Option<i64> {
        match self.0.get("severity")? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Severity exactly as the vendor sent it, rendered for display.
    pub fn severity_display(&self) -> String {
        match self.0.get("severity") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    pub fn created_timestamp(&self) -> Option<&str> {
        self.str_field("created_timestamp")
    }

    pub fn updated_timestamp(&self) -> Option<&str> {
        self.str_field("updated_timestamp")
    }

    /// Best creation instant: `created_timestamp`, then `timestamp`, then
    /// `updated_timestamp`. This is the watermark ordering key.
    pub fn best_created(&self) -> Option<&str> {
        self.created_timestamp()
            .or_else(|| self.str_field("timestamp"))
            .or_else(|| self.updated_timestamp())
    }
}

/// Shorten a composite identifier like `cid:ind:<hash>` to the human-facing
/// `ind:<hash>` form. Identifiers without a marker pass through unchanged;
/// the full identifier must be kept separately for API calls.
pub fn derive_display_id(full_id: &str) -> &str {
    for marker in ["ind:", "det:"] {
        if let Some(pos) = full_id.find(marker) {
            return &full_id[pos..];
        }
    }
    full_id
}
