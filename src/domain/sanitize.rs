// Per-field coercion helpers shared by widget config sanitizers.
//
// Every accessor is total: a missing key, a stale key, or a value of the
// wrong primitive type falls back to the supplied default for that field
// only, never for the whole object.
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy)]
pub struct Fields<'a> {
    map: Option<&'a Map<String, Value>>,
}

impl<'a> Fields<'a> {
    /// Non-object input behaves like an empty object.
    pub fn of(raw: &'a Value) -> Self {
        Self {
            map: raw.as_object(),
        }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.and_then(|m| m.get(key)).filter(|v| !v.is_null())
    }

    pub fn string(&self, key: &str, default: &str) -> String {
        self.opt_string(key).unwrap_or_else(|| default.to_string())
    }

    /// Trimmed, non-empty string. Numbers and booleans are stringified.
    pub fn opt_string(&self, key: &str) -> Option<String> {
        let s = match self.get(key)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return None,
        };
        (!s.is_empty()).then_some(s)
    }

    pub fn boolean(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => true,
                "false" | "no" | "0" => false,
                _ => default,
            },
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(default),
            _ => default,
        }
    }

    /// Finite number; numeric strings are parsed.
    pub fn opt_number(&self, key: &str) -> Option<f64> {
        let n = match self.get(key)? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        n.is_finite().then_some(n)
    }

    /// Strictly positive integer, rounded from fractional input.
    pub fn opt_positive_u64(&self, key: &str) -> Option<u64> {
        let n = self.opt_number(key)?.round();
        (n >= 1.0).then_some(n as u64)
    }

    pub fn positive_u64(&self, key: &str, default: u64) -> u64 {
        self.opt_positive_u64(key).unwrap_or(default)
    }

    /// One of `allowed` (case-insensitive), otherwise `default`.
    pub fn choice(&self, key: &str, allowed: &[&str], default: &str) -> String {
        self.opt_string(key)
            .map(|s| s.to_ascii_lowercase())
            .filter(|s| allowed.contains(&s.as_str()))
            .unwrap_or_else(|| default.to_string())
    }

    /// Always an array. A lone scalar becomes a one-element list; entries
    /// that are not scalars or are blank are dropped.
    pub fn string_list(&self, key: &str) -> Vec<String> {
        let scalar = |v: &Value| match v {
            Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        };
        match self.get(key) {
            Some(Value::Array(items)) => items.iter().filter_map(scalar).collect(),
            Some(v) => scalar(v).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Object entries of an array field; anything else yields an empty list.
    pub fn objects(&self, key: &str) -> Vec<Fields<'a>> {
        match self.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter(|v| v.is_object())
                .map(Fields::of)
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_non_object_input_uses_defaults() {
        let raw = json!("garbage");
        let f = Fields::of(&raw);
        assert_eq!(f.string("label", "x"), "x");
        assert_eq!(f.opt_number("n"), None);
        assert!(f.string_list("items").is_empty());
    }

    #[test]
    fn test_coerces_wrong_primitive_types() {
        let raw = json!({
            "count": "12",
            "flag": "false",
            "name": 42,
            "ratio": "NaN",
            "tags": "solo",
        });
        let f = Fields::of(&raw);
        assert_eq!(f.positive_u64("count", 1), 12);
        assert!(!f.boolean("flag", true));
        assert_eq!(f.string("name", ""), "42");
        assert_eq!(f.opt_number("ratio"), None);
        assert_eq!(f.string_list("tags"), vec!["solo".to_string()]);
    }

    #[test]
    fn test_positive_u64_rejects_zero_and_negative() {
        let raw = json!({"a": 0, "b": -5, "c": 2.6});
        let f = Fields::of(&raw);
        assert_eq!(f.positive_u64("a", 9), 9);
        assert_eq!(f.positive_u64("b", 9), 9);
        assert_eq!(f.positive_u64("c", 9), 3);
    }

    #[test]
    fn test_choice_is_case_insensitive() {
        let raw = json!({"mode": "DAILY", "other": "yearly"});
        let f = Fields::of(&raw);
        assert_eq!(f.choice("mode", &["hourly", "daily"], "hourly"), "daily");
        assert_eq!(f.choice("other", &["hourly", "daily"], "hourly"), "hourly");
    }

    #[test]
    fn test_objects_skips_non_objects() {
        let raw = json!({"stops": [{"id": "a"}, 3, null, {"id": "b"}]});
        let stops = Fields::of(&raw).objects("stops");
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[1].string("id", ""), "b");
    }
}
