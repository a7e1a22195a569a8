// Widget instance domain model
use serde::{Deserialize, Serialize};
use serde_json::Value;

const ID_PREFIX: &str = "widget-";

/// Size of a rectangle in grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutSize {
    pub w: u32,
    pub h: u32,
}

impl LayoutSize {
    pub const fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }
}

/// Whether an instance can be driven by a registered definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Ready,
    /// The stored type tag is not registered in this process. The instance
    /// is kept (and persisted unchanged) but renders as an inert placeholder.
    UnknownType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WidgetInstance {
    pub id: String,
    pub widget_type: String,
    pub title: String,
    pub config: Value,
    pub status: InstanceStatus,
}

impl WidgetInstance {
    pub fn new(id: String, widget_type: String, title: String, config: Value) -> Self {
        Self {
            id,
            widget_type,
            title,
            config,
            status: InstanceStatus::Ready,
        }
    }

    pub fn placeholder(id: String, widget_type: String, title: String, raw_config: Value) -> Self {
        Self {
            id,
            widget_type,
            title,
            config: raw_config,
            status: InstanceStatus::UnknownType,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.status == InstanceStatus::UnknownType
    }

    pub fn to_stored(&self) -> StoredWidget {
        StoredWidget {
            id: self.id.clone(),
            widget_type: self.widget_type.clone(),
            title: self.title.clone(),
            config: self.config.clone(),
        }
    }
}

/// Persisted shape of a widget instance. Every field is optional on read so
/// that a damaged blob still yields an instance instead of failing the load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredWidget {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub widget_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub config: Value,
}

/// Formats the id for counter value `n`.
pub fn format_widget_id(n: u64) -> String {
    format!("{}{}", ID_PREFIX, n)
}

/// Numeric suffix of an id, e.g. `widget-12` -> 12. Ids written by older
/// builds may use another prefix, so any trailing run of digits counts.
pub fn widget_id_counter(id: &str) -> Option<u64> {
    let digits_start = id
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    id[digits_start..].parse().ok()
}

/// Next id after every id in `existing`: max numeric suffix + 1, so an id
/// freed by deletion is never handed out while a later one survives.
pub fn next_widget_id<'a>(existing: impl IntoIterator<Item = &'a str>) -> String {
    let max = existing
        .into_iter()
        .filter_map(widget_id_counter)
        .max()
        .unwrap_or(0);
    format_widget_id(max.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widget_id_counter() {
        assert_eq!(widget_id_counter("widget-7"), Some(7));
        assert_eq!(widget_id_counter("w42"), Some(42));
        assert_eq!(widget_id_counter("widget-"), None);
        assert_eq!(widget_id_counter(""), None);
    }

    #[test]
    fn test_next_id_uses_max_suffix_not_count() {
        // widget-2 was deleted; count + 1 would collide with widget-3
        let ids = ["widget-1", "widget-3"];
        assert_eq!(next_widget_id(ids), "widget-4");
        assert_eq!(next_widget_id(std::iter::empty()), "widget-1");
    }

    #[test]
    fn test_stored_widget_tolerates_missing_fields() {
        let stored: StoredWidget = serde_json::from_str(r#"{"type":"timer"}"#).unwrap();
        assert_eq!(stored.widget_type, "timer");
        assert!(stored.id.is_empty());
        assert!(stored.config.is_null());
    }
}
