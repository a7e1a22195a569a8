// Tracker widget: counts occurrences of a backend entity against a goal.
use super::{WidgetDefinition, contextual_label, to_config};
use crate::domain::sanitize::Fields;
use crate::domain::widget::LayoutSize;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_HISTORY_LIMIT: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub entity_id: Option<String>,
    pub category: Option<String>,
    pub label: String,
    pub unit: String,
    /// Increment applied by the quick-log button. Never zero.
    pub step: f64,
    pub goal: Option<f64>,
    pub show_history: bool,
    pub history_limit: u64,
    pub pinned_patterns: Vec<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            entity_id: None,
            category: None,
            label: String::new(),
            unit: String::new(),
            step: 1.0,
            goal: None,
            show_history: true,
            history_limit: DEFAULT_HISTORY_LIMIT,
            pinned_patterns: Vec::new(),
        }
    }
}

impl TrackerConfig {
    pub fn from_raw(raw: &Value, context_title: Option<&str>) -> Self {
        let f = Fields::of(raw);
        Self {
            entity_id: f.opt_string("entity_id"),
            category: f.opt_string("category"),
            label: f.string("label", &contextual_label(context_title, "tracker")),
            unit: f.string("unit", ""),
            step: f.opt_number("step").filter(|s| *s != 0.0).unwrap_or(1.0),
            goal: f.opt_number("goal"),
            show_history: f.boolean("show_history", true),
            history_limit: f.positive_u64("history_limit", DEFAULT_HISTORY_LIMIT),
            pinned_patterns: f.string_list("pinned_patterns"),
        }
    }
}

pub struct TrackerWidget;

impl WidgetDefinition for TrackerWidget {
    fn widget_type(&self) -> &'static str {
        "tracker"
    }

    fn display_name(&self) -> &'static str {
        "Tracker"
    }

    fn default_config(&self) -> Value {
        to_config(&TrackerConfig::default())
    }

    fn default_layout_size(&self) -> LayoutSize {
        LayoutSize::new(4, 3)
    }

    fn sanitize(&self, raw: &Value, _instance_id: &str, context_title: Option<&str>) -> Value {
        to_config(&TrackerConfig::from_raw(raw, context_title))
    }

    fn entity_type(&self) -> Option<&'static str> {
        Some("tracker")
    }

    fn supported_actions(&self) -> &'static [&'static str] {
        &["start-occurrence", "end-occurrence"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::widgets::test_support::assert_idempotent;
    use serde_json::json;

    #[test]
    fn test_sanitize_is_idempotent() {
        assert_idempotent(&TrackerWidget);
    }

    #[test]
    fn test_sanitize_repairs_fields_independently() {
        let raw = json!({
            "label": "Water",
            "step": 0,
            "goal": "8",
            "pinned_patterns": ["morning", 3, {"x": 1}],
            "legacy_color": "#fff",
        });
        let config = TrackerConfig::from_raw(&raw, None);
        assert_eq!(config.label, "Water");
        assert_eq!(config.step, 1.0);
        assert_eq!(config.goal, Some(8.0));
        assert_eq!(config.pinned_patterns, vec!["morning", "3"]);

        let value = TrackerWidget.sanitize(&raw, "widget-1", None);
        assert!(value.get("legacy_color").is_none());
    }
}
