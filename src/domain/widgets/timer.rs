// Timer widget: mirrors a backend timer entity and re-syncs with it.
use super::{RefreshPlan, RefreshSource, WidgetDefinition, contextual_label, to_config};
use crate::domain::sanitize::Fields;
use crate::domain::widget::LayoutSize;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_RESYNC_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerConfig {
    pub entity_id: Option<String>,
    /// Name used when the widget creates its backend entity.
    pub entity_name: String,
    pub label: String,
    pub show_seconds: bool,
    pub resync_secs: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            entity_id: None,
            entity_name: String::new(),
            label: String::new(),
            show_seconds: true,
            resync_secs: DEFAULT_RESYNC_SECS,
        }
    }
}

impl TimerConfig {
    pub fn from_raw(raw: &Value, instance_id: &str, context_title: Option<&str>) -> Self {
        let f = Fields::of(raw);
        let label = f.string("label", &contextual_label(context_title, "timer"));
        Self {
            entity_id: f.opt_string("entity_id"),
            entity_name: f.string("entity_name", &format!("{} ({})", label, instance_id)),
            label,
            show_seconds: f.boolean("show_seconds", true),
            resync_secs: f.positive_u64("resync_secs", DEFAULT_RESYNC_SECS),
        }
    }
}

pub struct TimerWidget;

impl WidgetDefinition for TimerWidget {
    fn widget_type(&self) -> &'static str {
        "timer"
    }

    fn display_name(&self) -> &'static str {
        "Timer"
    }

    fn default_config(&self) -> Value {
        to_config(&TimerConfig::default())
    }

    fn default_layout_size(&self) -> LayoutSize {
        LayoutSize::new(3, 2)
    }

    fn sanitize(&self, raw: &Value, instance_id: &str, context_title: Option<&str>) -> Value {
        to_config(&TimerConfig::from_raw(raw, instance_id, context_title))
    }

    fn entity_type(&self) -> Option<&'static str> {
        Some("timer")
    }

    fn supported_actions(&self) -> &'static [&'static str] {
        &["start-timer", "pause-timer", "reset-timer"]
    }

    fn refresh_plan(&self, config: &Value) -> Option<RefreshPlan> {
        let config = TimerConfig::from_raw(config, "", None);
        Some(RefreshPlan {
            interval: Duration::from_secs(config.resync_secs),
            source: RefreshSource::Entity {
                entity_id: config.entity_id?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::widgets::test_support::assert_idempotent;
    use serde_json::json;

    #[test]
    fn test_sanitize_is_idempotent() {
        assert_idempotent(&TimerWidget);
    }

    #[test]
    fn test_labels_derive_from_context() {
        let config = TimerConfig::from_raw(&json!({}), "widget-4", Some("Office"));
        assert_eq!(config.label, "Office timer");
        assert_eq!(config.entity_name, "Office timer (widget-4)");
        assert_eq!(config.resync_secs, 60);
    }

    #[test]
    fn test_refresh_requires_entity() {
        assert_eq!(TimerWidget.refresh_plan(&TimerWidget.default_config()), None);

        let plan = TimerWidget
            .refresh_plan(&json!({"entity_id": "t-9", "resync_secs": 30}))
            .unwrap();
        assert_eq!(plan.interval, Duration::from_secs(30));
        assert_eq!(
            plan.source,
            RefreshSource::Entity {
                entity_id: "t-9".to_string()
            }
        );
    }
}
