// Widget type definitions
//
// A definition is everything the shell needs to know about a widget type:
// its defaults, how to turn arbitrary stored JSON into a valid config, and
// which capabilities it offers. The shell never looks inside a config.
pub mod metric_chart;
pub mod timer;
pub mod tracker;
pub mod transit;

use crate::domain::widget::LayoutSize;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Where a widget's periodic refresh pulls from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshSource {
    /// A backend entity, re-read on every tick.
    Entity { entity_id: String },
    /// An external JSON feed (e.g. a departures board).
    Feed { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPlan {
    pub interval: Duration,
    pub source: RefreshSource,
}

pub trait WidgetDefinition: Send + Sync {
    /// Stable discriminator persisted with every instance.
    fn widget_type(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn default_config(&self) -> Value;

    fn default_layout_size(&self) -> LayoutSize;

    /// Total: must return a valid config for any input.
    fn sanitize(&self, raw: &Value, instance_id: &str, context_title: Option<&str>) -> Value;

    fn can_render_editor(&self) -> bool {
        true
    }

    /// Backend entity type this widget creates when linked, if any.
    fn entity_type(&self) -> Option<&'static str> {
        None
    }

    /// Entity actions (`start-timer`, ...) the widget may trigger.
    fn supported_actions(&self) -> &'static [&'static str] {
        &[]
    }

    /// Periodic refresh wanted for a (sanitized) config, if any.
    fn refresh_plan(&self, _config: &Value) -> Option<RefreshPlan> {
        None
    }
}

/// Public description of a registered type, served to the front-end.
#[derive(Debug, Clone, Serialize)]
pub struct WidgetTypeInfo {
    #[serde(rename = "type")]
    pub widget_type: &'static str,
    pub display_name: &'static str,
    pub default_size: LayoutSize,
    pub can_render_editor: bool,
    pub actions: &'static [&'static str],
}

impl WidgetTypeInfo {
    pub fn of(definition: &dyn WidgetDefinition) -> Self {
        Self {
            widget_type: definition.widget_type(),
            display_name: definition.display_name(),
            default_size: definition.default_layout_size(),
            can_render_editor: definition.can_render_editor(),
            actions: definition.supported_actions(),
        }
    }
}

/// Definitions shipped with the shell.
pub fn builtin_definitions() -> Vec<Arc<dyn WidgetDefinition>> {
    vec![
        Arc::new(timer::TimerWidget),
        Arc::new(tracker::TrackerWidget),
        Arc::new(transit::TransitWidget),
        Arc::new(metric_chart::MetricChartWidget),
    ]
}

/// Serializes a typed config. The typed configs are plain data, so this
/// cannot fail in practice; `Null` keeps the function total regardless.
pub(crate) fn to_config<T: Serialize>(config: &T) -> Value {
    serde_json::to_value(config).unwrap_or_default()
}

/// Label fallback shared by definitions that name themselves after the
/// dashboard they live on.
pub(crate) fn contextual_label(context_title: Option<&str>, suffix: &str) -> String {
    match context_title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => format!("{} {}", title, suffix),
        None => {
            let mut chars = suffix.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}
