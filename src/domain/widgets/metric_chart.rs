// Metric chart widget: plots an entity's logged values through the
// aggregation pipeline.
use super::{WidgetDefinition, contextual_label, to_config};
use crate::domain::sanitize::Fields;
use crate::domain::time_series::{Period, RenderMode};
use crate::domain::widget::LayoutSize;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_MAX_POINTS: u64 = 150;
const DEFAULT_FRACTION_DIGITS: u64 = 1;
/// A century; longer custom periods are clamped to it.
const MAX_CUSTOM_PERIOD_SECS: u64 = 100 * 365 * 86_400;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricChartConfig {
    pub entity_id: Option<String>,
    pub series_label: String,
    pub render_mode: String,
    pub period: String,
    pub custom_period_secs: Option<u64>,
    pub y_min: Option<f64>,
    pub y_max: Option<f64>,
    pub max_points: u64,
    pub fraction_digits: u64,
    pub color: Option<String>,
}

impl Default for MetricChartConfig {
    fn default() -> Self {
        Self {
            entity_id: None,
            series_label: String::new(),
            render_mode: "raw".to_string(),
            period: "daily".to_string(),
            custom_period_secs: None,
            y_min: None,
            y_max: None,
            max_points: DEFAULT_MAX_POINTS,
            fraction_digits: DEFAULT_FRACTION_DIGITS,
            color: None,
        }
    }
}

impl MetricChartConfig {
    pub fn from_raw(raw: &Value, context_title: Option<&str>) -> Self {
        let f = Fields::of(raw);

        // First-generation configs stored `chart_mode` (sum/average/raw) and a
        // `window_hours` count instead of a named period.
        let legacy_mode = f.opt_string("chart_mode").and_then(|m| {
            match m.to_ascii_lowercase().as_str() {
                "sum" | "total" => Some("aggregated_sum"),
                "average" | "avg" | "moving_average" => Some("moving_average"),
                "raw" => Some("raw"),
                _ => None,
            }
        });
        let legacy_window = f.opt_positive_u64("window_hours").map(|h| h.saturating_mul(3_600));

        let render_mode = if f.opt_string("render_mode").is_some() || legacy_mode.is_none() {
            f.choice("render_mode", &RenderMode::NAMES, "raw")
        } else {
            legacy_mode.unwrap_or("raw").to_string()
        };

        let mut period = f.choice("period", &Period::NAMES, "daily");
        let mut custom_period_secs = f.opt_positive_u64("custom_period_secs");
        if f.opt_string("period").is_none() && legacy_window.is_some() {
            period = "custom".to_string();
            custom_period_secs = legacy_window;
        }
        let custom_period_secs = custom_period_secs.map(|s| s.min(MAX_CUSTOM_PERIOD_SECS));

        let (mut y_min, mut y_max) = (f.opt_number("y_min"), f.opt_number("y_max"));
        if let (Some(lo), Some(hi)) = (y_min, y_max) {
            if lo >= hi {
                y_min = None;
                y_max = None;
            }
        }

        Self {
            entity_id: f.opt_string("entity_id"),
            series_label: f.string("series_label", &contextual_label(context_title, "metric")),
            render_mode,
            period,
            custom_period_secs,
            y_min,
            y_max,
            max_points: f.positive_u64("max_points", DEFAULT_MAX_POINTS),
            fraction_digits: f
                .opt_number("fraction_digits")
                .filter(|d| *d >= 0.0)
                .map(|d| (d.round() as u64).min(6))
                .unwrap_or(DEFAULT_FRACTION_DIGITS),
            color: f.opt_string("color"),
        }
    }

    pub fn render_mode(&self) -> RenderMode {
        let custom = self.custom_period_secs.and_then(|s| i64::try_from(s).ok());
        let period = Period::parse(&self.period, custom).unwrap_or(Period::Daily);
        RenderMode::parse(&self.render_mode, period).unwrap_or(RenderMode::Raw)
    }
}

pub struct MetricChartWidget;

impl WidgetDefinition for MetricChartWidget {
    fn widget_type(&self) -> &'static str {
        "metric_chart"
    }

    fn display_name(&self) -> &'static str {
        "Metric chart"
    }

    fn default_config(&self) -> Value {
        to_config(&MetricChartConfig::default())
    }

    fn default_layout_size(&self) -> LayoutSize {
        LayoutSize::new(6, 4)
    }

    fn sanitize(&self, raw: &Value, _instance_id: &str, context_title: Option<&str>) -> Value {
        to_config(&MetricChartConfig::from_raw(raw, context_title))
    }
}
