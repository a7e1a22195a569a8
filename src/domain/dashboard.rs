// Dashboard view model: what the front-end draws.
use super::layout::{PixelBox, RectState};
use super::time_series::{AxisBounds, TimeSeriesPoint};
use super::widget::InstanceStatus;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub title: String,
    pub columns: u32,
    pub cell_width: u32,
    pub cell_height: u32,
    pub margin: u32,
    pub widgets: Vec<WidgetView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WidgetView {
    pub id: String,
    #[serde(rename = "type")]
    pub widget_type: String,
    pub title: String,
    pub status: InstanceStatus,
    pub can_render_editor: bool,
    pub config: Value,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub state: RectState,
    pub pixels: PixelBox,
}

/// A metric chart's rendered series plus the axis it should be drawn on.
#[derive(Debug, Clone, Serialize)]
pub struct ChartSeries {
    pub id: String,
    pub label: String,
    pub color: Option<String>,
    pub render_mode: String,
    pub fraction_digits: u64,
    pub points: Vec<TimeSeriesPoint>,
    pub bounds: AxisBounds,
}
