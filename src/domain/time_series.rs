// Time-series domain models and the chart aggregation pipeline.
//
// Everything here is pure: entries in, display points out. The pipeline never
// assumes caller ordering and never mutates its input.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregation bucket width used when a custom period is missing or invalid.
pub const DEFAULT_AGGREGATION_SECS: i64 = 86_400;
/// Moving-average window used when a custom period is missing or invalid.
pub const DEFAULT_MOVING_AVERAGE_SECS: i64 = 604_800;

/// One logged value as the backend reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(alias = "value_logged")]
    pub value_logged: f64,
    #[serde(default, alias = "value_delta")]
    pub value_delta: Option<f64>,
}

impl TimeSeriesEntry {
    #[cfg(test)]
    pub fn new(timestamp: DateTime<Utc>, value_logged: f64, value_delta: Option<f64>) -> Self {
        Self {
            timestamp,
            value_logged,
            value_delta,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    pub time_ms: i64,
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(time_ms: i64, value: f64) -> Self {
        Self { time_ms, value }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Hourly,
    Daily,
    Weekly,
    /// 30 days; not calendar aware.
    Monthly,
    /// Explicit second count. Missing or non-positive counts resolve to the
    /// caller's fallback.
    Custom(Option<i64>),
}

impl Period {
    pub const NAMES: [&'static str; 5] = ["hourly", "daily", "weekly", "monthly", "custom"];

    pub fn parse(name: &str, custom_secs: Option<i64>) -> Option<Self> {
        match name {
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "custom" => Some(Self::Custom(custom_secs)),
            _ => None,
        }
    }

    pub fn seconds(&self, fallback: i64) -> i64 {
        match self {
            Self::Hourly => 3_600,
            Self::Daily => 86_400,
            Self::Weekly => 604_800,
            Self::Monthly => 2_592_000,
            Self::Custom(Some(secs)) if *secs > 0 => *secs,
            Self::Custom(_) => fallback,
        }
    }

    /// Period width in milliseconds. A custom period too long to express in
    /// milliseconds resolves to the fallback.
    pub fn millis(&self, fallback: i64) -> i64 {
        self.seconds(fallback)
            .checked_mul(1_000)
            .unwrap_or_else(|| fallback.saturating_mul(1_000))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Raw,
    AggregatedSum(Period),
    MovingAverage(Period),
}

impl RenderMode {
    pub const NAMES: [&'static str; 3] = ["raw", "aggregated_sum", "moving_average"];

    pub fn parse(name: &str, period: Period) -> Option<Self> {
        match name {
            "raw" => Some(Self::Raw),
            "aggregated_sum" => Some(Self::AggregatedSum(period)),
            "moving_average" => Some(Self::MovingAverage(period)),
            _ => None,
        }
    }
}

/// Entry after ordering, with its delta resolved.
#[derive(Debug, Clone, Copy)]
struct Normalized {
    time_ms: i64,
    logged: f64,
    delta: f64,
}

fn normalize(entries: &[TimeSeriesEntry]) -> Vec<Normalized> {
    let mut sorted: Vec<&TimeSeriesEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| e.timestamp);

    let mut previous: Option<f64> = None;
    sorted
        .into_iter()
        .map(|e| {
            let delta = e
                .value_delta
                .unwrap_or_else(|| e.value_logged - previous.unwrap_or(0.0));
            previous = Some(e.value_logged);
            Normalized {
                time_ms: e.timestamp.timestamp_millis(),
                logged: e.value_logged,
                delta,
            }
        })
        .collect()
}

/// Projects `entries` into display points under `mode`.
pub fn render(entries: &[TimeSeriesEntry], mode: RenderMode) -> Vec<TimeSeriesPoint> {
    let entries = normalize(entries);
    match mode {
        RenderMode::Raw => entries
            .iter()
            .map(|e| TimeSeriesPoint::new(e.time_ms, e.logged))
            .collect(),
        RenderMode::AggregatedSum(period) => {
            aggregated_sum(&entries, period.millis(DEFAULT_AGGREGATION_SECS))
        }
        RenderMode::MovingAverage(period) => {
            moving_average(&entries, period.millis(DEFAULT_MOVING_AVERAGE_SECS))
        }
    }
}

/// Sums deltas into epoch-aligned buckets. Empty buckets are omitted.
fn aggregated_sum(entries: &[Normalized], period_ms: i64) -> Vec<TimeSeriesPoint> {
    let mut buckets: BTreeMap<i64, f64> = BTreeMap::new();
    for e in entries {
        let start = e.time_ms.div_euclid(period_ms) * period_ms;
        *buckets.entry(start).or_insert(0.0) += e.delta;
    }
    buckets
        .into_iter()
        .map(|(start, sum)| TimeSeriesPoint::new(start, sum))
        .collect()
}

/// Trailing-window mean of deltas, recomputed for every point. An entry
/// exactly `window_ms` older than the current one is outside the window.
fn moving_average(entries: &[Normalized], window_ms: i64) -> Vec<TimeSeriesPoint> {
    entries
        .iter()
        .enumerate()
        .map(|(i, current)| {
            let (sum, count) = entries[..=i]
                .iter()
                .rev()
                .take_while(|e| current.time_ms - e.time_ms < window_ms)
                .fold((0.0, 0usize), |(sum, count), e| (sum + e.delta, count + 1));
            TimeSeriesPoint::new(current.time_ms, sum / count as f64)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisBounds {
    pub min: f64,
    pub max: f64,
}

/// Derives y-axis bounds from a rendered series.
pub fn axis_bounds(
    points: &[TimeSeriesPoint],
    min_override: Option<f64>,
    max_override: Option<f64>,
) -> AxisBounds {
    let values: Vec<f64> = points
        .iter()
        .map(|p| p.value)
        .filter(|v| v.is_finite())
        .collect();

    if values.is_empty() {
        let min = min_override.unwrap_or(0.0);
        let max = max_override.filter(|m| *m > min).unwrap_or(min + 1.0);
        return AxisBounds { min, max };
    }

    let data_min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let data_max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min_span = (0.1 * data_min.abs().max(data_max.abs())).max(1.0);

    let (mut lo, mut hi) = (data_min, data_max);
    if hi - lo < min_span {
        let mid = (lo + hi) / 2.0;
        lo = mid - min_span / 2.0;
        hi = mid + min_span / 2.0;
    }

    let padding = (hi - lo) * 0.1;
    lo = min_override.unwrap_or(lo - padding);
    hi = max_override.unwrap_or(hi + padding);

    if min_override.is_none() && data_min >= 0.0 {
        lo = lo.max(0.0);
    }
    if hi <= lo {
        hi = lo + min_span;
    }

    AxisBounds { min: lo, max: hi }
}

/// Downsamples by averaging consecutive runs of points, keeping each run's
/// middle timestamp.
pub fn downsample(points: Vec<TimeSeriesPoint>, max_points: usize) -> Vec<TimeSeriesPoint> {
    if max_points == 0 || points.len() <= max_points {
        return points;
    }

    let bucket_size = points.len().div_ceil(max_points);
    points
        .chunks(bucket_size)
        .map(|chunk| {
            let avg = chunk.iter().map(|p| p.value).sum::<f64>() / chunk.len() as f64;
            TimeSeriesPoint::new(chunk[chunk.len() / 2].time_ms, avg)
        })
        .collect()
}
