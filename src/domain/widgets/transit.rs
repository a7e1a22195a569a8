// Transit board widget: polls a departures feed for a set of stops.
use super::{RefreshPlan, RefreshSource, WidgetDefinition, to_config};
use crate::domain::sanitize::Fields;
use crate::domain::widget::LayoutSize;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_REFRESH_SECS: u64 = 30;
const MIN_REFRESH_SECS: u64 = 10;
const DEFAULT_MAX_DEPARTURES: u64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitStop {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitConfig {
    pub feed_url: Option<String>,
    pub stops: Vec<TransitStop>,
    /// Line filter; empty shows every line.
    pub lines: Vec<String>,
    pub max_departures: u64,
    pub refresh_secs: u64,
}

impl Default for TransitConfig {
    fn default() -> Self {
        Self {
            feed_url: None,
            stops: Vec::new(),
            lines: Vec::new(),
            max_departures: DEFAULT_MAX_DEPARTURES,
            refresh_secs: DEFAULT_REFRESH_SECS,
        }
    }
}

impl TransitConfig {
    pub fn from_raw(raw: &Value) -> Self {
        let f = Fields::of(raw);
        let stops = f
            .objects("stops")
            .into_iter()
            .filter_map(|stop| {
                let id = stop.opt_string("id")?;
                let name = stop.string("name", &id);
                Some(TransitStop { id, name })
            })
            .collect();
        Self {
            feed_url: f
                .opt_string("feed_url")
                .filter(|u| u.starts_with("http://") || u.starts_with("https://")),
            stops,
            lines: f.string_list("lines"),
            max_departures: f.positive_u64("max_departures", DEFAULT_MAX_DEPARTURES),
            refresh_secs: f
                .positive_u64("refresh_secs", DEFAULT_REFRESH_SECS)
                .max(MIN_REFRESH_SECS),
        }
    }

    /// Feed URL with the stop ids and departure limit appended.
    pub fn request_url(&self) -> Option<String> {
        let base = self.feed_url.as_ref()?;
        let stops = self
            .stops
            .iter()
            .map(|s| urlencoding::encode(&s.id).into_owned())
            .collect::<Vec<_>>()
            .join(",");
        let separator = if base.contains('?') { '&' } else { '?' };
        Some(format!(
            "{}{}stops={}&limit={}",
            base, separator, stops, self.max_departures
        ))
    }
}

pub struct TransitWidget;

impl WidgetDefinition for TransitWidget {
    fn widget_type(&self) -> &'static str {
        "transit"
    }

    fn display_name(&self) -> &'static str {
        "Transit departures"
    }

    fn default_config(&self) -> Value {
        to_config(&TransitConfig::default())
    }

    fn default_layout_size(&self) -> LayoutSize {
        LayoutSize::new(4, 4)
    }

    fn sanitize(&self, raw: &Value, _instance_id: &str, _context_title: Option<&str>) -> Value {
        to_config(&TransitConfig::from_raw(raw))
    }

    fn refresh_plan(&self, config: &Value) -> Option<RefreshPlan> {
        let config = TransitConfig::from_raw(config);
        if config.stops.is_empty() {
            return None;
        }
        Some(RefreshPlan {
            interval: Duration::from_secs(config.refresh_secs),
            source: RefreshSource::Feed {
                url: config.request_url()?,
            },
        })
    }
}
