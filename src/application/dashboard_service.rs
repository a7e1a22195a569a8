// Dashboard service - Use cases behind the HTTP surface
//
// Owns the controller behind a mutex and everything that talks to the
// backend. The lock is never held across a backend call.
use crate::application::backend_api::{BackendApi, BackendError, EntityAction, ResolvedExpression};
use crate::application::dashboard_controller::{DashboardController, DashboardError, EntityTarget};
use crate::application::key_value_store::StoreError;
use crate::application::layout_writer::LayoutWriter;
use crate::application::refresh::{WidgetData, WidgetDataCache, spawn_refresh};
use crate::domain::dashboard::{ChartSeries, DashboardView, WidgetView};
use crate::domain::time_series::{axis_bounds, downsample, render};
use crate::domain::widgets::WidgetTypeInfo;
use crate::domain::widgets::metric_chart::MetricChartConfig;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const CHART_TYPE: &str = "metric_chart";

#[derive(Clone)]
pub struct DashboardService {
    controller: Arc<Mutex<DashboardController>>,
    backend: Arc<dyn BackendApi>,
    cache: WidgetDataCache,
    layout_writer: LayoutWriter,
}

impl DashboardService {
    /// Must be called inside a tokio runtime; spawns the layout writer.
    pub fn new(
        controller: DashboardController,
        backend: Arc<dyn BackendApi>,
        save_debounce: Duration,
    ) -> Self {
        let controller = Arc::new(Mutex::new(controller));
        let (layout_writer, _) = LayoutWriter::spawn(controller.clone(), save_debounce);
        Self {
            controller,
            backend,
            cache: WidgetDataCache::new(),
            layout_writer,
        }
    }

    /// Starts a refresh task for every restored widget that wants one.
    pub async fn start_refreshes(&self) -> usize {
        let mut controller = self.controller.lock().await;
        for (id, plan) in controller.refreshing_widgets() {
            let epoch = self.cache.reset(&id);
            let handle = spawn_refresh(id, epoch, plan, self.backend.clone(), self.cache.clone());
            controller.track_refresh(handle);
        }
        controller.active_refreshes()
    }

    /// Replaces the widget's refresh task. Data cached for the previous
    /// config is dropped, and late results from the old task are ignored.
    fn restart_refresh(&self, controller: &mut DashboardController, id: &str) {
        controller.stop_refresh(id);
        let epoch = self.cache.reset(id);
        if let Some(plan) = controller.refresh_plan(id) {
            let handle = spawn_refresh(
                id.to_string(),
                epoch,
                plan,
                self.backend.clone(),
                self.cache.clone(),
            );
            controller.track_refresh(handle);
        }
    }

    pub async fn view(&self) -> DashboardView {
        self.controller.lock().await.view()
    }

    pub async fn types(&self) -> Vec<WidgetTypeInfo> {
        self.controller.lock().await.types()
    }

    pub async fn add_widget(&self, widget_type: &str) -> Result<WidgetView, DashboardError> {
        let mut controller = self.controller.lock().await;
        let view = controller.add_widget(widget_type)?;
        self.restart_refresh(&mut controller, &view.id);
        Ok(view)
    }

    pub async fn update_widget(
        &self,
        id: &str,
        title: Option<String>,
        config: Option<Value>,
    ) -> Result<WidgetView, DashboardError> {
        let config_changed = config.is_some();
        let mut controller = self.controller.lock().await;
        let view = controller.update_widget(id, title, config)?;
        if config_changed {
            self.restart_refresh(&mut controller, id);
        }
        Ok(view)
    }

    pub async fn remove_widget(&self, id: &str) -> Result<(), DashboardError> {
        let mut controller = self.controller.lock().await;
        controller.remove_widget(id)?;
        self.cache.remove(id);
        Ok(())
    }

    pub async fn move_widget(&self, id: &str, x: u32, y: u32) -> Result<WidgetView, DashboardError> {
        let view = self.controller.lock().await.move_widget(id, x, y)?;
        self.layout_writer.notify();
        Ok(view)
    }

    pub async fn resize_widget(&self, id: &str, w: u32, h: u32) -> Result<WidgetView, DashboardError> {
        let view = self.controller.lock().await.resize_widget(id, w, h)?;
        self.layout_writer.notify();
        Ok(view)
    }

    pub async fn reset_layout(&self) -> Result<DashboardView, DashboardError> {
        self.controller.lock().await.reset_layout()
    }

    /// Latest refreshed payload, `None` until the first successful tick.
    pub async fn widget_data(&self, id: &str) -> Result<Option<WidgetData>, DashboardError> {
        if self.controller.lock().await.instance(id).is_none() {
            return Err(DashboardError::NotFound(id.to_string()));
        }
        Ok(self.cache.get(id))
    }

    /// Fetches a metric chart's entries and runs them through the pipeline.
    pub async fn widget_series(&self, id: &str) -> Result<ChartSeries, DashboardError> {
        let config = {
            let controller = self.controller.lock().await;
            let instance = controller
                .instance(id)
                .ok_or_else(|| DashboardError::NotFound(id.to_string()))?;
            if instance.widget_type != CHART_TYPE || instance.is_placeholder() {
                return Err(DashboardError::Unsupported {
                    id: id.to_string(),
                    operation: "series",
                });
            }
            MetricChartConfig::from_raw(&instance.config, Some(controller.title()))
        };
        let entity_id = config
            .entity_id
            .as_deref()
            .ok_or_else(|| DashboardError::NoEntity(id.to_string()))?;

        let entries = self.backend.list_entries(entity_id).await?;
        let max_points = usize::try_from(config.max_points).unwrap_or(usize::MAX);
        let points = downsample(render(&entries, config.render_mode()), max_points);
        let bounds = axis_bounds(&points, config.y_min, config.y_max);
        tracing::debug!("Rendered {} points for chart {}", points.len(), id);

        Ok(ChartSeries {
            id: id.to_string(),
            label: config.series_label,
            color: config.color,
            render_mode: config.render_mode,
            fraction_digits: config.fraction_digits,
            points,
            bounds,
        })
    }

    /// Runs one of the widget's declared actions against its entity. The
    /// response becomes the widget's cached data.
    pub async fn entity_action(&self, id: &str, action: &str) -> Result<Value, DashboardError> {
        let (target, epoch) = self.entity_target(id).await?;
        let action = target
            .actions
            .iter()
            .any(|declared| *declared == action)
            .then(|| EntityAction::parse(action))
            .flatten()
            .ok_or_else(|| DashboardError::Unsupported {
                id: id.to_string(),
                operation: "this action",
            })?;
        let entity_id = target
            .entity_id
            .ok_or_else(|| DashboardError::NoEntity(id.to_string()))?;

        let value = self.backend.entity_action(&entity_id, action).await?;
        tracing::info!("Ran {} on entity {} for widget {}", action.path_segment(), entity_id, id);
        self.cache.insert(id, epoch, value.clone());
        Ok(value)
    }

    /// The widget's entity target and its cache epoch, read under one lock so
    /// a response arriving after the widget is removed or reconfigured is
    /// not cached.
    async fn entity_target(&self, id: &str) -> Result<(EntityTarget, u64), DashboardError> {
        let controller = self.controller.lock().await;
        let target = controller.entity_target(id)?;
        Ok((target, self.cache.epoch(id)))
    }

    /// Creates a backend entity for the widget and stores its id in the
    /// widget's config.
    pub async fn link_new_entity(&self, id: &str) -> Result<WidgetView, DashboardError> {
        let target = self.controller.lock().await.entity_target(id)?;
        let entity_type = target.entity_type.ok_or_else(|| DashboardError::Unsupported {
            id: id.to_string(),
            operation: "entity linking",
        })?;

        let created = self
            .backend
            .create_entity(entity_type, &target.entity_name, target.category.as_deref())
            .await?;
        let entity_id = match created.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(BackendError::Decode(format!(
                    "created {} has no id",
                    entity_type
                ))
                .into());
            }
        };
        tracing::info!("Created {} entity {} for widget {}", entity_type, entity_id, id);

        let mut controller = self.controller.lock().await;
        let mut config = controller
            .instance(id)
            .map(|i| i.config.clone())
            .ok_or_else(|| DashboardError::NotFound(id.to_string()))?;
        if let Value::Object(map) = &mut config {
            map.insert("entity_id".to_string(), Value::String(entity_id));
        }
        let view = controller.update_widget(id, None, Some(config))?;
        self.restart_refresh(&mut controller, id);
        Ok(view)
    }

    pub async fn update_entity_attribute(
        &self,
        id: &str,
        attribute: &str,
        value: Value,
    ) -> Result<Value, DashboardError> {
        let (target, epoch) = self.entity_target(id).await?;
        let entity_id = target
            .entity_id
            .ok_or_else(|| DashboardError::NoEntity(id.to_string()))?;
        let updated = self.backend.update_attribute(&entity_id, attribute, value).await?;
        self.cache.insert(id, epoch, updated.clone());
        Ok(updated)
    }

    pub async fn list_entities(
        &self,
        entity_type: &str,
        category: Option<&str>,
    ) -> Result<Vec<Value>, BackendError> {
        self.backend.list_entities(entity_type, category).await
    }

    pub async fn resolve(
        &self,
        expression: &str,
        anchor_labels: &[String],
    ) -> Result<ResolvedExpression, BackendError> {
        self.backend.resolve(expression, anchor_labels).await
    }

    /// Writes any pending layout change; used on shutdown.
    pub async fn flush(&self) -> Result<bool, StoreError> {
        self.controller.lock().await.flush_layout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dashboard_controller::DashboardKeys;
    use crate::application::refresh::test_support::FakeBackend;
    use crate::application::registry::WidgetRegistry;
    use crate::domain::layout::GridSettings;
    use crate::domain::time_series::TimeSeriesEntry;
    use crate::infrastructure::memory_store::MemoryStore;
    use chrono::DateTime;
    use serde_json::json;

    fn service_with(backend: Arc<FakeBackend>) -> DashboardService {
        let controller = DashboardController::restore(
            "Home",
            Arc::new(WidgetRegistry::with_builtins().unwrap()),
            Arc::new(MemoryStore::new()),
            DashboardKeys::namespaced("home"),
            GridSettings::default(),
        )
        .unwrap();
        DashboardService::new(controller, backend, Duration::from_millis(10))
    }

    fn entry(secs: i64, value: f64) -> TimeSeriesEntry {
        TimeSeriesEntry::new(DateTime::from_timestamp(secs, 0).unwrap(), value, None)
    }

    #[tokio::test]
    async fn test_series_is_sorted_and_bounded() {
        let backend = Arc::new(FakeBackend::default());
        *backend.entries.lock().unwrap() = vec![entry(7_200, 30.0), entry(0, 10.0), entry(3_600, 20.0)];
        let service = service_with(backend);
        service.add_widget("metric_chart").await.unwrap();

        assert!(matches!(
            service.widget_series("widget-1").await,
            Err(DashboardError::NoEntity(_))
        ));

        service
            .update_widget("widget-1", None, Some(json!({"entity_id": "m-1", "y_max": 50})))
            .await
            .unwrap();
        let series = service.widget_series("widget-1").await.unwrap();
        let values: Vec<f64> = series.points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![10.0, 20.0, 30.0]);
        assert_eq!(series.bounds.min, 8.0);
        assert_eq!(series.bounds.max, 50.0);
        assert_eq!(series.render_mode, "raw");
    }

    #[tokio::test]
    async fn test_series_requires_chart() {
        let service = service_with(Arc::new(FakeBackend::default()));
        service.add_widget("timer").await.unwrap();
        assert!(matches!(
            service.widget_series("widget-1").await,
            Err(DashboardError::Unsupported { .. })
        ));
        assert!(matches!(
            service.widget_series("widget-7").await,
            Err(DashboardError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_entity_actions() {
        let backend = Arc::new(FakeBackend::default());
        let service = service_with(backend.clone());
        service.add_widget("timer").await.unwrap();

        assert!(matches!(
            service.entity_action("widget-1", "start-timer").await,
            Err(DashboardError::NoEntity(_))
        ));

        service
            .update_widget("widget-1", None, Some(json!({"entity_id": "t-1"})))
            .await
            .unwrap();
        service.entity_action("widget-1", "pause-timer").await.unwrap();
        assert_eq!(
            backend.actions.lock().unwrap().as_slice(),
            &[("t-1".to_string(), EntityAction::PauseTimer)]
        );
        let cached = service.widget_data("widget-1").await.unwrap().unwrap();
        assert_eq!(cached.value["action"], "pause-timer");

        assert!(matches!(
            service.entity_action("widget-1", "start-occurrence").await,
            Err(DashboardError::Unsupported { .. })
        ));

        service
            .update_widget("widget-1", None, Some(json!({"entity_id": "broken"})))
            .await
            .unwrap();
        let err = service.entity_action("widget-1", "start-timer").await.unwrap_err();
        assert!(matches!(
            err,
            DashboardError::Backend(BackendError::Status { status: 409, .. })
        ));
    }

    #[tokio::test]
    async fn test_link_new_entity_starts_refresh() {
        let service = service_with(Arc::new(FakeBackend::default()));
        service.add_widget("timer").await.unwrap();
        assert_eq!(service.controller.lock().await.active_refreshes(), 0);

        let view = service.link_new_entity("widget-1").await.unwrap();
        assert_eq!(view.config["entity_id"], "timer-new");
        assert_eq!(service.controller.lock().await.active_refreshes(), 1);

        service.add_widget("transit").await.unwrap();
        assert!(matches!(
            service.link_new_entity("widget-2").await,
            Err(DashboardError::Unsupported { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_drops_refresh_and_data() {
        let service = service_with(Arc::new(FakeBackend::default()));
        service.add_widget("timer").await.unwrap();
        service.link_new_entity("widget-1").await.unwrap();
        service.entity_action("widget-1", "start-timer").await.unwrap();

        service.remove_widget("widget-1").await.unwrap();
        assert_eq!(service.controller.lock().await.active_refreshes(), 0);
        assert!(matches!(
            service.widget_data("widget-1").await,
            Err(DashboardError::NotFound(_))
        ));
        assert!(service.cache.get("widget-1").is_none());
    }

    #[tokio::test]
    async fn test_reused_id_starts_without_stale_data() {
        let service = service_with(Arc::new(FakeBackend::default()));
        service.add_widget("timer").await.unwrap();
        service.link_new_entity("widget-1").await.unwrap();
        service.entity_action("widget-1", "start-timer").await.unwrap();
        let old_epoch = service.cache.epoch("widget-1");

        service.remove_widget("widget-1").await.unwrap();
        let view = service.add_widget("timer").await.unwrap();
        assert_eq!(view.id, "widget-1");

        // A write from the removed widget's task lands after the re-add.
        assert!(!service.cache.insert("widget-1", old_epoch, json!({"stale": true})));
        assert!(service.widget_data("widget-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_moves_are_flushed() {
        let service = service_with(Arc::new(FakeBackend::default()));
        service.add_widget("tracker").await.unwrap();
        service.move_widget("widget-1", 2, 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!service.flush().await.unwrap());
        assert_eq!(service.view().await.widgets[0].x, 2);
    }
}
