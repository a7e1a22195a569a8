// Dashboard controller - keeps instances and rectangles in step
//
// Every widget in the instance store has exactly one rectangle in the layout
// and vice versa. Adds go instance-then-rectangle, removals
// rectangle-then-instance.
use crate::application::backend_api::BackendError;
use crate::application::instance_store::WidgetInstanceStore;
use crate::application::key_value_store::{KeyValueStore, StoreError};
use crate::application::layout_persistence::LayoutPersistence;
use crate::application::refresh::{RefreshHandle, RefreshTasks};
use crate::application::registry::{RegistryError, WidgetRegistry};
use crate::domain::dashboard::{DashboardView, WidgetView};
use crate::domain::layout::{GridLayout, GridSettings, LayoutError, RectState};
use crate::domain::widget::{LayoutSize, WidgetInstance};
use crate::domain::widgets::{RefreshPlan, WidgetTypeInfo};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Size given to placeholders whose type (and so default size) is unknown.
const PLACEHOLDER_SIZE: LayoutSize = LayoutSize::new(4, 2);

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("no widget with id '{0}'")]
    NotFound(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("widget '{0}' has an unregistered type and cannot be configured")]
    Inert(String),
    #[error("widget '{id}' does not support {operation}")]
    Unsupported { id: String, operation: &'static str },
    #[error("widget '{0}' is not linked to a backend entity")]
    NoEntity(String),
}

#[derive(Debug, Clone)]
pub struct DashboardKeys {
    pub widgets: String,
    pub layout: String,
}

impl DashboardKeys {
    pub fn namespaced(namespace: &str) -> Self {
        Self {
            widgets: format!("{}.widgets", namespace),
            layout: format!("{}.layout", namespace),
        }
    }
}

/// What a widget is linked to on the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityTarget {
    pub widget_type: String,
    pub entity_type: Option<&'static str>,
    pub entity_id: Option<String>,
    pub entity_name: String,
    pub category: Option<String>,
    pub actions: &'static [&'static str],
}

pub struct DashboardController {
    title: String,
    registry: Arc<WidgetRegistry>,
    store: Arc<dyn KeyValueStore>,
    instances: WidgetInstanceStore,
    layout: GridLayout,
    layout_persistence: LayoutPersistence,
    refresh: RefreshTasks,
    layout_dirty: bool,
}

impl DashboardController {
    /// Restores instances and layout from `store`, repairing any broken
    /// instance/rectangle pairing.
    pub fn restore(
        title: impl Into<String>,
        registry: Arc<WidgetRegistry>,
        store: Arc<dyn KeyValueStore>,
        keys: DashboardKeys,
        grid: GridSettings,
    ) -> Result<Self, DashboardError> {
        let title = title.into();
        let (instances, ids_repaired) =
            WidgetInstanceStore::load(store.as_ref(), keys.widgets, &registry, &title)?;
        let layout_persistence = LayoutPersistence::new(keys.layout);

        let (mut layout, mut layout_repaired) = match layout_persistence.load(store.as_ref())? {
            Some(stored) => {
                let (layout, rejected) = GridLayout::restore(grid, stored.columns, stored.items);
                (layout, !rejected.is_empty())
            }
            None => (GridLayout::new(grid), false),
        };

        let live: HashSet<&str> = instances.iter().map(|i| i.id.as_str()).collect();
        let orphans: Vec<String> = layout
            .rects()
            .iter()
            .filter(|r| !live.contains(r.id.as_str()))
            .map(|r| r.id.clone())
            .collect();
        for id in &orphans {
            tracing::debug!("Dropping orphan rectangle {}", id);
            layout.remove(id);
        }
        layout_repaired |= !orphans.is_empty();

        let mut controller = Self {
            title,
            registry,
            store,
            instances,
            layout,
            layout_persistence,
            refresh: RefreshTasks::default(),
            layout_dirty: false,
        };

        let unplaced: Vec<(String, LayoutSize)> = controller
            .instances
            .iter()
            .filter(|i| !controller.layout.contains(&i.id))
            .map(|i| (i.id.clone(), controller.default_size(i)))
            .collect();
        for (id, size) in unplaced {
            tracing::debug!("Placing widget {} that had no stored rectangle", id);
            controller.layout.place(&id, size)?;
            layout_repaired = true;
        }

        if ids_repaired {
            controller.instances.save(controller.store.as_ref())?;
        }
        if layout_repaired {
            controller.save_layout()?;
        }

        tracing::info!(
            "Restored dashboard '{}' with {} widgets on {} columns",
            controller.title,
            controller.instances.len(),
            controller.layout.columns()
        );
        Ok(controller)
    }

    fn default_size(&self, instance: &WidgetInstance) -> LayoutSize {
        self.registry
            .resolve(&instance.widget_type)
            .map(|d| d.default_layout_size())
            .unwrap_or(PLACEHOLDER_SIZE)
    }

    fn save_layout(&mut self) -> Result<(), StoreError> {
        self.layout_persistence.save(self.store.as_ref(), &self.layout)?;
        self.layout_dirty = false;
        Ok(())
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn types(&self) -> Vec<WidgetTypeInfo> {
        self.registry.types()
    }

    pub fn instance(&self, id: &str) -> Option<&WidgetInstance> {
        self.instances.get(id)
    }

    /// Adds a widget of `widget_type` at the layout's preferred position.
    pub fn add_widget(&mut self, widget_type: &str) -> Result<WidgetView, DashboardError> {
        let id = self.instances.next_id();
        let (instance, size) = self.registry.create_instance(widget_type, id.clone(), &self.title)?;

        self.instances.insert(instance);
        if let Err(e) = self.layout.place(&id, size) {
            self.instances.remove(&id);
            return Err(e.into());
        }

        self.instances.save(self.store.as_ref())?;
        self.save_layout()?;
        tracing::info!("Added {} widget {}", widget_type, id);
        self.widget_view(&id)
            .ok_or_else(|| DashboardError::NotFound(id.clone()))
    }

    /// Updates title and/or config. A new config goes through the type's
    /// sanitizer before it is stored.
    pub fn update_widget(
        &mut self,
        id: &str,
        title: Option<String>,
        config: Option<Value>,
    ) -> Result<WidgetView, DashboardError> {
        let instance = self
            .instances
            .get(id)
            .ok_or_else(|| DashboardError::NotFound(id.to_string()))?;

        let config = match config {
            Some(_) if instance.is_placeholder() => {
                return Err(DashboardError::Inert(id.to_string()));
            }
            Some(raw) => {
                let definition = self.registry.resolve(&instance.widget_type)?;
                Some(definition.sanitize(&raw, id, Some(&self.title)))
            }
            None => None,
        };

        if let Some(instance) = self.instances.get_mut(id) {
            if let Some(title) = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
                instance.title = title;
            }
            if let Some(config) = config {
                instance.config = config;
            }
        }
        self.instances.save(self.store.as_ref())?;
        self.widget_view(id)
            .ok_or_else(|| DashboardError::NotFound(id.to_string()))
    }

    /// Removes a widget, its rectangle and its refresh task. Also clears a
    /// stray rectangle that has no instance.
    pub fn remove_widget(&mut self, id: &str) -> Result<(), DashboardError> {
        self.refresh.cancel(id);

        let had_rect = self.layout.remove(id).is_some();
        if had_rect {
            self.save_layout()?;
        }
        let had_instance = self.instances.remove(id).is_some();
        if had_instance {
            self.instances.save(self.store.as_ref())?;
        }

        if !had_rect && !had_instance {
            return Err(DashboardError::NotFound(id.to_string()));
        }
        tracing::info!("Removed widget {}", id);
        Ok(())
    }

    fn require_instance(&self, id: &str) -> Result<(), DashboardError> {
        match self.instances.get(id) {
            Some(_) => Ok(()),
            None => Err(DashboardError::NotFound(id.to_string())),
        }
    }

    /// Moves a widget. Applied in memory immediately; persisted on the next
    /// `flush_layout`.
    pub fn move_widget(&mut self, id: &str, x: u32, y: u32) -> Result<WidgetView, DashboardError> {
        self.require_instance(id)?;
        self.layout.move_rect(id, x, y)?;
        self.layout_dirty = true;
        self.widget_view(id)
            .ok_or_else(|| DashboardError::NotFound(id.to_string()))
    }

    pub fn resize_widget(&mut self, id: &str, w: u32, h: u32) -> Result<WidgetView, DashboardError> {
        self.require_instance(id)?;
        self.layout.resize_rect(id, w, h)?;
        self.layout_dirty = true;
        self.widget_view(id)
            .ok_or_else(|| DashboardError::NotFound(id.to_string()))
    }

    /// Writes the layout if a move or resize happened since the last write.
    pub fn flush_layout(&mut self) -> Result<bool, StoreError> {
        if !self.layout_dirty {
            return Ok(false);
        }
        self.save_layout()?;
        Ok(true)
    }

    /// The only operation that shrinks the grid.
    pub fn reset_layout(&mut self) -> Result<DashboardView, DashboardError> {
        self.layout.reset();
        self.save_layout()?;
        tracing::info!("Layout reset to {} columns", self.layout.columns());
        Ok(self.view())
    }

    pub fn entity_target(&self, id: &str) -> Result<EntityTarget, DashboardError> {
        let instance = self
            .instances
            .get(id)
            .ok_or_else(|| DashboardError::NotFound(id.to_string()))?;
        if instance.is_placeholder() {
            return Err(DashboardError::Inert(id.to_string()));
        }
        let definition = self.registry.resolve(&instance.widget_type)?;
        let text = |key: &str| {
            instance
                .config
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Ok(EntityTarget {
            widget_type: instance.widget_type.clone(),
            entity_type: definition.entity_type(),
            entity_id: text("entity_id"),
            entity_name: text("entity_name").unwrap_or_else(|| instance.title.clone()),
            category: text("category"),
            actions: definition.supported_actions(),
        })
    }

    pub fn refresh_plan(&self, id: &str) -> Option<RefreshPlan> {
        let instance = self.instances.get(id)?;
        if instance.is_placeholder() {
            return None;
        }
        let definition = self.registry.resolve(&instance.widget_type).ok()?;
        definition.refresh_plan(&instance.config)
    }

    /// Ids of every widget that wants periodic refresh.
    pub fn refreshing_widgets(&self) -> Vec<(String, RefreshPlan)> {
        self.instances
            .iter()
            .filter_map(|i| self.refresh_plan(&i.id).map(|plan| (i.id.clone(), plan)))
            .collect()
    }

    /// Takes ownership of a refresh task. A handle for a widget that no
    /// longer exists is dropped, which stops it.
    pub fn track_refresh(&mut self, handle: RefreshHandle) {
        if self.instances.get(handle.widget_id()).is_some() {
            self.refresh.insert(handle);
        }
    }

    pub fn stop_refresh(&mut self, id: &str) {
        self.refresh.cancel(id);
    }

    pub fn active_refreshes(&self) -> usize {
        self.refresh.len()
    }

    pub fn widget_view(&self, id: &str) -> Option<WidgetView> {
        let instance = self.instances.get(id)?;
        let rect = self.layout.get(id)?;
        let can_render_editor = !instance.is_placeholder()
            && self
                .registry
                .resolve(&instance.widget_type)
                .map(|d| d.can_render_editor())
                .unwrap_or(false);
        Some(WidgetView {
            id: instance.id.clone(),
            widget_type: instance.widget_type.clone(),
            title: instance.title.clone(),
            status: instance.status,
            can_render_editor,
            config: instance.config.clone(),
            x: rect.x,
            y: rect.y,
            w: rect.w,
            h: rect.h,
            state: self.layout.state(id).unwrap_or(RectState::Placed),
            pixels: self.layout.pixel_box(rect),
        })
    }

    pub fn view(&self) -> DashboardView {
        let settings = self.layout.settings();
        DashboardView {
            title: self.title.clone(),
            columns: self.layout.columns(),
            cell_width: settings.cell_width,
            cell_height: settings.cell_height,
            margin: settings.margin,
            widgets: self
                .instances
                .iter()
                .filter_map(|i| self.widget_view(&i.id))
                .collect(),
        }
    }

    #[cfg(test)]
    fn assert_paired(&self) {
        let instance_ids: HashSet<&str> = self.instances.iter().map(|i| i.id.as_str()).collect();
        let rect_ids: HashSet<&str> = self.layout.rects().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(instance_ids, rect_ids);
        assert_eq!(self.layout.rects().len(), rect_ids.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_store::MemoryStore;
    use serde_json::json;

    fn controller_on(store: Arc<MemoryStore>) -> DashboardController {
        DashboardController::restore(
            "Home",
            Arc::new(WidgetRegistry::with_builtins().unwrap()),
            store,
            DashboardKeys::namespaced("home"),
            GridSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_add_timer_to_empty_dashboard() {
        let store = Arc::new(MemoryStore::new());
        let mut controller = controller_on(store.clone());

        let view = controller.add_widget("timer").unwrap();
        assert_eq!((view.x, view.y, view.w, view.h), (0, 0, 3, 2));
        assert_eq!(view.id, "widget-1");
        assert_eq!(controller.view().columns, 12);
        assert!(store.get("home.widgets").unwrap().is_some());
        assert!(store.get("home.layout").unwrap().is_some());
        controller.assert_paired();
    }

    #[test]
    fn test_add_unknown_type_leaves_nothing_behind() {
        let mut controller = controller_on(Arc::new(MemoryStore::new()));
        let err = controller.add_widget("weather").unwrap_err();
        assert!(matches!(err, DashboardError::Registry(RegistryError::NotFound(_))));
        assert!(controller.view().widgets.is_empty());
        controller.assert_paired();
    }

    #[test]
    fn test_restore_round_trips() {
        let store = Arc::new(MemoryStore::new());
        let mut controller = controller_on(store.clone());
        controller.add_widget("timer").unwrap();
        controller.add_widget("metric_chart").unwrap();
        controller.move_widget("widget-2", 3, 6).unwrap();
        assert!(controller.flush_layout().unwrap());
        let before = serde_json::to_value(controller.view()).unwrap();

        let restored = controller_on(store);
        assert_eq!(serde_json::to_value(restored.view()).unwrap(), before);
    }

    #[test]
    fn test_restore_repairs_broken_pairing() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                "home.widgets",
                &json!([
                    {"id": "widget-1", "type": "timer", "title": "A", "config": {}},
                    {"id": "widget-2", "type": "tracker", "title": "B", "config": {}},
                ])
                .to_string(),
            )
            .unwrap();
        store
            .set(
                "home.layout",
                &json!({"columns": 12, "items": [
                    {"id": "widget-1", "x": 0, "y": 0, "w": 3, "h": 2},
                    {"id": "ghost", "x": 5, "y": 0, "w": 2, "h": 2},
                ]})
                .to_string(),
            )
            .unwrap();

        let controller = controller_on(store.clone());
        controller.assert_paired();
        let rect = controller.widget_view("widget-2").unwrap();
        assert_eq!((rect.x, rect.y), (3, 0));

        let saved: Value = serde_json::from_str(&store.get("home.layout").unwrap().unwrap()).unwrap();
        let ids: Vec<_> = saved["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["widget-1", "widget-2"]);
    }

    #[test]
    fn test_unknown_type_placeholder_can_be_deleted() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                "home.widgets",
                &json!([{"id": "widget-4", "type": "weather", "title": "W", "config": {"city": "Oslo"}}])
                    .to_string(),
            )
            .unwrap();
        let mut controller = controller_on(store.clone());

        let view = controller.widget_view("widget-4").unwrap();
        assert!(!view.can_render_editor);
        assert_eq!((view.w, view.h), (4, 2));
        assert!(matches!(
            controller.update_widget("widget-4", None, Some(json!({}))),
            Err(DashboardError::Inert(_))
        ));

        controller.remove_widget("widget-4").unwrap();
        controller.assert_paired();
        assert_eq!(store.get("home.widgets").unwrap().unwrap(), "[]");
        let layout: Value = serde_json::from_str(&store.get("home.layout").unwrap().unwrap()).unwrap();
        assert_eq!(layout["items"], json!([]));
    }

    #[test]
    fn test_ids_never_reuse_a_surviving_suffix() {
        let mut controller = controller_on(Arc::new(MemoryStore::new()));
        controller.add_widget("timer").unwrap();
        controller.add_widget("timer").unwrap();
        controller.add_widget("timer").unwrap();
        controller.remove_widget("widget-2").unwrap();
        let view = controller.add_widget("tracker").unwrap();
        assert_eq!(view.id, "widget-4");
        controller.assert_paired();
    }

    #[test]
    fn test_update_sanitizes_config() {
        let mut controller = controller_on(Arc::new(MemoryStore::new()));
        controller.add_widget("tracker").unwrap();
        let view = controller
            .update_widget(
                "widget-1",
                Some("  Water  ".to_string()),
                Some(json!({"step": "0.5", "pinned_patterns": "daily", "junk": 1})),
            )
            .unwrap();
        assert_eq!(view.title, "Water");
        assert_eq!(view.config["step"], 0.5);
        assert_eq!(view.config["pinned_patterns"], json!(["daily"]));
        assert!(view.config.get("junk").is_none());
    }

    #[test]
    fn test_rejected_move_keeps_position_and_skips_write() {
        let store = Arc::new(MemoryStore::new());
        let mut controller = controller_on(store.clone());
        controller.add_widget("tracker").unwrap();
        controller.add_widget("tracker").unwrap();
        let writes = store.writes("home.layout");

        assert!(controller.move_widget("widget-2", 1, 1).is_err());
        assert_eq!(controller.widget_view("widget-2").unwrap().x, 4);
        assert!(!controller.flush_layout().unwrap());
        assert_eq!(store.writes("home.layout"), writes);
    }

    #[test]
    fn test_move_far_below_grid_is_rejected_and_view_renders() {
        let store = Arc::new(MemoryStore::new());
        let mut controller = controller_on(store.clone());
        controller.add_widget("timer").unwrap();

        let err = controller.move_widget("widget-1", 0, 100_000_000).unwrap_err();
        assert!(matches!(err, DashboardError::Layout(LayoutError::RowLimit { .. })));
        let view = controller.view();
        assert_eq!((view.widgets[0].x, view.widgets[0].y), (0, 0));
        assert!(!controller.flush_layout().unwrap());
    }

    #[test]
    fn test_restore_replaces_rect_below_row_limit() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                "home.widgets",
                &json!([{"id": "widget-1", "type": "timer", "title": "A", "config": {}}]).to_string(),
            )
            .unwrap();
        store
            .set(
                "home.layout",
                &json!({"columns": 12, "items": [
                    {"id": "widget-1", "x": 0, "y": 100000000u32, "w": 3, "h": 2},
                ]})
                .to_string(),
            )
            .unwrap();

        let controller = controller_on(store);
        controller.assert_paired();
        let rect = controller.widget_view("widget-1").unwrap();
        assert_eq!((rect.x, rect.y), (0, 0));
        assert_eq!(rect.pixels.top, 8);
    }

    #[test]
    fn test_reset_layout_shrinks_columns() {
        let mut controller = controller_on(Arc::new(MemoryStore::new()));
        controller.add_widget("timer").unwrap();
        controller.move_widget("widget-1", 30, 0).unwrap();
        assert!(controller.view().columns > 12);

        let view = controller.reset_layout().unwrap();
        assert_eq!(view.columns, 12);
        assert_eq!((view.widgets[0].x, view.widgets[0].y), (0, 0));
    }

    #[test]
    fn test_entity_target() {
        let mut controller = controller_on(Arc::new(MemoryStore::new()));
        controller.add_widget("timer").unwrap();
        let target = controller.entity_target("widget-1").unwrap();
        assert_eq!(target.entity_type, Some("timer"));
        assert_eq!(target.entity_id, None);
        assert_eq!(target.entity_name, "Home timer (widget-1)");
        assert!(target.actions.contains(&"pause-timer"));
        assert!(matches!(
            controller.entity_target("widget-9"),
            Err(DashboardError::NotFound(_))
        ));
    }

    #[test]
    fn test_refresh_plans_follow_config() {
        let mut controller = controller_on(Arc::new(MemoryStore::new()));
        controller.add_widget("timer").unwrap();
        assert!(controller.refresh_plan("widget-1").is_none());

        controller
            .update_widget("widget-1", None, Some(json!({"entity_id": "t-1"})))
            .unwrap();
        assert_eq!(controller.refreshing_widgets().len(), 1);
    }
}
