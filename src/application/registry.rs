// Widget type registry - type tag to definition lookup
use crate::domain::widget::{LayoutSize, StoredWidget, WidgetInstance};
use crate::domain::widgets::{WidgetDefinition, WidgetTypeInfo, builtin_definitions};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("widget type '{0}' is registered twice")]
    Duplicate(String),
    #[error("widget type tag must not be empty")]
    EmptyType,
    #[error("widget type '{0}' declares an empty default layout size")]
    EmptyDefaultSize(String),
    #[error("unknown widget type '{0}'")]
    NotFound(String),
}

#[derive(Clone, Default)]
pub struct WidgetRegistry {
    definitions: HashMap<&'static str, Arc<dyn WidgetDefinition>>,
    order: Vec<&'static str>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in widget type.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for definition in builtin_definitions() {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    /// Adds a definition. Errors here are programming mistakes and are
    /// expected to abort startup.
    pub fn register(&mut self, definition: Arc<dyn WidgetDefinition>) -> Result<(), RegistryError> {
        let widget_type = definition.widget_type();
        if widget_type.trim().is_empty() {
            return Err(RegistryError::EmptyType);
        }
        if self.definitions.contains_key(widget_type) {
            return Err(RegistryError::Duplicate(widget_type.to_string()));
        }
        let size = definition.default_layout_size();
        if size.w == 0 || size.h == 0 {
            return Err(RegistryError::EmptyDefaultSize(widget_type.to_string()));
        }

        tracing::debug!("Registered widget type {}", widget_type);
        self.definitions.insert(widget_type, definition);
        self.order.push(widget_type);
        Ok(())
    }

    pub fn resolve(&self, widget_type: &str) -> Result<Arc<dyn WidgetDefinition>, RegistryError> {
        self.definitions
            .get(widget_type)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(widget_type.to_string()))
    }

    /// Registered types in registration order.
    pub fn types(&self) -> Vec<WidgetTypeInfo> {
        self.order
            .iter()
            .filter_map(|t| self.definitions.get(t))
            .map(|d| WidgetTypeInfo::of(d.as_ref()))
            .collect()
    }

    /// Turns a stored blob into an instance. Never fails: an unregistered
    /// type yields a placeholder that keeps the raw config untouched.
    pub fn load_instance(
        &self,
        stored: StoredWidget,
        instance_id: &str,
        dashboard_title: &str,
    ) -> WidgetInstance {
        match self.resolve(&stored.widget_type) {
            Ok(definition) => {
                let config = definition.sanitize(&stored.config, instance_id, Some(dashboard_title));
                let title = if stored.title.trim().is_empty() {
                    definition.display_name().to_string()
                } else {
                    stored.title
                };
                WidgetInstance::new(instance_id.to_string(), stored.widget_type, title, config)
            }
            Err(_) => {
                tracing::warn!(
                    "Widget {} has unregistered type '{}'; loading as placeholder",
                    instance_id,
                    stored.widget_type
                );
                WidgetInstance::placeholder(
                    instance_id.to_string(),
                    stored.widget_type,
                    stored.title,
                    stored.config,
                )
            }
        }
    }

    /// New instance of `widget_type` with its default config, sanitized
    /// through the same path as a load, plus the size to place it at.
    pub fn create_instance(
        &self,
        widget_type: &str,
        instance_id: String,
        dashboard_title: &str,
    ) -> Result<(WidgetInstance, LayoutSize), RegistryError> {
        let definition = self.resolve(widget_type)?;
        let config = definition.sanitize(
            &definition.default_config(),
            &instance_id,
            Some(dashboard_title),
        );
        let instance = WidgetInstance::new(
            instance_id,
            widget_type.to_string(),
            definition.display_name().to_string(),
            config,
        );
        Ok((instance, definition.default_layout_size()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::widgets::timer::TimerWidget;
    use serde_json::{Value, json};

    struct Blank;

    impl WidgetDefinition for Blank {
        fn widget_type(&self) -> &'static str {
            ""
        }
        fn display_name(&self) -> &'static str {
            "Blank"
        }
        fn default_config(&self) -> Value {
            json!({})
        }
        fn default_layout_size(&self) -> LayoutSize {
            LayoutSize::new(1, 1)
        }
        fn sanitize(&self, _raw: &Value, _id: &str, _title: Option<&str>) -> Value {
            json!({})
        }
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = WidgetRegistry::with_builtins().unwrap();
        let err = registry.register(Arc::new(TimerWidget)).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("timer".to_string()));
        assert_eq!(
            registry.register(Arc::new(Blank)).unwrap_err(),
            RegistryError::EmptyType
        );
    }

    #[test]
    fn test_types_keep_registration_order() {
        let registry = WidgetRegistry::with_builtins().unwrap();
        let types: Vec<_> = registry.types().iter().map(|t| t.widget_type).collect();
        assert_eq!(types, vec!["timer", "tracker", "transit", "metric_chart"]);
    }

    #[test]
    fn test_unknown_type_loads_as_placeholder() {
        let registry = WidgetRegistry::with_builtins().unwrap();
        let stored = StoredWidget {
            id: "widget-2".to_string(),
            widget_type: "weather".to_string(),
            title: "Forecast".to_string(),
            config: json!({"city": "Oslo"}),
        };
        let instance = registry.load_instance(stored, "widget-2", "Home");
        assert!(instance.is_placeholder());
        assert_eq!(instance.config, json!({"city": "Oslo"}));
    }

    #[test]
    fn test_create_and_load_share_sanitize() {
        let registry = WidgetRegistry::with_builtins().unwrap();
        let (created, size) = registry
            .create_instance("timer", "widget-5".to_string(), "Home")
            .unwrap();
        assert_eq!(size, LayoutSize::new(3, 2));
        assert_eq!(created.config["label"], "Home timer");

        let reloaded = registry.load_instance(created.to_stored(), "widget-5", "Home");
        assert_eq!(reloaded, created);
    }

    #[test]
    fn test_create_unknown_type_fails() {
        let registry = WidgetRegistry::with_builtins().unwrap();
        let err = registry
            .create_instance("weather", "widget-1".to_string(), "Home")
            .unwrap_err();
        assert_eq!(err, RegistryError::NotFound("weather".to_string()));
    }
}
