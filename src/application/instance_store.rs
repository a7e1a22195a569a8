// Widget instance store - ordered instances, owner of the `widgets` key
use crate::application::key_value_store::{KeyValueStore, StoreError};
use crate::application::registry::WidgetRegistry;
use crate::domain::widget::{StoredWidget, WidgetInstance, next_widget_id};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct WidgetInstanceStore {
    key: String,
    instances: Vec<WidgetInstance>,
}

impl WidgetInstanceStore {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            instances: Vec::new(),
        }
    }

    /// Loads and sanitizes every stored instance. Damaged entries are
    /// repaired where possible: blobs that are not objects are skipped, and
    /// missing or duplicate ids get a fresh one. Returns the store and
    /// whether anything was repaired.
    pub fn load(
        store: &dyn KeyValueStore,
        key: impl Into<String>,
        registry: &WidgetRegistry,
        dashboard_title: &str,
    ) -> Result<(Self, bool), StoreError> {
        let mut this = Self::new(key);
        let Some(raw) = store.get(&this.key)? else {
            return Ok((this, false));
        };

        let blobs: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(Value::Array(items)) => items,
            Ok(_) | Err(_) => {
                tracing::warn!("Stored widget list under '{}' is unreadable; starting empty", this.key);
                return Ok((this, true));
            }
        };

        let mut repaired = false;
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for blob in blobs {
            match serde_json::from_value::<StoredWidget>(blob) {
                Ok(stored) if !stored.id.is_empty() && seen.insert(stored.id.clone()) => {
                    pending.push((Some(stored.id.clone()), stored));
                }
                Ok(stored) => {
                    repaired = true;
                    pending.push((None, stored));
                }
                Err(e) => {
                    repaired = true;
                    tracing::warn!("Skipping stored widget that is not an object: {}", e);
                }
            }
        }

        // Fresh ids are assigned after every surviving id is known, so they
        // never collide with one that appears later in the list.
        for (id, stored) in pending {
            let id = match id {
                Some(id) => id,
                None => {
                    let id = next_widget_id(seen.iter().map(String::as_str));
                    seen.insert(id.clone());
                    id
                }
            };
            let instance = registry.load_instance(stored, &id, dashboard_title);
            this.instances.push(instance);
        }

        Ok((this, repaired))
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<(), StoreError> {
        let stored: Vec<StoredWidget> = self.instances.iter().map(WidgetInstance::to_stored).collect();
        let encoded = serde_json::to_string(&stored).map_err(|source| StoreError::Encode {
            key: self.key.clone(),
            source,
        })?;
        store.set(&self.key, &encoded)
    }

    pub fn next_id(&self) -> String {
        next_widget_id(self.instances.iter().map(|i| i.id.as_str()))
    }

    pub fn insert(&mut self, instance: WidgetInstance) {
        self.instances.push(instance);
    }

    pub fn remove(&mut self, id: &str) -> Option<WidgetInstance> {
        let index = self.instances.iter().position(|i| i.id == id)?;
        Some(self.instances.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<&WidgetInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut WidgetInstance> {
        self.instances.iter_mut().find(|i| i.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WidgetInstance> {
        self.instances.iter()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_store::MemoryStore;
    use serde_json::json;

    fn registry() -> WidgetRegistry {
        WidgetRegistry::with_builtins().unwrap()
    }

    #[test]
    fn test_missing_key_loads_empty() {
        let store = MemoryStore::new();
        let (instances, repaired) =
            WidgetInstanceStore::load(&store, "widgets", &registry(), "Home").unwrap();
        assert_eq!(instances.len(), 0);
        assert!(!repaired);
    }

    #[test]
    fn test_load_repairs_ids_and_skips_garbage() {
        let store = MemoryStore::new();
        let blob = json!([
            {"id": "widget-1", "type": "timer", "title": "Focus", "config": {}},
            42,
            {"type": "tracker", "config": {"label": "Steps"}},
            {"id": "widget-1", "type": "tracker", "title": "Clash"},
            {"id": "widget-7", "type": "weather", "config": {"city": "Oslo"}},
        ]);
        store.set("widgets", &blob.to_string()).unwrap();

        let (instances, repaired) =
            WidgetInstanceStore::load(&store, "widgets", &registry(), "Home").unwrap();
        assert!(repaired);
        let ids: Vec<_> = instances.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["widget-1", "widget-8", "widget-9", "widget-7"]);
        assert!(instances.get("widget-7").unwrap().is_placeholder());
        assert_eq!(instances.get("widget-8").unwrap().config["label"], "Steps");
    }

    #[test]
    fn test_save_round_trips_placeholders() {
        let store = MemoryStore::new();
        let blob = json!([{"id": "widget-3", "type": "weather", "title": "W", "config": {"city": "Oslo"}}]);
        store.set("widgets", &blob.to_string()).unwrap();

        let (instances, _) = WidgetInstanceStore::load(&store, "widgets", &registry(), "Home").unwrap();
        instances.save(&store).unwrap();

        let saved: Value = serde_json::from_str(&store.get("widgets").unwrap().unwrap()).unwrap();
        assert_eq!(saved, blob);
        assert_eq!(instances.next_id(), "widget-4");
    }

    #[test]
    fn test_unreadable_list_starts_empty() {
        let store = MemoryStore::new();
        store.set("widgets", "{not json").unwrap();
        let (instances, repaired) =
            WidgetInstanceStore::load(&store, "widgets", &registry(), "Home").unwrap();
        assert_eq!(instances.len(), 0);
        assert!(repaired);
    }
}
