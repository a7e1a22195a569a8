// Layout persistence - owner of the `layout` key
use crate::application::key_value_store::{KeyValueStore, StoreError};
use crate::domain::layout::{GridLayout, Rect};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLayout {
    pub columns: u32,
    pub items: Vec<Rect>,
}

#[derive(Debug, Clone)]
pub struct LayoutPersistence {
    key: String,
}

impl LayoutPersistence {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Reads the stored layout. Items that do not decode as rectangles are
    /// dropped individually; an unreadable blob is discarded and yields `None`.
    pub fn load(&self, store: &dyn KeyValueStore) -> Result<Option<StoredLayout>, StoreError> {
        let Some(raw) = store.get(&self.key)? else {
            return Ok(None);
        };

        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Stored layout under '{}' is unreadable, discarding: {}", self.key, e);
                store.remove(&self.key)?;
                return Ok(None);
            }
        };

        let columns = value
            .get("columns")
            .and_then(Value::as_u64)
            .and_then(|c| u32::try_from(c).ok())
            .unwrap_or(0);
        let items = value
            .get("items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match serde_json::from_value::<Rect>(item.clone()) {
                        Ok(rect) => Some(rect),
                        Err(e) => {
                            tracing::debug!("Dropping stored layout item: {}", e);
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(StoredLayout { columns, items }))
    }

    pub fn save(&self, store: &dyn KeyValueStore, layout: &GridLayout) -> Result<(), StoreError> {
        let stored = StoredLayout {
            columns: layout.columns(),
            items: layout.rects().to_vec(),
        };
        let encoded = serde_json::to_string(&stored).map_err(|source| StoreError::Encode {
            key: self.key.clone(),
            source,
        })?;
        store.set(&self.key, &encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::layout::GridSettings;
    use crate::domain::widget::LayoutSize;
    use crate::infrastructure::memory_store::MemoryStore;

    #[test]
    fn test_save_then_restore_is_verbatim() {
        let store = MemoryStore::new();
        let persistence = LayoutPersistence::new("layout");

        let mut layout = GridLayout::new(GridSettings::default());
        layout.place("widget-1", LayoutSize::new(4, 2)).unwrap();
        layout.place("widget-2", LayoutSize::new(3, 3)).unwrap();
        layout.move_rect("widget-2", 20, 5).unwrap();
        persistence.save(&store, &layout).unwrap();

        let stored = persistence.load(&store).unwrap().unwrap();
        let (restored, rejected) =
            GridLayout::restore(GridSettings::default(), stored.columns, stored.items);
        assert!(rejected.is_empty());
        assert_eq!(restored.rects(), layout.rects());
        assert_eq!(restored.columns(), layout.columns());
    }

    #[test]
    fn test_bad_items_are_dropped_individually() {
        let store = MemoryStore::new();
        store
            .set(
                "layout",
                r#"{"columns": 14, "items": [{"id": "a", "x": 0, "y": 0, "w": 2, "h": 2}, {"id": "b", "x": -1}]}"#,
            )
            .unwrap();
        let stored = LayoutPersistence::new("layout").load(&store).unwrap().unwrap();
        assert_eq!(stored.columns, 14);
        assert_eq!(stored.items, vec![Rect::new("a", 0, 0, 2, 2)]);
    }

    #[test]
    fn test_missing_or_unreadable_layout() {
        let store = MemoryStore::new();
        let persistence = LayoutPersistence::new("layout");
        assert_eq!(persistence.load(&store).unwrap(), None);

        store.set("layout", "][").unwrap();
        assert_eq!(persistence.load(&store).unwrap(), None);
        assert_eq!(store.get("layout").unwrap(), None);
    }
}
