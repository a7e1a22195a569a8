// Per-widget periodic refresh tasks
use crate::application::backend_api::{BackendApi, BackendError};
use crate::domain::widgets::{RefreshPlan, RefreshSource};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Latest payload fetched for a widget.
#[derive(Debug, Clone, Serialize)]
pub struct WidgetData {
    pub value: Value,
    pub fetched_at: DateTime<Utc>,
}

/// Latest data per widget. Each widget's slot carries an epoch; a write
/// is accepted only under the slot's current epoch, so results from a
/// stopped task or a removed widget never land in the cache.
#[derive(Debug, Clone, Default)]
pub struct WidgetDataCache {
    inner: Arc<Mutex<CacheState>>,
}

#[derive(Debug, Default)]
struct CacheState {
    slots: HashMap<String, Slot>,
    next_epoch: u64,
}

#[derive(Debug)]
struct Slot {
    epoch: u64,
    data: Option<WidgetData>,
}

impl CacheState {
    fn open_slot(&mut self, widget_id: &str) -> u64 {
        self.next_epoch += 1;
        let slot = Slot {
            epoch: self.next_epoch,
            data: None,
        };
        self.slots.insert(widget_id.to_string(), slot);
        self.next_epoch
    }
}

impl WidgetDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, widget_id: &str) -> Option<WidgetData> {
        self.lock().slots.get(widget_id).and_then(|s| s.data.clone())
    }

    /// Current epoch for the widget, opening an empty slot if it has none.
    pub fn epoch(&self, widget_id: &str) -> u64 {
        let mut state = self.lock();
        match state.slots.get(widget_id) {
            Some(slot) => slot.epoch,
            None => state.open_slot(widget_id),
        }
    }

    /// Drops the widget's data and starts a new epoch; writes made under
    /// any earlier epoch are ignored from now on.
    pub fn reset(&self, widget_id: &str) -> u64 {
        self.lock().open_slot(widget_id)
    }

    /// Stores `value` if `epoch` is still current. Returns whether it was kept.
    pub fn insert(&self, widget_id: &str, epoch: u64, value: Value) -> bool {
        let mut state = self.lock();
        match state.slots.get_mut(widget_id) {
            Some(slot) if slot.epoch == epoch => {
                slot.data = Some(WidgetData {
                    value,
                    fetched_at: Utc::now(),
                });
                true
            }
            _ => {
                tracing::debug!("Discarding stale data for widget {}", widget_id);
                false
            }
        }
    }

    pub fn remove(&self, widget_id: &str) {
        self.lock().slots.remove(widget_id);
    }
}

/// Owns a running refresh task. Dropping the handle stops the task.
#[derive(Debug)]
pub struct RefreshHandle {
    widget_id: String,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    pub fn widget_id(&self) -> &str {
        &self.widget_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Refresh handles keyed by widget id.
#[derive(Debug, Default)]
pub struct RefreshTasks {
    handles: HashMap<String, RefreshHandle>,
}

impl RefreshTasks {
    /// Tracks `handle`, stopping any task already running for the widget.
    /// Tasks that have died are pruned.
    pub fn insert(&mut self, handle: RefreshHandle) {
        self.handles.retain(|id, h| {
            let alive = !h.is_finished();
            if !alive {
                tracing::warn!("Refresh task for {} exited unexpectedly", id);
            }
            alive
        });
        if let Some(previous) = self.handles.insert(handle.widget_id.clone(), handle) {
            tracing::debug!("Replacing refresh task for {}", previous.widget_id);
        }
    }

    pub fn cancel(&mut self, widget_id: &str) -> bool {
        self.handles.remove(widget_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }
}

async fn fetch(backend: &dyn BackendApi, source: &RefreshSource) -> Result<Value, BackendError> {
    match source {
        RefreshSource::Entity { entity_id } => backend.get_entity(entity_id).await,
        RefreshSource::Feed { url } => backend.fetch_feed(url).await,
    }
}

/// Starts polling `plan.source` every `plan.interval`, writing results into
/// `cache` under `epoch`. A failed tick is logged and retried on the next one.
pub fn spawn_refresh(
    widget_id: String,
    epoch: u64,
    plan: RefreshPlan,
    backend: Arc<dyn BackendApi>,
    cache: WidgetDataCache,
) -> RefreshHandle {
    let id = widget_id.clone();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(plan.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match fetch(backend.as_ref(), &plan.source).await {
                Ok(value) => {
                    cache.insert(&id, epoch, value);
                }
                Err(e) => {
                    tracing::warn!("Refresh for widget {} failed, retrying next tick: {}", id, e);
                }
            }
        }
    });
    tracing::debug!("Started refresh for {} every {:?}", widget_id, plan.interval);
    RefreshHandle { widget_id, task }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::application::backend_api::{EntityAction, ResolvedExpression};
    use crate::domain::time_series::TimeSeriesEntry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend double: counts calls and fails every other `get_entity` when
    /// `flaky` is set.
    #[derive(Default)]
    pub struct FakeBackend {
        pub calls: AtomicUsize,
        pub flaky: bool,
        pub entries: Mutex<Vec<TimeSeriesEntry>>,
        pub actions: Mutex<Vec<(String, EntityAction)>>,
    }

    #[async_trait]
    impl BackendApi for FakeBackend {
        async fn list_entities(
            &self,
            entity_type: &str,
            _category: Option<&str>,
        ) -> Result<Vec<Value>, BackendError> {
            Ok(vec![json!({"id": "e-1", "entity_type": entity_type})])
        }

        async fn get_entity(&self, entity_id: &str) -> Result<Value, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.flaky && n % 2 == 0 {
                return Err(BackendError::Transport("connection reset".to_string()));
            }
            Ok(json!({"id": entity_id, "tick": n}))
        }

        async fn create_entity(
            &self,
            entity_type: &str,
            name: &str,
            _category: Option<&str>,
        ) -> Result<Value, BackendError> {
            Ok(json!({"id": format!("{}-new", entity_type), "name": name}))
        }

        async fn update_attribute(
            &self,
            entity_id: &str,
            attribute: &str,
            value: Value,
        ) -> Result<Value, BackendError> {
            Ok(json!({"id": entity_id, attribute: value}))
        }

        async fn entity_action(
            &self,
            entity_id: &str,
            action: EntityAction,
        ) -> Result<Value, BackendError> {
            if entity_id == "broken" {
                return Err(BackendError::Status {
                    status: 409,
                    message: "Timer already running".to_string(),
                });
            }
            self.actions
                .lock()
                .unwrap()
                .push((entity_id.to_string(), action));
            Ok(json!({"id": entity_id, "action": action.path_segment()}))
        }

        async fn list_entries(&self, _entity_id: &str) -> Result<Vec<TimeSeriesEntry>, BackendError> {
            Ok(self.entries.lock().unwrap().clone())
        }

        async fn resolve(
            &self,
            expression: &str,
            anchor_labels: &[String],
        ) -> Result<ResolvedExpression, BackendError> {
            Ok(ResolvedExpression {
                resolved_date: expression.to_string(),
                anchors: anchor_labels
                    .iter()
                    .map(|a| (a.clone(), format!("{} formatted", a)))
                    .collect(),
            })
        }

        async fn fetch_feed(&self, url: &str) -> Result<Value, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"url": url}))
        }
    }
}
