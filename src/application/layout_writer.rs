// Debounced layout writer - coalesces bursts of move/resize into one write
use crate::application::dashboard_controller::DashboardController;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct LayoutWriter {
    tx: mpsc::UnboundedSender<()>,
}

impl LayoutWriter {
    /// Spawns the writer. After a notification it waits until `debounce` has
    /// passed without another one, then flushes the controller's layout.
    pub fn spawn(
        controller: Arc<Mutex<DashboardController>>,
        debounce: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                loop {
                    match tokio::time::timeout(debounce, rx.recv()).await {
                        Ok(Some(())) => continue,
                        Ok(None) | Err(_) => break,
                    }
                }
                match controller.lock().await.flush_layout() {
                    Ok(true) => tracing::debug!("Layout persisted"),
                    Ok(false) => {}
                    Err(e) => tracing::error!("Failed to persist layout: {}", e),
                }
            }
        });
        (Self { tx }, task)
    }

    pub fn notify(&self) {
        if self.tx.send(()).is_err() {
            tracing::warn!("Layout writer has stopped; change will be written on next flush");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dashboard_controller::DashboardKeys;
    use crate::application::key_value_store::KeyValueStore;
    use crate::application::registry::WidgetRegistry;
    use crate::domain::layout::GridSettings;
    use crate::infrastructure::memory_store::MemoryStore;

    #[tokio::test]
    async fn test_burst_of_moves_is_written_once() {
        let store = Arc::new(MemoryStore::new());
        let mut controller = DashboardController::restore(
            "Home",
            Arc::new(WidgetRegistry::with_builtins().unwrap()),
            store.clone(),
            DashboardKeys::namespaced("home"),
            GridSettings::default(),
        )
        .unwrap();
        controller.add_widget("timer").unwrap();
        let controller = Arc::new(Mutex::new(controller));
        let (writer, _task) = LayoutWriter::spawn(controller.clone(), Duration::from_millis(40));
        let baseline = store.writes("home.layout");

        for x in 1..=5 {
            controller.lock().await.move_widget("widget-1", x, 0).unwrap();
            writer.notify();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(store.writes("home.layout"), baseline + 1);
        let saved = store.get("home.layout").unwrap().unwrap();
        assert!(saved.contains(r#""x":5"#));
    }
}
