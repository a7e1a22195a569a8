// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, patch, post, put},
};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::dashboard_controller::{DashboardController, DashboardKeys};
use crate::application::dashboard_service::DashboardService;
use crate::application::key_value_store::KeyValueStore;
use crate::application::registry::WidgetRegistry;
use crate::infrastructure::backend_client::HttpBackend;
use crate::infrastructure::config::{StorageKind, load_app_config};
use crate::infrastructure::file_store::FileStore;
use crate::infrastructure::memory_store::MemoryStore;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    add_widget, entity_action, get_dashboard, health_check, link_entity, list_entities,
    list_widget_types, move_widget, remove_widget, reset_layout, resize_widget,
    resolve_expression, update_entity_attribute, update_widget, widget_data, widget_series,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let app_config = load_app_config().context("Failed to load configuration")?;

    // Infrastructure
    let store: Arc<dyn KeyValueStore> = match app_config.storage.kind {
        StorageKind::File => Arc::new(
            FileStore::open(app_config.storage.dir.clone())
                .context("Failed to open dashboard storage")?,
        ),
        StorageKind::Memory => {
            tracing::warn!("Using in-memory storage; the dashboard will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };
    let backend = Arc::new(
        HttpBackend::new(
            app_config.backend.base_url.clone(),
            app_config.backend.token.clone(),
            app_config.backend.timeout(),
        )
        .context("Failed to build backend client")?,
    );

    // A bad built-in definition is a programming error; refuse to start.
    let registry = Arc::new(WidgetRegistry::with_builtins().context("Invalid widget registry")?);

    let controller = DashboardController::restore(
        app_config.dashboard.title.clone(),
        registry,
        store,
        DashboardKeys::namespaced(&app_config.dashboard.namespace),
        app_config.grid,
    )
    .context("Failed to restore dashboard")?;

    let dashboard_service =
        DashboardService::new(controller, backend, app_config.persistence.save_debounce());
    let refreshing = dashboard_service.start_refreshes().await;
    tracing::info!("Started {} widget refresh tasks", refreshing);

    let state = Arc::new(AppState {
        dashboard_service: dashboard_service.clone(),
    });

    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/dashboard", get(get_dashboard))
        .route("/widget-types", get(list_widget_types))
        .route("/widgets", post(add_widget))
        .route("/widgets/:id", patch(update_widget).delete(remove_widget))
        .route("/widgets/:id/position", put(move_widget))
        .route("/widgets/:id/size", put(resize_widget))
        .route("/widgets/:id/data", get(widget_data))
        .route("/widgets/:id/series", get(widget_series))
        .route("/widgets/:id/actions/:action", post(entity_action))
        .route("/widgets/:id/entity", post(link_entity))
        .route("/widgets/:id/entity/attributes", patch(update_entity_attribute))
        .route("/layout/reset", post(reset_layout))
        .route("/entities", get(list_entities))
        .route("/resolve", post(resolve_expression))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = app_config.server.bind_addr;
    tracing::info!("Starting widget-dashboard service on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if dashboard_service.flush().await? {
        tracing::info!("Wrote pending layout changes");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
