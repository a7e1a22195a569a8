use crate::domain::layout::GridSettings;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub dashboard: DashboardSettings,
    pub storage: StorageSettings,
    pub backend: BackendSettings,
    pub grid: GridSettings,
    pub persistence: PersistenceSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: SocketAddr,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardSettings {
    pub title: String,
    /// Prefix for every persisted key, so several dashboards can share a store.
    pub namespace: String,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            title: "Home".to_string(),
            namespace: "home".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    File,
    /// Nothing survives a restart.
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageSettings {
    pub kind: StorageKind,
    pub dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            kind: StorageKind::File,
            dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BackendSettings {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            token: None,
            timeout_secs: 10,
        }
    }
}

impl BackendSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PersistenceSettings {
    pub save_debounce_ms: u64,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            save_debounce_ms: 500,
        }
    }
}

impl PersistenceSettings {
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}

/// Reads `config/dashboard.toml` (optional) with `DASHBOARD__SECTION__KEY`
/// environment overrides on top.
pub fn load_app_config() -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/dashboard").required(false))
        .add_source(config::Environment::with_prefix("DASHBOARD").separator("__"))
        .build()?;

    let mut app: AppConfig = settings.try_deserialize()?;
    app.grid = app.grid.normalized();
    Ok(app)
}
