use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use crate::analyze::{Analyzer, AnalyzerConfig};
use crate::db::{ProfileStore, SqliteStore};
use crate::presets::PresetCatalog;
use crate::profiles::ProfileManager;
use crate::telemetry;

const DB_ENV: &str = "STARTUPLENS_DB";
const DEFAULT_KEY_ENV: &str = "STARTUPLENS_DEFAULT_API_KEY";
const UI_DIR_ENV: &str = "STARTUPLENS_UI_DIR";

/**
 * \brief Construction-time settings for the SDK.
 * \details The default-profile credential is injected here instead of being compiled in;
 *          leaving it empty means the default profile starts without a key.
 */
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub db_path: PathBuf,
    pub default_api_key: String,
    pub ui_dir: PathBuf,
    pub catalog: PresetCatalog,
    pub analyzer: AnalyzerConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("startuplens.db"),
            default_api_key: String::new(),
            ui_dir: PathBuf::from("web"),
            catalog: PresetCatalog::builtin(),
            analyzer: AnalyzerConfig::default(),
        }
    }
}

impl CoreConfig {
    /**
     * \brief Defaults overridden by `STARTUPLENS_*` environment variables.
     */
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(path) = env_non_empty(DB_ENV) {
            config.db_path = PathBuf::from(path);
        }
        if let Some(key) = env_non_empty(DEFAULT_KEY_ENV) {
            config.default_api_key = key;
        }
        if let Some(dir) = env_non_empty(UI_DIR_ENV) {
            config.ui_dir = PathBuf::from(dir);
        }
        config
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/**
 * \brief Fully wired SDK services sharing one store.
 */
#[derive(Clone)]
pub struct Core {
    pub store: ProfileStore,
    pub manager: Arc<ProfileManager>,
    pub analyzer: Analyzer,
    pub config: CoreConfig,
}

impl Core {
    /**
     * \brief Open the SQLite store, restore the telemetry switch and build the services.
     */
    pub fn open(config: CoreConfig) -> Result<Self> {
        let store = ProfileStore::new(Arc::new(SqliteStore::open(&config.db_path)?));
        Ok(Self::with_store(store, config))
    }

    pub fn with_store(store: ProfileStore, config: CoreConfig) -> Self {
        telemetry::set_enabled(store.get_telemetry_enabled().unwrap_or(false));
        let manager = Arc::new(ProfileManager::new(
            store.clone(),
            config.catalog.clone(),
            config.default_api_key.clone(),
        ));
        let analyzer = Analyzer::new(manager.clone(), config.analyzer);
        Self {
            store,
            manager,
            analyzer,
            config,
        }
    }
}
