pub mod analyze;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod presets;
pub mod profiles;
pub mod prompt;
pub mod report;
pub mod server;
pub mod telemetry;

/**
 * \brief Common SDK types, re-exported for the CLI and embedders.
 */
pub mod prelude {
    pub use crate::analyze::{AnalyzeOptions, Analyzer, AnalyzerConfig, RetryPolicy, StatusCallback};
    pub use crate::config::{Core, CoreConfig};
    pub use crate::db::{KeyValueStore, MemoryStore, ProfileStore, SqliteStore};
    pub use crate::error::LlmError;
    pub use crate::models::{Profile, ProfileInput};
    pub use crate::presets::{Preset, PresetCatalog, ProviderId};
    pub use crate::profiles::ProfileManager;
    pub use crate::report::StartupReport;
    pub use crate::{server, telemetry};
}
