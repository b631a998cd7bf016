pub mod config_cmd;
pub mod decide;
pub mod run;
pub mod stop;

use reagent_config::AppConfig;
use reagent_store::SqliteStore;
use std::path::Path;

/// Open the coordination database named in `config`, creating its directory.
pub async fn open_store(config: &AppConfig) -> Result<SqliteStore, Box<dyn std::error::Error>> {
    let database = &config.storage.database;
    if !database.starts_with("sqlite:")
        && let Some(parent) = Path::new(database).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteStore::new(database)
        .await
        .map_err(|e| format!("Failed to open {database}: {e}"))?;
    Ok(store)
}

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}
