//! `reagent config`: configuration management commands.

use clap::Subcommand;
use reagent_config::AppConfig;

#[derive(Subcommand, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the default configuration as TOML
    #[default]
    Default,
    /// Print the effective configuration (API key redacted)
    Show,
    /// Print the config file path
    Path,
    /// Load the configuration and report problems
    Validate,
}

pub async fn run(action: ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Default => print!("{}", AppConfig::default_toml()),
        ConfigAction::Show => show()?,
        ConfigAction::Path => println!("{}", config_path().display()),
        ConfigAction::Validate => validate()?,
    }
    Ok(())
}

fn config_path() -> std::path::PathBuf {
    AppConfig::config_dir().join("config.toml")
}

fn redacted(config: &AppConfig) -> AppConfig {
    let mut config = config.clone();
    if config.api_key.is_some() {
        config.api_key = Some("[REDACTED]".into());
    }
    config
}

fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    println!("{}", toml::to_string_pretty(&redacted(&config))?);
    Ok(())
}

fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");
            if !config.has_api_key() {
                println!("   ⚠️  No API key set (REAGENT_API_KEY or OPENAI_API_KEY); only local endpoints will work");
            }
            println!();
            println!("   Endpoint:        {}", config.base_url);
            println!("   Model:           {}", config.default_model);
            println!("   Max iterations:  {}", config.engine.max_iterations);
            println!("   Worker pool:     {}", config.engine.worker_pool_size);
            println!("   Database:        {}", config.storage.database);
            Ok(())
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            Err(e.into())
        }
    }
}
