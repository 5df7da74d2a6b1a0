use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub max_lifetime: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Whether the matching engine accepts work at boot
    #[serde(default = "default_matching_enabled")]
    pub matching_enabled: bool,
    /// Interval of the background breaker check / match trigger loop
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            matching_enabled: default_matching_enabled(),
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

fn default_matching_enabled() -> bool {
    true
}
fn default_tick_interval_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub database: Database,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(true));

        if let Ok(database_url) = std::env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", database_url)?;
        }

        let s = builder.build()?;
        s.try_deserialize()
    }
}
