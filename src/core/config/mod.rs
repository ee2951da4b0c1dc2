use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::calendar::clock::{
    ClockSettings, EXACT_MODE_MAX_MINUTES, FAST_PATH_MINUTES_PER_DAY, MAX_CALENDAR_DAYS_EXAMINED,
};

pub const CONFIG_FILE: &str = "helpdesk-sla.toml";
pub const ENV_PREFIX: &str = "SLA_";

/// Calendar used when a template has none of its own.
pub const DEFAULT_CALENDAR_NAME: &str = "Comercial Brasil";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub engine: EngineSettings,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub exact_mode_max_minutes: i64,
    pub max_days_examined: u32,
    pub fast_path_minutes_per_day: i64,
    pub default_calendar_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            exact_mode_max_minutes: EXACT_MODE_MAX_MINUTES,
            max_days_examined: MAX_CALENDAR_DAYS_EXAMINED,
            fast_path_minutes_per_day: FAST_PATH_MINUTES_PER_DAY,
            default_calendar_name: DEFAULT_CALENDAR_NAME.to_string(),
        }
    }
}

impl EngineSettings {
    pub fn clock_settings(&self) -> ClockSettings {
        ClockSettings {
            exact_mode_max_minutes: self.exact_mode_max_minutes,
            max_days_examined: self.max_days_examined,
            fast_path_minutes_per_day: self.fast_path_minutes_per_day,
        }
    }
}

impl AppConfig {
    /// Defaults, then `helpdesk-sla.toml` in the working directory, then
    /// `SLA_`-prefixed environment variables (`SLA_SERVER__PORT=9000`).
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
