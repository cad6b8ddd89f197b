use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How many pages on each side of the current one to fetch ahead of time
    /// and to protect from eviction.
    pub n_preload: usize,
    pub embedded_orientation: bool,
    pub double_page: bool,
    pub http_referer: Option<String>,
    pub http_timeout_secs: u64,
    pub trim_interval_secs: u64,
    pub preload_keep_at_least_secs: u64,
    pub fetch_wait_timeout_ms: u64,
    /// Reopen local archives at the page they were closed on.
    pub remember_position: bool,
    pub remember_position_http: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            n_preload: 2,
            embedded_orientation: true,
            double_page: false,
            http_referer: None,
            http_timeout_secs: 10,
            trim_interval_secs: 3 * 60,
            preload_keep_at_least_secs: 7 * 60,
            fetch_wait_timeout_ms: 5000,
            remember_position: false,
            remember_position_http: false,
        }
    }
}

fn get_config_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("comic-tui");

    fs::create_dir_all(&config_dir).ok();
    config_dir.join("config.json")
}

impl Config {
    pub fn load() -> Self {
        let path = get_config_path();
        if !path.exists() {
            let config = Config::default();
            config.save();
            return config;
        }

        match fs::read_to_string(&path).map(|content| serde_json::from_str(&content)) {
            Ok(Ok(config)) => config,
            Ok(Err(e)) => {
                log::warn!("Ignoring malformed config {}: {}", path.display(), e);
                Config::default()
            }
            Err(e) => {
                log::warn!("Couldn't read config {}: {}", path.display(), e);
                Config::default()
            }
        }
    }

    pub fn save(&self) {
        let path = get_config_path();
        match serde_json::to_string_pretty(self) {
            Ok(content) => {
                if let Err(e) = fs::write(&path, content) {
                    log::warn!("Couldn't write config {}: {}", path.display(), e);
                }
            }
            Err(e) => log::warn!("Couldn't serialize config: {}", e),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn trim_interval(&self) -> Duration {
        Duration::from_secs(self.trim_interval_secs.max(1))
    }

    pub fn preload_keep_at_least(&self) -> Duration {
        Duration::from_secs(self.preload_keep_at_least_secs)
    }

    pub fn fetch_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_wait_timeout_ms)
    }
}
