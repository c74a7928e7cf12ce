use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use getset::Getters;
use log::LevelFilter;
use serde::Deserialize;
use serde_inline_default::serde_inline_default;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const CONFIG_PATH_VAR: &str = "LCT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[serde_inline_default]
#[derive(Debug, Clone, Deserialize, Getters)]
#[get = "pub"]
pub struct TranslatorConfig {
    #[serde_inline_default("http://127.0.0.1:5000/translate".to_string())]
    endpoint: String,
    #[serde(default)]
    api_key: Option<String>,
    #[serde_inline_default("upstream".to_string())]
    engine: String,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:5000/translate".to_string(),
            api_key: None,
            engine: "upstream".to_string(),
        }
    }
}

#[serde_inline_default]
#[derive(Debug, Clone, Deserialize, Getters)]
#[get = "pub"]
pub struct Config {
    #[serde_inline_default(IpAddr::V4(Ipv4Addr::LOCALHOST))]
    address: IpAddr,
    #[serde_inline_default(8000)]
    port: u16,
    /// JSON document holding settings and the cache snapshot
    #[serde_inline_default(PathBuf::from("livechat-store.json"))]
    store_path: PathBuf,
    #[serde(default)]
    translator: TranslatorConfig,
    #[serde_inline_default(1800)]
    snapshot_interval_secs: u64,
    #[serde_inline_default("info".to_string())]
    log_level: String,
}

impl Config {
    /// Read the file named by `LCT_CONFIG` (or `config.yaml`), overridden by
    /// `LCT_`-prefixed environment variables. Nested keys use `__`, e.g.
    /// `LCT_TRANSLATOR__API_KEY`.
    pub fn load() -> Result<Self, figment::Error> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::figment(Path::new(&path)).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("LCT_").split("__"))
    }

    pub fn level_filter(&self) -> LevelFilter {
        LevelFilter::from_str(&self.log_level).unwrap_or(LevelFilter::Info)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs.max(1))
    }
}
