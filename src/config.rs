use crate::geocode::DEFAULT_OPENCAGE_URL;
use crate::hierarchy::{default_probes, ClassifierRules, ImportOptions};
use log::warn;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://areas.db?mode=rwc";
pub const LOG_DIR_VAR: &str = "AREAMAP_LOG_DIR";

/// Runtime settings. Read once in the binary and handed to services;
/// nothing below the binary looks at the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub source_path: PathBuf,
    pub import_workers: usize,
    pub expected_prefectures: usize,
    pub expected_total_min: u64,
    pub expected_total_max: u64,
    pub capital_prefecture: String,
    pub opencage_api_key: Option<String>,
    pub opencage_base_url: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            source_path: PathBuf::from("./data"),
            import_workers: 4,
            expected_prefectures: 47,
            expected_total_min: 1800,
            expected_total_max: 1950,
            capital_prefecture: "東京都".to_string(),
            opencage_api_key: None,
            opencage_base_url: DEFAULT_OPENCAGE_URL.to_string(),
            log_dir: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 日志目录需在其余配置之前读取，否则解析告警没有去处
    pub fn log_dir_from_env() -> Option<PathBuf> {
        log_dir_from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Blank values count as unset;
    /// unparsable numbers fall back to the default with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let d = Self::default();

        Self {
            database_url: get("DATABASE_URL").unwrap_or(d.database_url),
            source_path: get("AREA_SOURCE_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.source_path),
            import_workers: parse_or("AREA_IMPORT_WORKERS", get("AREA_IMPORT_WORKERS"), d.import_workers)
                .max(1),
            expected_prefectures: parse_or(
                "AREA_EXPECTED_PREFECTURES",
                get("AREA_EXPECTED_PREFECTURES"),
                d.expected_prefectures,
            ),
            expected_total_min: parse_or(
                "AREA_EXPECTED_TOTAL_MIN",
                get("AREA_EXPECTED_TOTAL_MIN"),
                d.expected_total_min,
            ),
            expected_total_max: parse_or(
                "AREA_EXPECTED_TOTAL_MAX",
                get("AREA_EXPECTED_TOTAL_MAX"),
                d.expected_total_max,
            ),
            capital_prefecture: get("AREA_CAPITAL_PREFECTURE").unwrap_or(d.capital_prefecture),
            opencage_api_key: get("OPENCAGE_API_KEY"),
            opencage_base_url: get("OPENCAGE_BASE_URL").unwrap_or(d.opencage_base_url),
            log_dir: log_dir_from_lookup(&lookup),
        }
    }

    pub fn import_options(&self, source_root: Option<PathBuf>, clear: bool) -> ImportOptions {
        ImportOptions {
            source_root: source_root.unwrap_or_else(|| self.source_path.clone()),
            clear,
            workers: self.import_workers,
            expected_prefectures: self.expected_prefectures,
            expected_total: self.expected_total_min..=self.expected_total_max,
            rules: ClassifierRules::new(self.capital_prefecture.clone()),
            probes: default_probes(),
        }
    }
}

fn log_dir_from_lookup<F>(lookup: F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(LOG_DIR_VAR)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_or<T: FromStr + Copy>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(v) => v.parse().unwrap_or_else(|_| {
            warn!("{key}={v} is not valid, using default");
            default
        }),
        None => default,
    }
}
