use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::message_list::PAGE_SIZE;

pub const CONFIG_FILE_NAME: &str = "msgwin_config.json";

const DEFAULT_EVICTION_SCREENS: f64 = 4.0;
const DEFAULT_MAX_LOAD_ROUNDS: usize = 32;
pub const MAX_PAGE_SIZE: usize = 1_000;

/// Tuning knobs read from `<data_dir>/msgwin_config.json`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
    /// Content height, in viewport heights, kept when evicting pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_screens: Option<f64>,
    /// Upper bound on page loads a single coordination step may chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_load_rounds: Option<usize>,
    /// Tolerance, in px, when deciding whether the list sits at its top edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub near_edge_px: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

impl AppConfig {
    pub fn page_size(&self) -> usize {
        self.page_size.unwrap_or(PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn eviction_screens(&self) -> f64 {
        let screens = self.eviction_screens.unwrap_or(DEFAULT_EVICTION_SCREENS);
        if screens.is_finite() {
            screens.max(1.0)
        } else {
            DEFAULT_EVICTION_SCREENS
        }
    }

    pub fn max_load_rounds(&self) -> usize {
        self.max_load_rounds.unwrap_or(DEFAULT_MAX_LOAD_ROUNDS).max(1)
    }

    pub fn near_edge_px(&self) -> f64 {
        self.near_edge_px
            .filter(|px| px.is_finite())
            .unwrap_or(0.0)
            .max(0.0)
    }

    /// Apply `MSGWIN_PAGE_SIZE` / `MSGWIN_EVICTION_SCREENS` from `lookup`. Unparsable
    /// values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup("MSGWIN_PAGE_SIZE") {
            match raw.trim().parse() {
                Ok(v) => self.page_size = Some(v),
                Err(e) => tracing::warn!(%e, value = %raw, "ignoring MSGWIN_PAGE_SIZE"),
            }
        }
        if let Some(raw) = lookup("MSGWIN_EVICTION_SCREENS") {
            match raw.trim().parse() {
                Ok(v) => self.eviction_screens = Some(v),
                Err(e) => tracing::warn!(%e, value = %raw, "ignoring MSGWIN_EVICTION_SCREENS"),
            }
        }
    }
}

/// Read the config file (defaults when missing or malformed), then apply env overrides.
pub fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE_NAME);
    let mut config = match std::fs::read_to_string(&path) {
        Ok(raw) => match serde_json::from_str::<AppConfig>(&raw) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(%e, path = %path.display(), "malformed config, using defaults");
                AppConfig::default()
            }
        },
        Err(_) => AppConfig::default(),
    };
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config
}

pub fn default_app_config_json() -> String {
    let config = AppConfig {
        page_size: Some(PAGE_SIZE),
        eviction_screens: Some(DEFAULT_EVICTION_SCREENS),
        max_load_rounds: Some(DEFAULT_MAX_LOAD_ROUNDS),
        near_edge_px: Some(0.0),
        log_filter: None,
    };
    serde_json::to_string_pretty(&config).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir, json: &str) {
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), json).expect("write config");
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_app_config(dir.path().to_str().expect("utf8 path"));
        assert_eq!(cfg.max_load_rounds(), 32);
        assert_eq!(cfg.near_edge_px(), 0.0);
        assert!(cfg.log_filter.is_none());

        let mut plain = AppConfig::default();
        plain.apply_env_overrides(|_| None);
        assert_eq!(plain.page_size(), PAGE_SIZE);
        assert_eq!(plain.eviction_screens(), 4.0);
    }

    #[test]
    fn file_values_are_read_and_clamped() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_config(
            &dir,
            r#"{"page_size": 0, "eviction_screens": 0.25, "max_load_rounds": 3, "log_filter": "debug"}"#,
        );
        let data_dir = dir.path().to_str().expect("utf8 path");
        let cfg = load_app_config(data_dir);
        assert_eq!(cfg.page_size(), 1);
        assert_eq!(cfg.eviction_screens(), 1.0);
        assert_eq!(cfg.max_load_rounds(), 3);
        assert_eq!(cfg.log_filter.as_deref(), Some("debug"));

        write_config(&dir, &format!(r#"{{"page_size": {}}}"#, usize::MAX));
        let cfg = load_app_config(data_dir);
        assert_eq!(cfg.page_size, Some(usize::MAX));
        assert_eq!(cfg.page_size(), MAX_PAGE_SIZE);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_config(&dir, "{ not json");
        let data_dir = dir.path().to_str().expect("utf8 path");
        let cfg = load_app_config(data_dir);
        assert_eq!(cfg.max_load_rounds(), 32);
    }

    #[test]
    fn env_overrides_win_over_file() {
        let mut cfg = AppConfig {
            page_size: Some(50),
            ..AppConfig::default()
        };
        cfg.apply_env_overrides(|key| match key {
            "MSGWIN_PAGE_SIZE" => Some("7".to_string()),
            "MSGWIN_EVICTION_SCREENS" => Some("lots".to_string()),
            _ => None,
        });
        assert_eq!(cfg.page_size(), 7);
        assert_eq!(cfg.eviction_screens(), 4.0);
    }

    #[test]
    fn default_json_round_trips() {
        let cfg: AppConfig = serde_json::from_str(&default_app_config_json()).expect("parse");
        assert_eq!(cfg.page_size(), PAGE_SIZE);
        assert_eq!(cfg.max_load_rounds, Some(32));
    }
}
