use std::path::Path;

use serde::Deserialize;

const CONFIG_FILE: &str = "yeet_config.json";
const API_URL_ENV: &str = "YEET_API_URL";
pub(crate) const DEFAULT_API_BASE_URL: &str = "https://group3twitter.hopto.org/api";

/// Optional `yeet_config.json` in the data dir. Every field may be omitted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    pub api_base_url: Option<String>,
    pub disable_network: Option<bool>,
}

pub fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(_) => return AppConfig::default(),
    };
    match serde_json::from_str(&raw) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(%e, path = %path.display(), "config: unreadable; using defaults");
            AppConfig::default()
        }
    }
}

impl AppConfig {
    pub fn network_enabled(&self) -> bool {
        !self.disable_network.unwrap_or(false)
    }

    pub fn api_base_url(&self) -> String {
        let env = std::env::var(API_URL_ENV).ok();
        resolve_base_url(env.as_deref(), self.api_base_url.as_deref())
    }
}

/// Env beats file beats default; blank or unparsable candidates are skipped.
fn resolve_base_url(env: Option<&str>, file: Option<&str>) -> String {
    for candidate in [env, file].into_iter().flatten() {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            continue;
        }
        match url::Url::parse(candidate) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                return candidate.trim_end_matches('/').to_string();
            }
            Ok(_) | Err(_) => {
                tracing::warn!(url = candidate, "config: ignoring invalid api base url");
            }
        }
    }
    DEFAULT_API_BASE_URL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_app_config(dir.path().to_str().unwrap());
        assert!(cfg.network_enabled());
        assert_eq!(resolve_base_url(None, cfg.api_base_url.as_deref()), DEFAULT_API_BASE_URL);
    }

    #[test]
    fn file_fields_are_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"api_base_url": "http://127.0.0.1:8000/api/", "disable_network": true}"#,
        )
        .unwrap();
        let cfg = load_app_config(dir.path().to_str().unwrap());
        assert!(!cfg.network_enabled());
        assert_eq!(
            resolve_base_url(None, cfg.api_base_url.as_deref()),
            "http://127.0.0.1:8000/api"
        );
    }

    #[test]
    fn env_wins_and_bad_urls_are_skipped() {
        assert_eq!(
            resolve_base_url(Some("https://staging.example.com/api"), Some("http://file")),
            "https://staging.example.com/api"
        );
        assert_eq!(
            resolve_base_url(Some("  "), Some("http://file.example.com")),
            "http://file.example.com"
        );
        assert_eq!(
            resolve_base_url(Some("not a url"), Some("ftp://x.example.com")),
            DEFAULT_API_BASE_URL
        );
    }

    #[test]
    fn malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{ nope").unwrap();
        let cfg = load_app_config(dir.path().to_str().unwrap());
        assert!(cfg.api_base_url.is_none());
        assert!(cfg.network_enabled());
    }
}
