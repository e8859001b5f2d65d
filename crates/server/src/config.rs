use std::{collections::HashMap, fs};

#[derive(Debug)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub public_base_url: Option<String>,
    /// Seconds between expiry sweeps. Zero disables the sweeper.
    pub sweep_interval_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            database_url: "sqlite://./data/tamariba.db".into(),
            public_base_url: None,
            sweep_interval_seconds: 300,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("bind_addr") {
                settings.server_bind = v.clone();
            }
            if let Some(v) = file_cfg.get("database_url") {
                settings.database_url = v.clone();
            }
            if let Some(v) = file_cfg.get("public_base_url") {
                settings.public_base_url = Some(v.clone());
            }
            if let Some(v) = file_cfg.get("sweep_interval_seconds") {
                if let Ok(parsed) = v.parse::<u64>() {
                    settings.sweep_interval_seconds = parsed;
                }
            }
        }
    }

    if let Ok(v) = std::env::var("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Ok(v) = std::env::var("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Ok(v) = std::env::var("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Ok(v) = std::env::var("PUBLIC_BASE_URL") {
        settings.public_base_url = Some(v);
    }
    if let Ok(v) = std::env::var("APP__PUBLIC_BASE_URL") {
        settings.public_base_url = Some(v);
    }

    if let Ok(v) = std::env::var("APP__SWEEP_INTERVAL_SECONDS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.sweep_interval_seconds = parsed;
        }
    }

    settings
}

/// Accepts bare file paths and `sqlite:` forms; anything that already carries
/// a scheme passes through untouched.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_plain_file_path_to_sqlite_url() {
        assert_eq!(
            normalize_database_url("./data/test.db"),
            "sqlite://./data/test.db"
        );
        assert_eq!(
            normalize_database_url("sqlite:data/test.db"),
            "sqlite://data/test.db"
        );
    }

    #[test]
    fn leaves_memory_and_scheme_urls_untouched() {
        assert_eq!(
            normalize_database_url("sqlite::memory:"),
            "sqlite::memory:"
        );
        assert_eq!(
            normalize_database_url("sqlite://./data/test.db"),
            "sqlite://./data/test.db"
        );
    }

    #[test]
    fn blank_url_falls_back_to_the_default() {
        assert_eq!(
            normalize_database_url("   "),
            Settings::default().database_url
        );
    }
}
