use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub data: DataConfig,
    pub auth: AuthConfig,
    /// Google sign-in is offered only when this section is present.
    pub google: Option<GoogleConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server listens on.
    pub bind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory holding `users.json` and `expenses.json`.
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Lifetime of a sign-in session.
    pub session_hours: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("database"),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { session_hours: 24 }
    }
}

impl AppConfig {
    /// Load `$SPLITBILL_CONFIG` (or `splitbill.toml`), then apply env overrides.
    /// A missing or unparseable file falls back to defaults.
    pub fn load() -> Self {
        let path = std::env::var("SPLITBILL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("splitbill.toml"));
        let mut config = Self::from_file(&path);
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    pub fn from_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!(
                        "Failed to parse config at {}: {e}, using defaults",
                        path.display()
                    );
                    Self::default()
                }
            },
            Err(_) => {
                log::debug!("No config file at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Override fields from `SPLITBILL_*` variables returned by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("SPLITBILL_BIND") {
            self.server.bind = bind;
        }
        if let Some(dir) = lookup("SPLITBILL_DATA_DIR") {
            self.data.data_dir = PathBuf::from(dir);
        }
        if let Some(hours) = lookup("SPLITBILL_SESSION_HOURS") {
            match hours.parse() {
                Ok(hours) => self.auth.session_hours = hours,
                Err(_) => log::warn!("Ignoring SPLITBILL_SESSION_HOURS={hours}: not a number"),
            }
        }

        let client_id = lookup("SPLITBILL_GOOGLE_CLIENT_ID");
        let client_secret = lookup("SPLITBILL_GOOGLE_CLIENT_SECRET");
        let redirect_url = lookup("SPLITBILL_GOOGLE_REDIRECT_URL");
        if client_id.is_some() || client_secret.is_some() || redirect_url.is_some() {
            let google = self.google.get_or_insert_with(GoogleConfig::default);
            if let Some(id) = client_id {
                google.client_id = id;
            }
            if let Some(secret) = client_secret {
                google.client_secret = secret;
            }
            if let Some(url) = redirect_url {
                google.redirect_url = url;
            }
        }
    }

    pub fn users_path(&self) -> PathBuf {
        self.data.data_dir.join("users.json")
    }

    pub fn expenses_path(&self) -> PathBuf {
        self.data.data_dir.join("expenses.json")
    }

    pub fn transactions_path(&self) -> PathBuf {
        self.data.data_dir.join("transactions.json")
    }

    /// Google settings, if every field needed to talk to Google is filled in.
    pub fn google(&self) -> Option<&GoogleConfig> {
        self.google.as_ref().filter(|g| {
            !g.client_id.is_empty() && !g.client_secret.is_empty() && !g.redirect_url.is_empty()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind, "127.0.0.1:3000");
        assert_eq!(config.data.data_dir, PathBuf::from("database"));
        assert_eq!(config.auth.session_hours, 24);
        assert!(config.google().is_none());
        assert_eq!(config.users_path(), PathBuf::from("database/users.json"));
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            bind = "0.0.0.0:8080"

            [google]
            client_id = "id"
            client_secret = "secret"
            redirect_url = "http://localhost:8080/auth/google/callback"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.auth.session_hours, 24);
        assert_eq!(config.google().map(|g| g.client_id.as_str()), Some("id"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AppConfig::from_file(Path::new("/nonexistent/splitbill.toml"));
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_bad_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("splitbill.toml");
        std::fs::write(&path, "server = [").unwrap();
        assert_eq!(AppConfig::from_file(&path), AppConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SPLITBILL_BIND", "0.0.0.0:9000"),
            ("SPLITBILL_DATA_DIR", "/tmp/splitbill"),
            ("SPLITBILL_SESSION_HOURS", "2"),
            ("SPLITBILL_GOOGLE_CLIENT_ID", "abc"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.expenses_path(), PathBuf::from("/tmp/splitbill/expenses.json"));
        assert_eq!(config.auth.session_hours, 2);
        assert_eq!(config.google.as_ref().map(|g| g.client_id.as_str()), Some("abc"));
        // secret and redirect are still missing
        assert!(config.google().is_none());
    }

    #[test]
    fn test_bad_session_hours_is_ignored() {
        let mut config = AppConfig::default();
        config.apply_env(|key| (key == "SPLITBILL_SESSION_HOURS").then(|| "soon".to_string()));
        assert_eq!(config.auth.session_hours, 24);
    }
}
