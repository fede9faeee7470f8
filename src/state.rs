use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::db::ContactDb;
use crate::types::Config;

/// Shared state for the HTTP handlers.
///
/// The store sits behind a single process-wide mutex: reconciliation is a
/// read-modify-write over whole clusters, and one writer at a time keeps
/// two requests from merging the same clusters in different directions.
pub struct AppState {
    pub config: Config,
    pub db: Mutex<ContactDb>,
}

impl AppState {
    /// Open the store named by `config` and wrap it for the server.
    pub fn new(config: Config) -> Result<Self, String> {
        let path = db_path(&config)?;
        let db = ContactDb::open_at(path.clone())
            .map_err(|e| format!("Failed to open contact store at {}: {}", path.display(), e))?;
        log::info!("Contact store opened at {}", path.display());
        Ok(Self::with_db(config, db))
    }

    /// Wrap an already-open store. Tests use this with a temp database.
    pub fn with_db(config: Config, db: ContactDb) -> Self {
        Self {
            config,
            db: Mutex::new(db),
        }
    }
}

/// Get the canonical config file path (`$CONTACTLINK_CONFIG`, else
/// `~/.contactlink/config.json`)
pub fn config_path() -> Result<PathBuf, String> {
    if let Some(path) = std::env::var_os("CONTACTLINK_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".contactlink").join("config.json"))
}

/// Load configuration and apply environment overrides.
///
/// A missing config file is not an error; every field has a default.
pub fn load_config() -> Result<Config, String> {
    let config = read_config_file(&config_path()?)?;
    apply_env_overrides(config, |key| std::env::var(key).ok())
}

fn read_config_file(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        log::debug!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;

    serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))
}

/// `PORT` and `CONTACTLINK_DB_PATH` win over the file. `RUST_LOG` is read
/// where the subscriber is built.
fn apply_env_overrides(
    mut config: Config,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, String> {
    if let Some(port) = env("PORT").filter(|v| !v.trim().is_empty()) {
        config.port = port
            .trim()
            .parse()
            .map_err(|_| format!("PORT is not a valid port number: {}", port))?;
    }
    if let Some(path) = env("CONTACTLINK_DB_PATH").filter(|v| !v.trim().is_empty()) {
        config.db_path = Some(PathBuf::from(path));
    }
    Ok(config)
}

/// Database location: the configured path, else `~/.contactlink/contactlink.db`.
pub fn db_path(config: &Config) -> Result<PathBuf, String> {
    match &config.db_path {
        Some(path) => Ok(path.clone()),
        None => ContactDb::default_path().map_err(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = read_config_file(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.bind_host, "0.0.0.0");
    }

    #[test]
    fn test_config_file_fields_are_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "bindHost": "127.0.0.1", "port": 8080, "dbPath": "/tmp/c.db", "logFilter": "debug" }"#,
        )
        .unwrap();

        let config = read_config_file(&path).unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/c.db")));
        assert_eq!(config.log_filter, "debug");
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ port: ").unwrap();
        let err = read_config_file(&path).unwrap_err();
        assert!(err.contains("Failed to parse config"), "{}", err);
    }

    #[test]
    fn test_env_overrides_win() {
        let env = |key: &str| match key {
            "PORT" => Some("4100".to_string()),
            "CONTACTLINK_DB_PATH" => Some("/var/lib/contacts.db".to_string()),
            _ => None,
        };
        let config = apply_env_overrides(Config::default(), env).unwrap();
        assert_eq!(config.port, 4100);
        assert_eq!(db_path(&config).unwrap(), PathBuf::from("/var/lib/contacts.db"));
    }

    #[test]
    fn test_bad_port_override_is_rejected() {
        let env = |key: &str| (key == "PORT").then(|| "eighty".to_string());
        assert!(apply_env_overrides(Config::default(), env).is_err());

        let config = apply_env_overrides(Config::default(), no_env).unwrap();
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_new_opens_store_at_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("contacts.db");
        let config = Config {
            db_path: Some(path.clone()),
            ..Config::default()
        };
        let state = AppState::new(config).unwrap();
        assert!(path.exists());
        assert_eq!(state.db.lock().count_contacts().unwrap(), 0);
    }
}
