use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_name")]
    pub server_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_server_name() -> String {
    "Threadcast".to_string()
}

fn default_database_url() -> String {
    "sqlite::memory:".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!("Config file not found at '{}', using defaults", path);
            Config::default()
        };

        // Environment variable overrides
        if let Ok(value) = std::env::var("THREADCAST_DATABASE_URL") {
            config.database.url = value;
        }
        if let Ok(value) = std::env::var("THREADCAST_SERVER_NAME") {
            config.server.server_name = value;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load("/nonexistent/threadcast.toml").unwrap();
        assert_eq!(config.server.server_name, "Threadcast");
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threadcast.toml");
        std::fs::write(
            &path,
            "[database]\nurl = \"sqlite://./data/chat.db?mode=rwc\"\n",
        )
        .unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.database.url, "sqlite://./data/chat.db?mode=rwc");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.server.server_name, "Threadcast");
    }

    #[test]
    fn full_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threadcast.toml");
        let original = Config {
            server: ServerConfig {
                server_name: "Chat Staging".to_string(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/chat".to_string(),
                max_connections: 20,
            },
        };
        std::fs::write(&path, toml::to_string(&original).unwrap()).unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.server_name, "Chat Staging");
        assert_eq!(config.database.url, "postgres://localhost/chat");
        assert_eq!(config.database.max_connections, 20);
    }
}
