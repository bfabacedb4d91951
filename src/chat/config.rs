// Client configuration from the environment

use std::env;
use std::path::PathBuf;

/// Connection settings for the chat client. Every field has a default
/// suitable for a broker running on localhost.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub admin_port: u16,
    pub vhost: String,
    pub user: String,
    pub password: String,
    /// Where received files are written.
    pub download_dir: PathBuf,
}

impl Config {
    /// Read `PAPO_*` variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            host: env::var("PAPO_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: port_var("PAPO_PORT", 5674),
            admin_port: port_var("PAPO_ADMIN_PORT", 15674),
            vhost: env::var("PAPO_VHOST").unwrap_or_else(|_| "/".to_string()),
            user: env::var("PAPO_USER").unwrap_or_else(|_| "guest".to_string()),
            password: env::var("PAPO_PASSWORD").unwrap_or_else(|_| "guest".to_string()),
            download_dir: env::var("PAPO_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_download_dir()),
        }
    }

    /// Broker wire-protocol address.
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn port_var(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
}
