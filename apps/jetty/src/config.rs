use std::env;
use std::path::PathBuf;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// The workspace server address (host:port or ws:// url).
    pub server: String,
    /// Where the layout/session document lives.
    pub state_path: PathBuf,
    /// Consecutive reconnect failures before surfacing a disconnect.
    pub reconnect_max_attempts: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let server =
            env::var("JETTY_SERVER").unwrap_or_else(|_| "127.0.0.1:3456".to_string());
        // Normalize localhost to IPv4 to avoid IPv6 (::1) preference on macOS
        let server = if server.starts_with("localhost:") {
            server.replacen("localhost", "127.0.0.1", 1)
        } else {
            server
        };
        let state_path = env::var("JETTY_STATE_DIR")
            .map(|dir| PathBuf::from(dir).join("workspace.json"))
            .unwrap_or_else(|_| crate::persist::default_state_path());
        let reconnect_max_attempts = env::var("JETTY_RECONNECT_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(6);
        Self {
            server,
            state_path,
            reconnect_max_attempts,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:3456".to_string(),
            state_path: crate::persist::default_state_path(),
            reconnect_max_attempts: 6,
        }
    }
}
