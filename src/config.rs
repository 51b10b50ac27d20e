//! Centralized configuration management for the tunnel server.
//!
//! Two optional environment variables govern where the server keeps its
//! state: `TUNNELMUX_STATE_DIR` (persisted aliases, ACME cache, conventionally
//! in sibling subdirectories) and `TUNNELMUX_CONFIG_DIR` (host-key files,
//! auth-source configuration). Both default to the current working
//! directory when unset.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

mod env {
    pub const STATE_DIR: &str = "TUNNELMUX_STATE_DIR";
    pub const CONFIG_DIR: &str = "TUNNELMUX_CONFIG_DIR";
    pub const HOSTNAME: &str = "TUNNELMUX_HOSTNAME";
}

static CONFIG: OnceLock<Config> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub config_dir: PathBuf,
    pub hostname: String,
}

impl Config {
    fn load() -> Self {
        let state_dir = std::env::var(env::STATE_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let config_dir = std::env::var(env::CONFIG_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let hostname = std::env::var(env::HOSTNAME).unwrap_or_else(|_| {
            hostname_from_os().unwrap_or_else(|| "localhost".to_string())
        });

        Self {
            state_dir,
            config_dir,
            hostname: hostname.to_lowercase(),
        }
    }

    /// Directory that holds one `<fqdn>.json` file per alias.
    pub fn aliases_dir(&self) -> PathBuf {
        self.state_dir.join("aliases")
    }

    /// Directory the ACME provider is told to cache certificates in.
    pub fn acme_cache_dir(&self) -> PathBuf {
        self.state_dir.join("acme")
    }

    /// Path to the server's persisted host key.
    pub fn host_key_path(&self) -> PathBuf {
        self.config_dir.join("server_key.pem")
    }
}

fn hostname_from_os() -> Option<String> {
    // `std` has no portable hostname query; fall back to a name that is at
    // least stable across the process and documented as overridable via
    // TUNNELMUX_HOSTNAME.
    std::env::var("HOSTNAME").ok()
}

/// Initialize configuration. Must be called once at startup.
pub fn init() {
    CONFIG.get_or_init(Config::load);
}

/// Get the global configuration. Panics if `init()` was never called.
pub fn get() -> &'static Config {
    CONFIG.get().expect("config::init() was not called")
}

/// For tests that need a `Config` without touching process-global state.
#[cfg(test)]
pub fn for_test(state_dir: &Path, config_dir: &Path, hostname: &str) -> Config {
    Config {
        state_dir: state_dir.to_path_buf(),
        config_dir: config_dir.to_path_buf(),
        hostname: hostname.to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_dir_is_under_state_dir() {
        let cfg = for_test(Path::new("/var/lib/tunnelmux"), Path::new("/etc/tunnelmux"), "box");
        assert_eq!(cfg.aliases_dir(), Path::new("/var/lib/tunnelmux/aliases"));
        assert_eq!(cfg.host_key_path(), Path::new("/etc/tunnelmux/server_key.pem"));
    }
}
