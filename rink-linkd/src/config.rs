//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

use rink_core::Role;

/// Daemon configuration. File: ~/.config/rinklink/config.toml or
/// /etc/rinklink/config.toml.
/// Env overrides: RINKLINK_DISCOVERY_PORT, RINKLINK_TRANSPORT_PORT,
/// RINKLINK_DISPLAY_NAME, RINKLINK_ROLE.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Discovery UDP port (default 47801).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Session transport TCP port (default 47802).
    #[serde(default = "default_transport_port")]
    pub transport_port: u16,
    /// Name shown on the peer's approval prompt.
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Role to start the session as: "controller" or "recorder".
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_discovery_port() -> u16 {
    47801
}
fn default_transport_port() -> u16 {
    47802
}
fn default_display_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "rinklink".to_string())
}
fn default_role() -> String {
    "controller".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            transport_port: default_transport_port(),
            display_name: default_display_name(),
            role: default_role(),
        }
    }
}

impl Config {
    pub fn session_role(&self) -> Role {
        match self.role.as_str() {
            "recorder" => Role::Recorder,
            _ => Role::Controller,
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("RINKLINK_DISCOVERY_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.discovery_port = p;
        }
    }
    if let Ok(s) = std::env::var("RINKLINK_TRANSPORT_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.transport_port = p;
        }
    }
    if let Ok(s) = std::env::var("RINKLINK_DISPLAY_NAME") {
        if !s.is_empty() {
            c.display_name = s;
        }
    }
    if let Ok(s) = std::env::var("RINKLINK_ROLE") {
        if !s.is_empty() {
            c.role = s;
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/rinklink/config.toml"));
    }
    out.push(PathBuf::from("/etc/rinklink/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<Config>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}
