use std::net::SocketAddr;

use anyhow::{Context, Result};

use crate::db::DbConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub public_addr: String,
    pub https: bool,
    pub network: Option<String>,
    pub docker_socket: String,
    pub docker_api_version: String,
    pub docker_timeout_secs: u64,
    pub consul_addr: String,
    pub routing_prefix: String,
    pub self_addr: String,
    pub default_shell: Option<String>,
    pub database: DbConfig,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn var_or(name: &str, default: &str) -> String {
    var(name).unwrap_or_else(|| default.to_string())
}

fn flag(name: &str, default: bool) -> bool {
    match var(name) {
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = var_or("BERTH_LISTEN_ADDR", "127.0.0.1:8080")
            .parse()
            .context("BERTH_LISTEN_ADDR must be a socket address")?;

        Ok(Self {
            listen_addr,
            log_level: var_or("BERTH_LOG_LEVEL", "info"),
            dev_mode: flag("BERTH_DEV", false),
            public_addr: var_or("BERTH_PUBLIC_ADDR", "berth.example.com"),
            https: flag("BERTH_HTTPS", true),
            network: var("BERTH_NETWORK"),
            docker_socket: var_or("BERTH_DOCKER_SOCKET", "/var/run/docker.sock"),
            docker_api_version: var_or("BERTH_DOCKER_API_VERSION", "1.41"),
            docker_timeout_secs: var("BERTH_DOCKER_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(120),
            consul_addr: var_or("BERTH_CONSUL_ADDR", "http://127.0.0.1:8500"),
            routing_prefix: var_or("BERTH_ROUTING_PREFIX", "traefik"),
            self_addr: var_or("BERTH_SELF_ADDR", "http://berth"),
            default_shell: var("BERTH_DEFAULT_SHELL"),
            database: DbConfig::from_env(),
        })
    }
}
