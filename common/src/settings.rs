// SPDX-License-Identifier: Apache-2.0

//! Layered configuration: built-in defaults, overridden by an optional
//! `orchestrator.yaml` on disk, overridden by `ORCH_*` environment
//! variables. Loaded once into a process-wide `OnceLock`.

use std::sync::OnceLock;

use serde::Deserialize;

use crate::error::{Error, Result};

static SETTINGS: OnceLock<Settings> = OnceLock::new();

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bind_address: String,
    pub bind_port: u16,
    pub store_backend: StoreBackend,
    pub store_path: String,
    pub scheduler: SchedulerKind,
    pub daemon_socket_path: String,
    pub workers: Vec<String>,
    pub update_interval_secs: u64,
    pub health_check_interval_secs: u64,
    pub max_restart_count: u32,
    /// Declared capacity applied to every configured worker node, in bytes.
    /// The manager has no stats-refresh channel back from a worker's actual
    /// host, so this is the node's capacity for scheduling purposes; the
    /// `epvm` scheduler treats a node with zero declared capacity as always
    /// over-utilized and never a candidate.
    pub worker_memory: i64,
    pub worker_disk: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Rocks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    Roundrobin,
    Epvm,
}

fn defaults() -> config::Config {
    config::Config::builder()
        .set_default("bind_address", "0.0.0.0")
        .unwrap()
        .set_default("bind_port", 8080)
        .unwrap()
        .set_default("store_backend", "memory")
        .unwrap()
        .set_default("store_path", "/var/lib/orchestrator/store")
        .unwrap()
        .set_default("scheduler", "epvm")
        .unwrap()
        .set_default("daemon_socket_path", "/var/run/docker.sock")
        .unwrap()
        .set_default("workers", Vec::<String>::new())
        .unwrap()
        .set_default("update_interval_secs", 15)
        .unwrap()
        .set_default("health_check_interval_secs", 60)
        .unwrap()
        .set_default("max_restart_count", 3)
        .unwrap()
        .set_default("worker_memory", 536_870_912i64)
        .unwrap()
        .set_default("worker_disk", 10_737_418_240i64)
        .unwrap()
        .build()
        .expect("default settings are always well-formed")
}

fn load() -> Settings {
    defaults()
        .try_deserialize()
        .expect("defaults alone must satisfy Settings")
}

/// Builds the layered configuration from `path` (if it exists) and the
/// process environment, without touching the process-wide cache. Exists
/// so callers (`main`, tests) can fail fast on a malformed config file
/// instead of silently falling back to defaults.
pub fn build(path: Option<&str>) -> Result<Settings> {
    let mut builder = defaults();
    if let Some(path) = path {
        if std::path::Path::new(path).exists() {
            builder = config::Config::builder()
                .add_source(builder)
                .add_source(config::File::with_name(path))
                .build()
                .map_err(|e| Error::Fatal(format!("loading {path}: {e}")))?;
        }
    }
    let merged = config::Config::builder()
        .add_source(builder)
        .add_source(config::Environment::with_prefix("ORCH").separator("_"))
        .build()
        .map_err(|e| Error::Fatal(format!("merging environment overrides: {e}")))?;
    merged
        .try_deserialize()
        .map_err(|e| Error::Fatal(format!("invalid settings: {e}")))
}

/// Loads settings on first call, caching for the life of the process.
/// Falls back to built-in defaults if `path` does not exist or cannot be
/// parsed, matching the teacher's "never fail startup over a missing
/// config file" behavior.
pub fn init(path: Option<&str>) -> &'static Settings {
    SETTINGS.get_or_init(|| build(path).unwrap_or_else(|_| load()))
}

/// Panics if [`init`] has not yet been called; every binary entry point
/// calls `init` before spawning any control loop.
pub fn get() -> &'static Settings {
    SETTINGS.get().expect("settings::init must run before settings::get")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deserialize_into_settings() {
        let settings = load();
        assert_eq!(settings.bind_address, "0.0.0.0");
        assert_eq!(settings.bind_port, 8080);
        assert_eq!(settings.store_backend, StoreBackend::Memory);
        assert_eq!(settings.scheduler, SchedulerKind::Epvm);
        assert_eq!(settings.max_restart_count, 3);
        assert_eq!(settings.worker_memory, 536_870_912);
        assert_eq!(settings.worker_disk, 10_737_418_240);
    }

    #[test]
    fn build_falls_back_to_defaults_for_missing_file() {
        let settings = build(Some("/nonexistent/orchestrator.yaml")).unwrap();
        assert_eq!(settings.bind_port, 8080);
    }

    #[test]
    fn environment_override_wins_over_default() {
        std::env::set_var("ORCH_BIND_PORT", "9999");
        let settings = build(None).unwrap();
        std::env::remove_var("ORCH_BIND_PORT");
        assert_eq!(settings.bind_port, 9999);
    }
}
