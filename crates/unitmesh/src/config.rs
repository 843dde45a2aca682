use std::path::Path;

use tracing::{info, warn};
use unitmesh_node::{KvStore, KvValue};

use crate::exit::{CliError, CliResult, DATA_INVALID};

/// Runtime configuration for the fabric daemon.
///
/// Loaded from a flat JSON object and mirrored into the key-value store,
/// so units can read configuration through `sql_select` like any other
/// key.
#[derive(Debug, Clone)]
pub struct FabricConfig {
    /// First work id handed out by the registry counter.
    pub first_work_id: u64,
    /// Port pool bounds, `[port_min, port_max)`.
    pub port_min: u16,
    pub port_max: u16,
    /// Template for allocated unit output/inference addresses.
    pub unit_format: String,
    /// Template for bridge reply addresses.
    pub com_format: String,
    /// TCP listen port of the bridge; 0 disables the bridge.
    pub tcp_port: u16,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            first_work_id: 1000,
            port_min: 5010,
            port_max: 5110,
            unit_format: "tcp://*:%d".to_string(),
            com_format: "tcp://*:%d".to_string(),
            tcp_port: 10001,
        }
    }
}

/// Load configuration from `path` (when given and present) into the
/// store, then resolve the typed config from the store with defaults for
/// anything unset.
pub fn load(path: Option<&Path>, store: &KvStore) -> CliResult<FabricConfig> {
    if let Some(path) = path {
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                let body: serde_json::Value = serde_json::from_str(&raw).map_err(|err| {
                    CliError::new(DATA_INVALID, format!("config {}: {err}", path.display()))
                })?;
                let object = body.as_object().ok_or_else(|| {
                    CliError::new(
                        DATA_INVALID,
                        format!("config {}: top level must be an object", path.display()),
                    )
                })?;
                for (key, value) in object {
                    if let Some(number) = value.as_i64() {
                        store.set(key.clone(), KvValue::Int(number));
                    } else if let Some(text) = value.as_str() {
                        store.set(key.clone(), KvValue::Str(text.to_string()));
                    } else {
                        warn!(%key, "ignoring non-scalar config value");
                    }
                }
                info!(path = %path.display(), "configuration loaded");
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "config file not readable, using defaults");
            }
        }
    }

    let defaults = FabricConfig::default();
    let config = FabricConfig {
        first_work_id: store
            .get_int("config_work_id")
            .map(|n| n as u64)
            .unwrap_or(defaults.first_work_id),
        port_min: store
            .get_int("config_port_min")
            .map(|n| n as u16)
            .unwrap_or(defaults.port_min),
        port_max: store
            .get_int("config_port_max")
            .map(|n| n as u16)
            .unwrap_or(defaults.port_max),
        unit_format: non_empty(store.get_text("config_unit_format"))
            .unwrap_or(defaults.unit_format),
        com_format: non_empty(store.get_text("config_com_format")).unwrap_or(defaults.com_format),
        tcp_port: store
            .get_int("config_tcp_port")
            .map(|n| n as u16)
            .unwrap_or(defaults.tcp_port),
    };

    // Mirror the effective values so `sql_select` answers them even when
    // the file left them unset.
    store.set("config_work_id", KvValue::Int(config.first_work_id as i64));
    store.set("config_port_min", KvValue::Int(config.port_min as i64));
    store.set("config_port_max", KvValue::Int(config.port_max as i64));
    store.set(
        "config_unit_format",
        KvValue::Str(config.unit_format.clone()),
    );
    store.set("config_com_format", KvValue::Str(config.com_format.clone()));
    store.set("config_tcp_port", KvValue::Int(config.tcp_port as i64));

    Ok(config)
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
