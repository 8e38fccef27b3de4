/******************************************************************************
 *                                                                            *
 * Plugin configuration. The settings live as a JSON document in a singleton *
 * table so operators can inspect and replace them. Loading reconciles the    *
 * stored document with the current schema: missing keys take defaults,       *
 * unknown keys are dropped and the merged document is written back.          *
 *                                                                            *
 ******************************************************************************/

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use spacetimedb::{ReducerContext, Table};
use log;

use crate::permissions::require_admin;

pub const DEFAULT_AUTO_PICKUP_DISTANCE: f32 = 3.0;
const CONFIG_ROW_ID: u8 = 0;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AutoPickupConfig {
    /// Max planar distance between player and container. 0 or less disables the check.
    #[serde(rename = "Auto pickup distance")]
    pub auto_pickup_distance: f32,
    #[serde(rename = "Broadcast entity death")]
    pub broadcast_entity_death: bool,
}

impl Default for AutoPickupConfig {
    fn default() -> Self {
        Self {
            auto_pickup_distance: DEFAULT_AUTO_PICKUP_DISTANCE,
            broadcast_entity_death: true,
        }
    }
}

impl AutoPickupConfig {
    pub fn to_json(&self) -> String {
        // Plain struct of floats and bools, serialization cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    fn schema_keys() -> BTreeSet<String> {
        match serde_json::to_value(AutoPickupConfig::default()) {
            Ok(Value::Object(map)) => map.keys().cloned().collect(),
            _ => BTreeSet::new(),
        }
    }
}

/// What loading found in the persisted document.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigStatus {
    /// Nothing persisted yet.
    Missing,
    Current,
    /// Key set differs from the schema; merged with defaults.
    Outdated,
    /// Could not be read as the schema; replaced with defaults.
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: AutoPickupConfig,
    pub status: ConfigStatus,
}

impl ConfigLoad {
    /// Whether the persisted form has to be rewritten.
    pub fn needs_save(&self) -> bool {
        self.status != ConfigStatus::Current
    }
}

/// Parses and reconciles a persisted configuration document.
pub fn load_config(raw: Option<&str>) -> ConfigLoad {
    let raw = match raw {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => {
            return ConfigLoad { config: AutoPickupConfig::default(), status: ConfigStatus::Missing };
        }
    };

    let persisted: Map<String, Value> = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return invalid(format!("expected a JSON object, found {}", json_kind(&other)));
        }
        Err(e) => return invalid(e.to_string()),
    };

    let config: AutoPickupConfig = match serde_json::from_value(Value::Object(persisted.clone())) {
        Ok(config) => config,
        Err(e) => return invalid(e.to_string()),
    };

    let persisted_keys: BTreeSet<String> = persisted.keys().cloned().collect();
    let status = if persisted_keys == AutoPickupConfig::schema_keys() {
        ConfigStatus::Current
    } else {
        ConfigStatus::Outdated
    };
    ConfigLoad { config, status }
}

fn invalid(reason: String) -> ConfigLoad {
    ConfigLoad { config: AutoPickupConfig::default(), status: ConfigStatus::Invalid(reason) }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// --- Persisted Configuration Table ---

#[spacetimedb::table(name = plugin_config, public)]
#[derive(Clone, Debug)]
pub struct PluginConfig {
    #[primary_key]
    pub id: u8, // Singleton table, ID will always be 0
    pub raw_json: String,
}

/// Reads the persisted document, reconciles it and writes it back when it changed.
/// Called from module init.
pub fn init_plugin_config(ctx: &ReducerContext) -> Result<(), String> {
    let stored = ctx.db.plugin_config().id().find(CONFIG_ROW_ID);
    let load = load_config(stored.as_ref().map(|row| row.raw_json.as_str()));

    match &load.status {
        ConfigStatus::Missing => log::info!("[Config] No configuration found; writing defaults."),
        ConfigStatus::Current => log::debug!("[Config] Configuration is up to date."),
        ConfigStatus::Outdated => log::warn!("[Config] Configuration appears to be outdated; updating and saving"),
        ConfigStatus::Invalid(reason) => log::warn!("[Config] Configuration is invalid ({}); using defaults", reason),
    }

    if load.needs_save() {
        save_config(ctx, &load.config)?;
    }
    Ok(())
}

/// Current configuration. Falls back to defaults when the stored document is unreadable.
pub fn current_config(ctx: &ReducerContext) -> AutoPickupConfig {
    let stored = ctx.db.plugin_config().id().find(CONFIG_ROW_ID);
    load_config(stored.as_ref().map(|row| row.raw_json.as_str())).config
}

fn save_config(ctx: &ReducerContext, config: &AutoPickupConfig) -> Result<(), String> {
    let table = ctx.db.plugin_config();
    let row = PluginConfig { id: CONFIG_ROW_ID, raw_json: config.to_json() };
    if table.id().find(CONFIG_ROW_ID).is_some() {
        table.id().update(row);
    } else {
        table.try_insert(row).map_err(|e| {
            log::error!("[Config] Failed to persist configuration: {}", e);
            format!("Failed to persist configuration: {}", e)
        })?;
    }
    log::warn!("[Config] Configuration changes saved");
    Ok(())
}

// --- Admin Reducers ---

#[spacetimedb::reducer]
pub fn set_auto_pickup_distance(ctx: &ReducerContext, distance: f32) -> Result<(), String> {
    require_admin(ctx)?;
    if !distance.is_finite() {
        return Err("Auto pickup distance must be a finite number.".to_string());
    }
    let mut config = current_config(ctx);
    config.auto_pickup_distance = distance;
    log::info!("[Config] {:?} set auto pickup distance to {}", ctx.sender, distance);
    save_config(ctx, &config)
}

#[spacetimedb::reducer]
pub fn set_broadcast_entity_death(ctx: &ReducerContext, enabled: bool) -> Result<(), String> {
    require_admin(ctx)?;
    let mut config = current_config(ctx);
    config.broadcast_entity_death = enabled;
    log::info!("[Config] {:?} set entity death broadcast to {}", ctx.sender, enabled);
    save_config(ctx, &config)
}

/// Replaces the persisted document. Goes through the same reconciliation as startup,
/// so a malformed document is rejected instead of silently reset.
#[spacetimedb::reducer]
pub fn import_config(ctx: &ReducerContext, raw_json: String) -> Result<(), String> {
    require_admin(ctx)?;
    let load = load_config(Some(&raw_json));
    match load.status {
        ConfigStatus::Invalid(reason) => Err(format!("Configuration is invalid: {}", reason)),
        ConfigStatus::Missing => Err("Configuration document is empty.".to_string()),
        ConfigStatus::Outdated => {
            log::warn!("[Config] Imported configuration is missing keys or has extra keys; merging with defaults");
            save_config(ctx, &load.config)
        }
        ConfigStatus::Current => save_config(ctx, &load.config),
    }
}
