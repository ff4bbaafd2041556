//! CLI command implementations.

pub mod inspect;
pub mod next_alarm;
pub mod schema;
pub mod verify;

use serde_json::Value;
use std::path::Path;
use weckpi_state::StateStore;

/// Result type shared by the commands.
pub type CommandResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Reads a JSON snapshot file.
pub fn load_snapshot(path: &Path) -> CommandResult<Value> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .map_err(|e| format!("{} is not valid JSON: {e}", path.display()))?;
    if !value.is_object() {
        return Err(format!("{} does not contain a JSON object", path.display()).into());
    }
    Ok(value)
}

/// Creates an empty store over the WeckPi schema.
pub fn fresh_store() -> CommandResult<StateStore> {
    Ok(StateStore::new(weckpi_app::app_schema()?))
}

/// Loads a snapshot file into a fresh store.
pub fn load_store(path: &Path) -> CommandResult<StateStore> {
    let snapshot = load_snapshot(path)?;
    let store = fresh_store()?;
    let report = store.replace_all(&snapshot)?;
    for key in &report.unknown {
        tracing::warn!(key = %key, "ignoring field outside the schema");
    }
    Ok(store)
}
