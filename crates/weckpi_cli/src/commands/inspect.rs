//! Inspect command implementation.

use super::{fresh_store, load_snapshot, CommandResult};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// Snapshot inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Snapshot file path.
    pub path: String,
    /// Every declared field with the value it holds after the snapshot.
    pub fields: Vec<FieldValue>,
    /// Fields the snapshot did not provide.
    pub defaulted: Vec<String>,
    /// Snapshot keys outside the schema.
    pub unknown: Vec<String>,
}

/// A field and its value.
#[derive(Debug, Serialize)]
pub struct FieldValue {
    /// Dotted path.
    pub path: String,
    /// Current value.
    pub value: Value,
}

/// Applies the snapshot at `path` to a fresh store and collects the result.
pub fn inspect(path: &Path) -> CommandResult<InspectResult> {
    let snapshot = load_snapshot(path)?;
    let store = fresh_store()?;
    let report = store.replace_all(&snapshot)?;

    let mut fields = Vec::with_capacity(store.schema().len());
    for spec in store.schema().fields() {
        fields.push(FieldValue {
            path: spec.path.to_dotted(),
            value: store.get(&spec.path)?,
        });
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        fields,
        defaulted: report.defaulted.iter().map(|p| p.to_dotted()).collect(),
        unknown: report.unknown,
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CommandResult<()> {
    let result = inspect(path)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Snapshot: {}", result.path);
    println!();
    for field in &result.fields {
        let marker = if result.defaulted.contains(&field.path) {
            " (default)"
        } else {
            ""
        };
        println!("  {} = {}{}", field.path, field.value, marker);
    }
    if !result.unknown.is_empty() {
        println!();
        println!("Ignored keys:");
        for key in &result.unknown {
            println!("  {key}");
        }
    }
}
