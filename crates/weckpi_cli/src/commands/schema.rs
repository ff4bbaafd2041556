//! Schema command implementation.

use super::CommandResult;
use serde::Serialize;
use serde_json::Value;
use weckpi_state::{FieldKind, Schema};

/// One declared field.
#[derive(Debug, Serialize)]
pub struct FieldEntry {
    /// Dotted path.
    pub path: String,
    /// Declared kind.
    pub kind: FieldKind,
    /// Default value.
    pub default: Value,
    /// Name of the value constraint, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<&'static str>,
}

/// Lists the fields of `schema` in declaration order.
pub fn entries(schema: &Schema) -> Vec<FieldEntry> {
    schema
        .fields()
        .map(|spec| FieldEntry {
            path: spec.path.to_dotted(),
            kind: spec.kind,
            default: spec.default.clone(),
            constraint: spec.constraint.as_ref().map(|c| c.name()),
        })
        .collect()
}

/// Runs the schema command.
pub fn run(format: &str) -> CommandResult<()> {
    let schema = weckpi_app::app_schema()?;
    let entries = entries(&schema);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => {
            let width = entries.iter().map(|e| e.path.len()).max().unwrap_or(0);
            for entry in &entries {
                let constraint = entry
                    .constraint
                    .map(|name| format!("  [{name}]"))
                    .unwrap_or_default();
                println!(
                    "{:width$}  {:8}  {}{}",
                    entry.path,
                    entry.kind.to_string(),
                    entry.default,
                    constraint
                );
            }
            println!();
            println!("{} fields", entries.len());
        }
    }
    Ok(())
}
