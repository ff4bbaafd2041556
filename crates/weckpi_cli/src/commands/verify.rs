//! Verify command implementation.

use super::{fresh_store, load_snapshot, CommandResult};
use std::path::Path;
use weckpi_state::StateError;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Fields the snapshot did not provide.
    pub defaulted: Vec<String>,
    /// Snapshot keys outside the schema.
    pub unknown: Vec<String>,
    /// Why the snapshot would be rejected, if it would be.
    pub rejection: Option<StateError>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Checks the snapshot at `path` without keeping it.
pub fn verify(path: &Path) -> CommandResult<VerifyResult> {
    let snapshot = load_snapshot(path)?;
    let store = fresh_store()?;

    let result = match store.validate_snapshot(&snapshot) {
        Ok(report) => VerifyResult {
            defaulted: report.defaulted.iter().map(|p| p.to_dotted()).collect(),
            unknown: report.unknown,
            rejection: None,
        },
        Err(e) => VerifyResult {
            rejection: Some(e),
            ..VerifyResult::default()
        },
    };
    Ok(result)
}

/// Runs the verify command.
pub fn run(path: &Path) -> CommandResult<()> {
    println!("Verifying snapshot {:?}", path);
    println!();

    let result = verify(path)?;
    if !result.defaulted.is_empty() {
        println!("Missing fields ({}), defaults apply:", result.defaulted.len());
        for field in &result.defaulted {
            println!("  {field}");
        }
    }
    if !result.unknown.is_empty() {
        println!("Unknown keys ({}), ignored:", result.unknown.len());
        for key in &result.unknown {
            println!("  {key}");
        }
    }

    println!();
    if result.is_ok() {
        println!("✓ Snapshot would be accepted");
        Ok(())
    } else {
        if let Some(e) = &result.rejection {
            println!("  {e}");
        }
        println!("✗ Snapshot would be rejected");
        Err("Verification failed".into())
    }
}
