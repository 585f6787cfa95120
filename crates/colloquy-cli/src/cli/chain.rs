//! Chain file commands: validate, list.

use std::path::Path;

use anyhow::{Result, bail};
use colloquy_core::chain::ChainDefaults;
use colloquy_core::chain::definition::{
    DefinitionError, compile_definition, discover_chains, load_definition_file,
};
use colloquy_core::chain::registry::ChainRegistry;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::json;

/// Validate one chain file, printing every violation found.
///
/// Returns an error (non-zero exit) when the file is invalid.
pub fn validate_chain(file: &Path, defaults: ChainDefaults, json: bool) -> Result<()> {
    let outcome = load_definition_file(file).and_then(|def| compile_definition(&def, defaults));

    let problems: Vec<String> = match &outcome {
        Ok(_) => Vec::new(),
        Err(DefinitionError::Invalid(e)) => e.violations.iter().map(ToString::to_string).collect(),
        Err(e) => vec![e.to_string()],
    };

    if json {
        let report = match &outcome {
            Ok(chain) => json!({
                "file": file.display().to_string(),
                "valid": true,
                "chain_id": chain.id(),
                "steps": chain.len(),
                "entry_points": chain.entry_points(),
            }),
            Err(_) => json!({
                "file": file.display().to_string(),
                "valid": false,
                "problems": problems,
            }),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        match &outcome {
            Ok(chain) => println!(
                "  {} {} is valid ({} steps, starts at '{}')",
                style("✓").green(),
                style(chain.id()).cyan(),
                chain.len(),
                chain.start_step_id()
            ),
            Err(_) => {
                println!("  {} {}", style("✗").red(), style(file.display()).bold());
                for problem in &problems {
                    println!("    {} {problem}", style("-").red());
                }
            }
        }
        println!();
    }

    if outcome.is_err() {
        bail!("{} has {} problem(s)", file.display(), problems.len());
    }
    Ok(())
}

/// List every valid chain found under `dir`.
///
/// Chains are registered into a scratch registry so duplicate ids and
/// clashing entry points show up in the listing.
pub fn list_chains(dir: &Path, defaults: ChainDefaults, json: bool) -> Result<()> {
    let discovered = discover_chains(dir, defaults)?;
    let registry = ChainRegistry::new();

    let mut rows = Vec::with_capacity(discovered.len());
    for (path, chain) in discovered {
        let row = json!({
            "file": path.display().to_string(),
            "id": chain.id(),
            "name": chain.name(),
            "steps": chain.len(),
            "timeout_secs": chain.timeout_secs(),
            "entry_points": chain.entry_points(),
        });
        let status = match registry.register(chain) {
            Ok(_) => "ok".to_string(),
            Err(e) => e.to_string(),
        };
        rows.push((row, status));
    }

    if json {
        let out: Vec<_> = rows
            .into_iter()
            .map(|(mut row, status)| {
                row["status"] = json!(status);
                row
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!();
        println!(
            "  {} No chain files found in {}",
            style("i").blue().bold(),
            style(dir.display()).cyan()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Name").fg(Color::White),
        Cell::new("Steps").fg(Color::White),
        Cell::new("Timeout").fg(Color::White),
        Cell::new("Entry points").fg(Color::White),
        Cell::new("Status").fg(Color::White),
    ]);

    for (row, status) in &rows {
        let entry_points = row["entry_points"]
            .as_array()
            .map(|eps| {
                eps.iter()
                    .filter_map(|e| e.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        let status_cell = if status == "ok" {
            Cell::new(status).fg(Color::Green)
        } else {
            Cell::new(status).fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(row["id"].as_str().unwrap_or_default()).fg(Color::Cyan),
            Cell::new(row["name"].as_str().unwrap_or_default()),
            Cell::new(row["steps"].to_string()),
            Cell::new(format!("{}s", row["timeout_secs"])),
            Cell::new(entry_points),
            status_cell,
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
id: hello
start_step: ask
steps:
  - id: ask
    type: question
    prompt: "Name?"
    next: done
  - id: done
    type: final
    prompt: "Hi {ask}"
"#;

    #[test]
    fn test_validate_accepts_bundled_demo_chain() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../chains/registration.yaml");
        validate_chain(&path, ChainDefaults::default(), true).unwrap();
    }

    #[test]
    fn test_validate_reports_invalid_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, VALID.replace("next: done", "next: nowhere")).unwrap();
        let err = validate_chain(&path, ChainDefaults::default(), true).unwrap_err();
        assert!(err.to_string().contains("1 problem"), "got: {err}");
    }

    #[test]
    fn test_list_chains_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), VALID).unwrap();
        std::fs::write(dir.path().join("b.yaml"), VALID).unwrap();
        list_chains(dir.path(), ChainDefaults::default(), true).unwrap();
        list_chains(&dir.path().join("missing"), ChainDefaults::default(), false).unwrap();
    }
}
