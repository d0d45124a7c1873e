//! List command implementation

use anyhow::{Context, Result};
use serde::Serialize;
use tm_core::MigrationSet;

use crate::cli::{GlobalArgs, LsArgs, LsOutput};
use crate::context::RuntimeContext;

/// Execute the ls command
pub async fn execute(args: &LsArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = RuntimeContext::new(global)?;
    let migrations = ctx.load_migrations()?;

    match args.output {
        LsOutput::Table => {
            if migrations.is_empty() {
                println!(
                    "No migrations found in {}",
                    ctx.migrations_path().display()
                );
                return Ok(());
            }
            print_table(&["VERSION", "NAME", "FILE"], &table_rows(&migrations));
            println!("\n{} migrations", migrations.len());
        }
        LsOutput::Json => println!("{}", to_json(&migrations)?),
    }
    Ok(())
}

/// Migration information for display
#[derive(Debug, Serialize)]
struct MigrationInfo<'a> {
    version: u64,
    name: &'a str,
    path: &'a str,
}

fn table_rows(migrations: &MigrationSet) -> Vec<Vec<String>> {
    migrations
        .iter()
        .map(|m| vec![m.version.to_string(), m.name.clone(), m.path.clone()])
        .collect()
}

fn to_json(migrations: &MigrationSet) -> Result<String> {
    let infos: Vec<MigrationInfo<'_>> = migrations
        .iter()
        .map(|m| MigrationInfo {
            version: m.version,
            name: &m.name,
            path: &m.path,
        })
        .collect();
    serde_json::to_string_pretty(&infos).context("Failed to serialize migrations")
}

fn column_widths(headers: &[&str], rows: &[Vec<String>]) -> Vec<usize> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.chars().count());
        }
    }
    widths
}

/// Print a left-aligned table with a dashed separator under the header.
fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let widths = column_widths(headers, rows);
    let render = |cells: Vec<String>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, &w)| format!("{cell:<w$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    println!("{}", render(headers.iter().map(|h| h.to_string()).collect()));
    println!("{}", render(widths.iter().map(|&w| "-".repeat(w)).collect()));
    for row in rows {
        println!("{}", render(row.clone()));
    }
}

#[cfg(test)]
#[path = "ls_test.rs"]
mod tests;
