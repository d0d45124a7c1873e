//! Migrate command implementation

use anyhow::{Context, Result};
use std::time::Duration;
use tm_engine::{MigrateSummary, Migrator};

use crate::cli::{GlobalArgs, MigrateArgs};
use crate::context::RuntimeContext;

/// Execute the migrate command
pub async fn execute(args: &MigrateArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = RuntimeContext::new(global)?;
    let summary = run(args, &ctx).await?;
    print_summary(&summary);
    Ok(())
}

/// Load migrations, open the database, and apply everything pending.
pub(crate) async fn run(args: &MigrateArgs, ctx: &RuntimeContext) -> Result<MigrateSummary> {
    let migrations = ctx.load_migrations()?;
    ctx.verbose(&format!(
        "Found {} migrations (latest version {})",
        migrations.len(),
        migrations.latest_version().unwrap_or(0)
    ));

    let mut migrator = Migrator::new(migrations);
    let lock_timeout = args
        .lock_timeout
        .map(Duration::from_secs)
        .or_else(|| ctx.config.lock_timeout());
    if let Some(timeout) = lock_timeout {
        ctx.verbose(&format!("Waiting at most {timeout:?} for the migration lock"));
        migrator = migrator.with_lock_timeout(timeout);
    }

    let mut db = ctx.open_database().await?;
    ctx.verbose(&format!(
        "Bookkeeping table {} on {}",
        ctx.config.table,
        db.db_type()
    ));

    let result = migrator.migrate(&mut *db).await;
    match result {
        Ok(summary) => Ok(summary),
        Err(e) if e.is_lock_timeout() => Err(e).context(
            "Another migrator is still holding the lock; retry later or raise --lock-timeout",
        ),
        Err(e) => {
            let context = match e.failed_version() {
                Some(version) => format!("Migration stopped at version {version}"),
                None => format!("Migration failed during {}", e.stage()),
            };
            Err(e).context(context)
        }
    }
}

fn print_summary(summary: &MigrateSummary) {
    if summary.is_noop() {
        println!("Already up to date at version {}", summary.to_version);
        return;
    }

    for version in &summary.applied {
        println!("  ✓ {version}");
    }
    println!(
        "\nMigrated from version {} to {} ({} applied)",
        summary.from_version,
        summary.to_version,
        summary.applied.len()
    );
}

#[cfg(test)]
#[path = "migrate_test.rs"]
mod tests;
