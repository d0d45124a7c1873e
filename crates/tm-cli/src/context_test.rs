use super::*;
use std::fs;
use tempfile::tempdir;

fn global_for(dir: &Path) -> GlobalArgs {
    GlobalArgs {
        verbose: false,
        project_dir: dir.to_path_buf(),
        config: None,
        database_url: None,
        table: None,
    }
}

#[test]
fn test_defaults_without_config_file() {
    let temp_dir = tempdir().unwrap();
    let ctx = RuntimeContext::new(&global_for(temp_dir.path())).unwrap();

    assert_eq!(ctx.config.table, "schema_migrations");
    assert_eq!(ctx.config.database.db_type, DbType::DuckDb);
    assert_eq!(ctx.migrations_path(), temp_dir.path().join("migrations"));
}

#[test]
fn test_overrides_apply_over_config_file() {
    let temp_dir = tempdir().unwrap();
    fs::write(
        temp_dir.path().join("tidemark.yml"),
        "migrations_dir: sql\ntable: from_file\n",
    )
    .unwrap();

    let mut global = global_for(temp_dir.path());
    global.table = Some("ops.from_flag".to_string());
    global.database_url = Some("postgres://localhost/app".to_string());

    let ctx = RuntimeContext::new(&global).unwrap();
    assert_eq!(ctx.config.table, "ops.from_flag");
    assert_eq!(ctx.config.database.db_type, DbType::Postgres);
    assert_eq!(ctx.config.database.url, "postgres://localhost/app");
    assert_eq!(ctx.migrations_path(), temp_dir.path().join("sql"));
}

#[test]
fn test_explicit_config_path() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("custom.yml");
    fs::write(&config_path, "table: custom_table\n").unwrap();

    let mut global = global_for(temp_dir.path());
    global.config = Some(config_path);

    let ctx = RuntimeContext::new(&global).unwrap();
    assert_eq!(ctx.config.table, "custom_table");
}

#[test]
fn test_missing_explicit_config_fails() {
    let temp_dir = tempdir().unwrap();
    let mut global = global_for(temp_dir.path());
    global.config = Some(temp_dir.path().join("absent.yml"));

    assert!(RuntimeContext::new(&global).is_err());
}

#[test]
fn test_invalid_table_flag_fails() {
    let temp_dir = tempdir().unwrap();
    let mut global = global_for(temp_dir.path());
    global.table = Some("drop table; --".to_string());

    let err = RuntimeContext::new(&global).err().unwrap();
    assert!(err.to_string().contains("--table"));
}

#[test]
fn test_db_type_for_url() {
    assert_eq!(db_type_for_url("postgres://u@h/db"), DbType::Postgres);
    assert_eq!(db_type_for_url("postgresql://u@h/db"), DbType::Postgres);
    assert_eq!(db_type_for_url("./local.duckdb"), DbType::DuckDb);
    assert_eq!(db_type_for_url(":memory:"), DbType::DuckDb);
}

#[test]
fn test_duckdb_path_relative_to_project() {
    let temp_dir = tempdir().unwrap();
    let ctx = RuntimeContext::new(&global_for(temp_dir.path())).unwrap();

    assert_eq!(ctx.duckdb_path(":memory:"), ":memory:");
    assert_eq!(
        ctx.duckdb_path("app.duckdb"),
        temp_dir.path().join("app.duckdb").display().to_string()
    );
}

#[tokio::test]
async fn test_open_duckdb_database() {
    let temp_dir = tempdir().unwrap();
    let mut global = global_for(temp_dir.path());
    global.database_url = Some("state.duckdb".to_string());

    let ctx = RuntimeContext::new(&global).unwrap();
    let db = ctx.open_database().await.unwrap();
    assert_eq!(db.db_type(), "duckdb");
    assert!(temp_dir.path().join("state.duckdb").exists());
}
