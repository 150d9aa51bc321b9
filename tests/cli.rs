use std::path::Path;

use anyhow::Result;
use assert_cmd::Command;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::tempdir;
#[path = "util.rs"]
mod util;

fn cli(db: &Path) -> Command {
    let mut cmd = Command::cargo_bin("civic_profile").unwrap();
    cmd.env("RUST_LOG", "off")
        .env_remove("CIVIC_PROFILE_DB")
        .arg("--db")
        .arg(db);
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

async fn seed(db: &Path, count: u32) -> Result<()> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(SqliteConnectOptions::new().filename(db))
        .await?;
    util::seed_households(&pool, count).await;
    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn migrate_list_get_update_roundtrip() -> Result<()> {
    let dir = tempdir()?;
    let db = dir.path().join("data").join("register.sqlite3");

    let output = cli(&db).args(["db", "migrate"]).output()?;
    assert!(output.status.success(), "{output:?}");
    assert!(String::from_utf8_lossy(&output.stdout).contains("Migrations applied."));
    assert!(db.exists());

    seed(&db, 6).await?;

    let output = cli(&db)
        .args([
            "households",
            "list",
            "--filters",
            r#"{"district":{"equals":"north"}}"#,
            "--sort",
            "id",
            "--desc",
        ])
        .output()?;
    assert!(output.status.success(), "{output:?}");
    let listing = stdout_json(&output);
    assert_eq!(listing["total"], 2);
    assert_eq!(listing["records"][0]["id"], "hh-0006");
    assert_eq!(listing["records"][1]["id"], "hh-0003");

    let output = cli(&db).args(["households", "get", " HH-0003"]).output()?;
    assert!(output.status.success(), "{output:?}");
    assert_eq!(stdout_json(&output)["name"], "Dewi");

    let output = cli(&db)
        .args([
            "households",
            "update",
            "hh-0003",
            "--fields",
            r#"{"phone":"0813-555","is_admin":true}"#,
        ])
        .output()?;
    assert!(output.status.success(), "{output:?}");
    let updated = stdout_json(&output);
    assert_eq!(updated["id"], "hh-0003");
    assert_eq!(updated["success"], true);

    let output = cli(&db).args(["households", "get", "hh-0003"]).output()?;
    assert_eq!(stdout_json(&output)["phone"], "0813-555");
    Ok(())
}

#[tokio::test]
async fn engine_errors_exit_nonzero_with_a_structured_message() -> Result<()> {
    let dir = tempdir()?;
    let db = dir.path().join("register.sqlite3");
    cli(&db).args(["db", "migrate"]).assert().success();

    let output = cli(&db).args(["households", "get", "hh-0999"]).output()?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("RECORD/NOT_FOUND"), "{stderr}");
    assert!(stderr.contains("Record not found."), "{stderr}");

    let output = cli(&db)
        .args(["households", "list", "--filters", r#"{"secret":{"equals":1}}"#])
        .output()?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("VALIDATION/INVALID_INPUT"), "{stderr}");
    Ok(())
}

#[tokio::test]
async fn database_path_can_come_from_the_environment() -> Result<()> {
    let dir = tempdir()?;
    let db = dir.path().join("env.sqlite3");

    Command::cargo_bin("civic_profile")?
        .env("RUST_LOG", "off")
        .env("CIVIC_PROFILE_DB", &db)
        .args(["db", "migrate"])
        .assert()
        .success();
    assert!(db.exists());

    Command::cargo_bin("civic_profile")?
        .env("RUST_LOG", "off")
        .env("CIVIC_PROFILE_DB", &db)
        .env("CIVIC_PROFILE_MAX_PAGE_SIZE", "0")
        .args(["households", "list"])
        .assert()
        .failure();
    Ok(())
}
