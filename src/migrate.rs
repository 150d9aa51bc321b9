use futures::FutureExt;
use sqlx::SqlitePool;
use tracing::{error, info};

use crate::db::run_in_tx;

fn preview(sql: &str) -> String {
    let one_line = sql.replace(['\n', '\t'], " ");
    let trimmed = one_line.trim();
    if trimmed.chars().count() > 160 {
        format!("{}…", trimmed.chars().take(160).collect::<String>())
    } else {
        trimmed.to_string()
    }
}

/// Current-schema tables, applied in order. Every statement is idempotent.
static MIGRATIONS: &[(&str, &str)] = &[(
    "0001_households.sql",
    include_str!("../migrations/0001_households.sql"),
)];

fn statements(raw_sql: &str) -> Vec<String> {
    let cleaned = raw_sql
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.is_empty() || t.starts_with("--"))
        })
        .collect::<Vec<_>>()
        .join("\n");
    cleaned
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Creates the current-schema tables if they are missing.
///
/// Legacy tables are never created here; they only exist in databases that
/// predate the current schema.
pub async fn apply_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    for (filename, raw_sql) in MIGRATIONS {
        let stmts = statements(raw_sql);
        let file = *filename;
        run_in_tx(pool, move |tx| {
            async move {
                for s in &stmts {
                    info!(target: "civic_profile", event = "migration_stmt", file = %file, sql = %preview(s));
                    if let Err(e) = sqlx::query(s).execute(&mut **tx).await {
                        error!(
                            target: "civic_profile",
                            event = "migration_stmt_error",
                            file = %file,
                            sql = %preview(s),
                            error = %e
                        );
                        return Err(e);
                    }
                }
                Ok::<_, sqlx::Error>(())
            }
            .boxed()
        })
        .await?;
        info!(target: "civic_profile", event = "migration_file_applied", file = %filename);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[test]
    fn splits_statements_and_drops_comments() {
        let stmts = statements("-- header\nCREATE TABLE a (x);\n\n  -- note\nCREATE INDEX i ON a(x);\n");
        assert_eq!(stmts, vec!["CREATE TABLE a (x)", "CREATE INDEX i ON a(x)"]);
    }

    #[test]
    fn preview_truncates_long_sql() {
        let long = "SELECT ".repeat(60);
        assert!(preview(&long).ends_with('…'));
        assert_eq!(preview("SELECT 1\n\tFROM t"), "SELECT 1  FROM t");
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        apply_migrations(&pool).await.unwrap();
        apply_migrations(&pool).await.unwrap();

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'households'")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(tables.len(), 1);
    }
}
