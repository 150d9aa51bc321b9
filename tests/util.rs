#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::path::Path;

use civic_profile_lib::config::EngineConfig;
use civic_profile_lib::{db, migrate};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

pub const NAMES: [&str; 5] = ["Budi", "Siti", "Agus", "Dewi", "Rina"];
pub const DISTRICTS: [&str; 3] = ["north", "south", "east"];

pub async fn temp_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:")
}

pub async fn migrated_pool() -> SqlitePool {
    let pool = temp_pool().await;
    migrate::apply_migrations(&pool).await.unwrap();
    pool
}

/// File-backed pool with several connections, for tests that need real
/// concurrent sessions.
pub async fn file_pool(path: &Path) -> SqlitePool {
    let config = EngineConfig {
        db_path: path.to_path_buf(),
        ..EngineConfig::default()
    };
    let pool = db::open_sqlite_pool(&config).await.unwrap();
    migrate::apply_migrations(&pool).await.unwrap();
    pool
}

pub fn household_id(i: u32) -> String {
    format!("hh-{i:04}")
}

/// Inserts one household with deterministic values derived from `i`.
pub async fn insert_household(pool: &SqlitePool, i: u32) {
    let tags = if i % 4 == 0 {
        Some(r#"["elderly","disability"]"#)
    } else {
        None
    };
    sqlx::query(
        "INSERT INTO households (id, head_name, address, district_code, family_card_no, \
         members_count, monthly_income, registered_on, is_low_income, tags_json, phone, \
         created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(household_id(i))
    .bind(NAMES[(i % 5) as usize])
    .bind(format!("Jl. Melati No. {i}"))
    .bind(DISTRICTS[(i % 3) as usize])
    .bind(format!("3201{i:012}"))
    .bind(i64::from(i % 7 + 1))
    .bind(f64::from(i) * 250.0)
    .bind(format!("2020-01-{:02}", i % 28 + 1))
    .bind(i64::from(i % 2))
    .bind(tags)
    .bind(Option::<String>::None)
    .bind(1_000_i64)
    .bind(1_000_i64)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn seed_households(pool: &SqlitePool, count: u32) {
    for i in 1..=count {
        insert_household(pool, i).await;
    }
}

/// Creates the pre-migration table with its own column names.
pub async fn create_legacy_table(pool: &SqlitePool) {
    sqlx::query(
        "CREATE TABLE households_v1 (
            hh_id TEXT PRIMARY KEY,
            head TEXT NOT NULL,
            addr TEXT,
            district TEXT,
            card_no TEXT,
            members INTEGER,
            income REAL,
            registered TEXT,
            low_income INTEGER,
            phone TEXT,
            created INTEGER,
            modified INTEGER
        )",
    )
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_legacy_household(pool: &SqlitePool, id: &str, head: &str, district: &str, members: i64) {
    sqlx::query(
        "INSERT INTO households_v1 (hh_id, head, addr, district, card_no, members, income, \
         registered, low_income, phone, created, modified) \
         VALUES (?, ?, 'Jl. Lama', ?, NULL, ?, NULL, '2015-06-01', 1, NULL, 10, 20)",
    )
    .bind(id)
    .bind(head)
    .bind(district)
    .bind(members)
    .execute(pool)
    .await
    .unwrap();
}
