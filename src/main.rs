use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::SqlitePool;

use civic_profile_lib::commands::{self, LookupRequest, QueryRequest, UpdateRequest};
use civic_profile_lib::config::EngineConfig;
use civic_profile_lib::{
    db, migrate, AppError, Criterion, SortDirection, SortSpec, SqliteStorage, HOUSEHOLDS,
};

#[derive(Debug, Parser)]
#[command(name = "civic_profile", about = "Household register record access", version)]
struct Cli {
    /// SQLite database file; overrides CIVIC_PROFILE_DB.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Query and edit household records.
    #[command(subcommand)]
    Households(HouseholdsCommand),
    /// Database maintenance commands.
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Debug, Subcommand)]
enum HouseholdsCommand {
    /// List one page of households matching the given filters.
    List {
        /// Filter criteria as a JSON object, e.g. '{"district":{"equals":"north"}}'.
        #[arg(long)]
        filters: Option<String>,
        /// Free-text search across name, address and family card number.
        #[arg(long)]
        search: Option<String>,
        /// Restrict results to one district.
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        sort: Option<String>,
        /// Sort descending instead of ascending.
        #[arg(long)]
        desc: bool,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
        /// 1-based page number; ignored when --offset is given.
        #[arg(long)]
        page: Option<i64>,
    },
    /// Print one household by id.
    Get { id: String },
    /// Apply a sparse update to one household.
    Update {
        id: String,
        /// Fields to change as a JSON object; null clears a field.
        #[arg(long)]
        fields: String,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Create the current-schema tables if they are missing.
    Migrate,
}

fn main() {
    civic_profile_lib::init_logging();

    let cli = Cli::parse();
    match handle_cli(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            let app_error = AppError::from(err);
            match serde_json::to_string(&app_error) {
                Ok(json) => eprintln!("{json}"),
                Err(_) => eprintln!("Error: {app_error}"),
            }
            process::exit(1);
        }
    }
}

fn handle_cli(cli: Cli) -> Result<i32> {
    let mut config = EngineConfig::from_env().context("read configuration")?;
    if let Some(path) = cli.db {
        config.db_path = path;
    }

    let runtime = tokio::runtime::Runtime::new().context("start async runtime")?;
    runtime.block_on(async {
        let pool = db::open_sqlite_pool(&config)
            .await
            .context("open database")?;
        let result = match cli.command {
            Commands::Households(command) => handle_households(&pool, &config, command).await,
            Commands::Db(DbCommand::Migrate) => handle_migrate(&pool).await,
        };
        pool.close().await;
        result
    })
}

async fn handle_migrate(pool: &SqlitePool) -> Result<i32> {
    migrate::apply_migrations(pool)
        .await
        .context("apply migrations")?;
    println!("Migrations applied.");
    Ok(0)
}

async fn handle_households(
    pool: &SqlitePool,
    config: &EngineConfig,
    command: HouseholdsCommand,
) -> Result<i32> {
    let storage = SqliteStorage::new(pool.clone());
    match command {
        HouseholdsCommand::List {
            filters,
            search,
            scope,
            sort,
            desc,
            limit,
            offset,
            page,
        } => {
            let filters: BTreeMap<String, Option<Criterion>> = match filters {
                Some(raw) => serde_json::from_str(&raw)
                    .map_err(AppError::from)
                    .context("parse --filters")?,
                None => Default::default(),
            };
            let direction = if desc {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            };
            let request = QueryRequest {
                filters,
                sort: sort.map(|key| SortSpec::new(key, direction)),
                limit,
                offset,
                page,
                search,
                scope,
            };
            let response =
                commands::query_command(&storage, &HOUSEHOLDS, &config.page_limits, request)
                    .await?;
            print_json(&response)?;
        }
        HouseholdsCommand::Get { id } => {
            let record = commands::lookup_command(&storage, &HOUSEHOLDS, LookupRequest { id }).await?;
            print_json(&record)?;
        }
        HouseholdsCommand::Update { id, fields } => {
            let fields: Map<String, Value> = serde_json::from_str(&fields)
                .map_err(AppError::from)
                .context("parse --fields")?;
            let response =
                commands::update_command(&storage, &HOUSEHOLDS, UpdateRequest { id, fields })
                    .await?;
            print_json(&response)?;
        }
    }
    Ok(0)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{serialized}");
    Ok(())
}
