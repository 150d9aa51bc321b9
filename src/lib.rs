//! Filtered-query and partial-update engine for the household register.
//!
//! Callers describe what they want with a sparse [`FilterSpec`], an
//! optional [`SortSpec`] and a [`PageSpec`]; the engine compiles those into
//! parameterized SQL over a per-entity field table ([`EntitySchema`]) and
//! falls back to the legacy table when the current one cannot answer.

pub mod commands;
pub mod config;
pub mod db;
mod error;
pub mod fallback;
pub mod filter;
pub mod household;
pub mod ids;
pub mod logging;
pub mod migrate;
pub mod query;
pub mod schema;
pub mod store;
pub mod time;
pub mod update;

pub use error::{
    AppError, AppResult, EngineError, EngineResult, QUERY_RETRIEVAL_FAILED, RECORD_CONFLICT,
    RECORD_NOT_FOUND, UPDATE_FAILED, VALIDATION_INVALID_INPUT,
};
pub use filter::{Criterion, FilterSpec};
pub use household::{Household, HOUSEHOLDS};
pub use ids::{CanonicalId, IdScheme};
pub use logging::init_logging;
pub use query::{Page, PageLimits, PageSpec, SortDirection, SortSpec};
pub use schema::EntitySchema;
pub use store::{SqliteStorage, Storage};
