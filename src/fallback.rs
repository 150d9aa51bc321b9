//! Primary → legacy source resolution.
//!
//! A query is described by a builder that renders one statement for a given
//! table expression. The resolver runs it against the current-schema table
//! and, only when that table cannot answer, against the legacy table. The
//! rows of exactly one source are returned.

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::{EngineError, EngineResult};
use crate::schema::EntitySchema;
use crate::store::{RowMap, Statement, Storage, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Primary,
    Legacy,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Primary => "primary",
            SourceKind::Legacy => "legacy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Consult the legacy source only when the primary schema is missing.
    OnSchemaError,
    /// Also consult it when the primary answers with no rows, for lookups
    /// where absence may just mean the record was never migrated.
    OnSchemaErrorOrEmpty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub source: SourceKind,
    pub rows: Vec<RowMap>,
}

enum Attempt {
    Rows(Vec<RowMap>),
    SchemaMissing(StorageError),
    Failed(StorageError),
}

async fn attempt(storage: &dyn Storage, statement: &Statement) -> Attempt {
    match storage.fetch_all(statement).await {
        Ok(rows) => Attempt::Rows(rows),
        Err(err) if err.is_schema() => Attempt::SchemaMissing(err),
        Err(err) => Attempt::Failed(err),
    }
}

fn source_expr(entity: &EntitySchema, source: SourceKind) -> Option<String> {
    match source {
        SourceKind::Primary => Some(entity.primary_source()),
        SourceKind::Legacy => entity.legacy_source(),
    }
}

/// Runs the query built by `build` against the primary source, falling
/// back to the legacy source as `policy` allows.
pub async fn resolve<F>(
    storage: &dyn Storage,
    entity: &EntitySchema,
    build: &F,
    policy: FallbackPolicy,
) -> EngineResult<Resolved>
where
    F: Fn(&str) -> Statement + Sync,
{
    let primary = build(&entity.primary_source());
    let primary_error = match attempt(storage, &primary).await {
        Attempt::Rows(rows) => {
            if !(rows.is_empty() && policy == FallbackPolicy::OnSchemaErrorOrEmpty) {
                return Ok(Resolved {
                    source: SourceKind::Primary,
                    rows,
                });
            }
            return Ok(try_legacy_after_empty(storage, entity, build).await);
        }
        Attempt::SchemaMissing(err) => {
            warn!(
                target: "civic_profile",
                event = "primary_source_missing",
                entity = entity.entity,
                sql = %primary.sql,
                error = %err
            );
            err
        }
        Attempt::Failed(err) => {
            error!(
                target: "civic_profile",
                event = "retrieval_failed",
                entity = entity.entity,
                source = SourceKind::Primary.as_str(),
                sql = %primary.sql,
                error = %err
            );
            return Err(EngineError::RetrievalFailure);
        }
    };

    let Some(legacy_source) = entity.legacy_source() else {
        error!(
            target: "civic_profile",
            event = "retrieval_failed",
            entity = entity.entity,
            source = SourceKind::Primary.as_str(),
            sql = %primary.sql,
            error = %primary_error,
            "no legacy source declared"
        );
        return Err(EngineError::RetrievalFailure);
    };

    let legacy = build(&legacy_source);
    match attempt(storage, &legacy).await {
        Attempt::Rows(rows) => {
            debug!(
                target: "civic_profile",
                event = "legacy_source_answered",
                entity = entity.entity,
                rows = rows.len()
            );
            Ok(Resolved {
                source: SourceKind::Legacy,
                rows,
            })
        }
        Attempt::SchemaMissing(legacy_error) | Attempt::Failed(legacy_error) => {
            error!(
                target: "civic_profile",
                event = "retrieval_failed_all_sources",
                entity = entity.entity,
                primary_sql = %primary.sql,
                primary_error = %primary_error,
                legacy_sql = %legacy.sql,
                legacy_error = %legacy_error
            );
            Err(EngineError::RetrievalFailure)
        }
    }
}

async fn try_legacy_after_empty<F>(
    storage: &dyn Storage,
    entity: &EntitySchema,
    build: &F,
) -> Resolved
where
    F: Fn(&str) -> Statement + Sync,
{
    let empty = Resolved {
        source: SourceKind::Primary,
        rows: Vec::new(),
    };
    let Some(legacy_source) = entity.legacy_source() else {
        return empty;
    };
    let legacy = build(&legacy_source);
    match attempt(storage, &legacy).await {
        Attempt::Rows(rows) if !rows.is_empty() => Resolved {
            source: SourceKind::Legacy,
            rows,
        },
        Attempt::Rows(_) => empty,
        // The primary answered; a legacy table that is gone or failing does
        // not turn that answer into an error.
        Attempt::SchemaMissing(err) | Attempt::Failed(err) => {
            debug!(
                target: "civic_profile",
                event = "legacy_source_unavailable",
                entity = entity.entity,
                error = %err
            );
            empty
        }
    }
}

/// Runs a query against one named source without any fallback.
pub async fn resolve_on<F>(
    storage: &dyn Storage,
    entity: &EntitySchema,
    source: SourceKind,
    build: &F,
) -> EngineResult<Vec<RowMap>>
where
    F: Fn(&str) -> Statement + Sync,
{
    let Some(expr) = source_expr(entity, source) else {
        return Err(EngineError::RetrievalFailure);
    };
    let statement = build(&expr);
    storage.fetch_all(&statement).await.map_err(|err| {
        error!(
            target: "civic_profile",
            event = "retrieval_failed",
            entity = entity.entity,
            source = source.as_str(),
            sql = %statement.sql,
            error = %err
        );
        EngineError::RetrievalFailure
    })
}
