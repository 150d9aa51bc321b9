use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::ids::CanonicalId;
use crate::schema::EntitySchema;
use crate::store::{Statement, Storage, StorageError};
use crate::time::now_ms;

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: &'static str,
    pub value: Value,
}

/// Ordered column assignments; the last one is always the timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePlan {
    pub assignments: Vec<Assignment>,
}

impl UpdatePlan {
    /// True when no caller field survived the allowlist.
    pub fn is_noop(&self) -> bool {
        self.assignments.len() <= 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub id: CanonicalId,
    pub success: bool,
}

/// Turns a sparse field map into assignments for updatable fields only.
///
/// Keys outside the allowlist are dropped without error. `null` clears a
/// nullable field and is rejected for any other.
pub fn compile(entity: &EntitySchema, sparse: &Map<String, Value>) -> EngineResult<UpdatePlan> {
    let mut assignments = Vec::with_capacity(sparse.len() + 1);
    let mut dropped = 0usize;

    for (key, value) in sparse {
        let Some(field) = entity.updatable(key) else {
            dropped += 1;
            continue;
        };
        assignments.push(Assignment {
            column: field.column,
            value: field.to_storage(value)?,
        });
    }

    if dropped > 0 {
        debug!(
            target: "civic_profile",
            event = "update_keys_dropped",
            entity = entity.entity,
            dropped
        );
    }

    assignments.push(Assignment {
        column: entity.updated_at_column,
        value: Value::from(now_ms()),
    });
    Ok(UpdatePlan { assignments })
}

/// Applies `plan` to the record `id` in the current-schema table.
pub async fn apply(
    storage: &dyn Storage,
    entity: &EntitySchema,
    id: &CanonicalId,
    plan: &UpdatePlan,
) -> EngineResult<UpdateOutcome> {
    let id_column = entity.id_column();
    let formatted = id.formatted();

    let exists = Statement::new(
        format!(
            "SELECT {id_column} FROM {} WHERE {id_column} = ? LIMIT 1",
            entity.table
        ),
        vec![Value::String(formatted.clone())],
    );
    match storage.fetch_all(&exists).await {
        Ok(rows) if rows.is_empty() => {
            return Err(EngineError::NotFound { id: formatted });
        }
        Ok(_) => {}
        Err(err) => {
            error!(
                target: "civic_profile",
                event = "update_failed",
                entity = entity.entity,
                stage = "existence_check",
                error = %err
            );
            return Err(EngineError::UpdateFailure);
        }
    }

    if plan.is_noop() {
        debug!(
            target: "civic_profile",
            event = "update_noop",
            entity = entity.entity
        );
        return Ok(UpdateOutcome {
            id: id.clone(),
            success: true,
        });
    }

    let set_clause = plan
        .assignments
        .iter()
        .map(|a| format!("{} = ?", a.column))
        .collect::<Vec<_>>()
        .join(", ");
    let mut params: Vec<Value> = plan.assignments.iter().map(|a| a.value.clone()).collect();
    params.push(Value::String(formatted));
    let statement = Statement::new(
        format!(
            "UPDATE {} SET {set_clause} WHERE {id_column} = ?",
            entity.table
        ),
        params,
    );

    match storage.execute(&statement).await {
        Ok(0) => {
            warn!(
                target: "civic_profile",
                event = "update_target_vanished",
                entity = entity.entity
            );
            Err(EngineError::NotFound { id: id.formatted() })
        }
        Ok(affected) => {
            info!(
                target: "civic_profile",
                event = "record_updated",
                entity = entity.entity,
                columns = plan.assignments.len(),
                affected
            );
            Ok(UpdateOutcome {
                id: id.clone(),
                success: true,
            })
        }
        Err(StorageError::UniqueViolation(message)) => {
            let column = conflicting_field(entity, &message);
            warn!(
                target: "civic_profile",
                event = "update_conflict",
                entity = entity.entity,
                field = column.as_deref().unwrap_or("unknown")
            );
            Err(EngineError::Conflict { column })
        }
        Err(err) => {
            error!(
                target: "civic_profile",
                event = "update_failed",
                entity = entity.entity,
                stage = "update",
                sql = %statement.sql,
                error = %err
            );
            Err(EngineError::UpdateFailure)
        }
    }
}

/// Public field name from a SQLite `UNIQUE constraint failed: table.col`
/// message.
fn conflicting_field(entity: &EntitySchema, message: &str) -> Option<String> {
    let (_, columns) = message.split_once("failed:")?;
    let first = columns.split(',').next()?.trim();
    let column = first.rsplit('.').next()?;
    entity
        .fields
        .iter()
        .find(|f| f.column == column)
        .map(|f| f.name.to_string())
}
