use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::schema::{EntitySchema, FieldDef, FieldKind};

/// One constraint on one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Equals(Value),
    Range {
        #[serde(default)]
        min: Option<Value>,
        #[serde(default)]
        max: Option<Value>,
    },
    /// Membership in a set of values.
    In(Vec<Value>),
    /// Case-insensitive substring match; wildcard characters match literally.
    Contains(String),
}

/// Sparse filter: field name to an optional criterion, plus an optional
/// free-text search across the entity's searchable fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSpec {
    pub criteria: BTreeMap<String, Option<Criterion>>,
    pub search: Option<String>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, criterion: Criterion) -> Self {
        self.criteria.insert(field.into(), Some(criterion));
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }
}

/// A boolean SQL condition and the values bound to its placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Predicate {
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// ` WHERE <predicate>`, or nothing when unconstrained.
    pub fn where_clause(&self) -> String {
        if self.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.sql)
        }
    }
}

/// Compiles `spec` against the field table of `entity`.
///
/// Clauses follow field-name order with the search group last, so equal
/// specs always produce equal SQL text and parameter order.
pub fn compile(entity: &EntitySchema, spec: &FilterSpec) -> EngineResult<Predicate> {
    let mut clauses = Vec::new();
    let mut params = Vec::new();

    for (name, criterion) in &spec.criteria {
        let Some(criterion) = criterion else {
            continue;
        };
        let field = entity.field(name).ok_or_else(|| {
            EngineError::validation(name.as_str(), format!("Unknown filter field '{name}'."))
        })?;
        if let Some(clause) = compile_criterion(entity, field, criterion, &mut params)? {
            clauses.push(clause);
        }
    }

    if let Some(text) = spec.search.as_deref() {
        if !text.trim().is_empty() {
            let pattern = contains_pattern(text);
            let group: Vec<String> = entity
                .searchable()
                .map(|field| {
                    params.push(Value::String(pattern.clone()));
                    contains_clause(field.column)
                })
                .collect();
            if !group.is_empty() {
                clauses.push(format!("({})", group.join(" OR ")));
            }
        }
    }

    Ok(Predicate {
        sql: clauses.join(" AND "),
        params,
    })
}

fn compile_criterion(
    entity: &EntitySchema,
    field: &FieldDef,
    criterion: &Criterion,
    params: &mut Vec<Value>,
) -> EngineResult<Option<String>> {
    let column = field.column;
    let bind = |value: &Value| bound_value(entity, field, value);
    match criterion {
        Criterion::Equals(Value::Null) => Ok(Some(format!("{column} IS NULL"))),
        Criterion::Equals(value) => {
            params.push(bind(value)?);
            Ok(Some(format!("{column} = ?")))
        }
        Criterion::Range { min, max } => {
            if matches!(field.kind, FieldKind::Bool | FieldKind::TextList) {
                return Err(unsupported(field, "range"));
            }
            let mut bounds = Vec::with_capacity(2);
            if let Some(min) = min {
                params.push(bind(min)?);
                bounds.push(format!("{column} >= ?"));
            }
            if let Some(max) = max {
                params.push(bind(max)?);
                bounds.push(format!("{column} <= ?"));
            }
            if bounds.is_empty() {
                Ok(None)
            } else {
                Ok(Some(bounds.join(" AND ")))
            }
        }
        Criterion::In(values) => {
            if field.kind == FieldKind::TextList {
                return Err(unsupported(field, "membership"));
            }
            if values.is_empty() {
                return Ok(None);
            }
            for value in values {
                if value.is_null() {
                    return Err(EngineError::validation(
                        field.name,
                        format!("Membership values for '{}' cannot be null.", field.name),
                    ));
                }
                params.push(bind(value)?);
            }
            let placeholders = vec!["?"; values.len()].join(", ");
            Ok(Some(format!("{column} IN ({placeholders})")))
        }
        Criterion::Contains(text) => {
            if !matches!(field.kind, FieldKind::Text | FieldKind::TextList) {
                return Err(unsupported(field, "substring"));
            }
            if text.trim().is_empty() {
                return Ok(None);
            }
            params.push(Value::String(contains_pattern(text)));
            if field.kind == FieldKind::TextList {
                Ok(Some(format!(
                    "EXISTS (SELECT 1 FROM json_each({column}) WHERE {})",
                    contains_clause("value")
                )))
            } else {
                Ok(Some(contains_clause(column)))
            }
        }
    }
}

/// Storage form of a criterion value. Identifier values are normalized
/// first so every accepted spelling binds the stored form.
fn bound_value(entity: &EntitySchema, field: &FieldDef, value: &Value) -> EngineResult<Value> {
    match value {
        Value::String(raw) if field.name == entity.id_field => {
            let id = entity.id_scheme.normalize(raw)?;
            Ok(Value::String(id.formatted()))
        }
        other => field.to_storage(other),
    }
}

fn unsupported(field: &FieldDef, operator: &str) -> EngineError {
    EngineError::validation(
        field.name,
        format!("Field '{}' does not support {operator} filters.", field.name),
    )
}

fn contains_clause(column: &str) -> String {
    format!("LOWER({column}) LIKE ? ESCAPE '\\'")
}

/// `%text%` with LIKE wildcards and the escape character escaped.
///
/// Folds ASCII only, matching SQLite's `LOWER`.
fn contains_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.to_ascii_lowercase().chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
