//! Per-entity field tables.
//!
//! Each entity declares its fields once. Filter, sort and update allowlists
//! are all read from that one table, and every column name that reaches SQL
//! comes from a `&'static str` in it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{EngineError, EngineResult};
use crate::ids::IdScheme;
use crate::time::parse_iso_date;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Real,
    /// ISO `YYYY-MM-DD` text.
    Date,
    /// Stored as 0/1.
    Bool,
    /// Stored as JSON array text.
    TextList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Public name used by callers in filters, sorts and updates.
    pub name: &'static str,
    /// Column in the current-schema table.
    pub column: &'static str,
    /// Column in the legacy table; `None` projects as NULL.
    pub legacy_column: Option<&'static str>,
    pub kind: FieldKind,
    pub nullable: bool,
    pub sortable: bool,
    pub updatable: bool,
    pub searchable: bool,
}

impl FieldDef {
    pub const fn new(name: &'static str, column: &'static str, kind: FieldKind) -> Self {
        FieldDef {
            name,
            column,
            legacy_column: None,
            kind,
            nullable: false,
            sortable: false,
            updatable: false,
            searchable: false,
        }
    }

    pub const fn legacy(mut self, column: &'static str) -> Self {
        self.legacy_column = Some(column);
        self
    }

    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub const fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    pub const fn updatable(mut self) -> Self {
        self.updatable = true;
        self
    }

    pub const fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    /// Converts a caller value into the form stored in this column.
    ///
    /// `null` is accepted only for nullable fields and is returned as-is.
    pub fn to_storage(&self, value: &Value) -> EngineResult<Value> {
        if value.is_null() {
            return if self.nullable {
                Ok(Value::Null)
            } else {
                Err(EngineError::validation(
                    self.name,
                    format!("Field '{}' cannot be empty.", self.name),
                ))
            };
        }

        let mismatch = |expected: &str| {
            EngineError::validation(
                self.name,
                format!("Field '{}' expects {expected}.", self.name),
            )
        };

        match self.kind {
            FieldKind::Text => value
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(|| mismatch("text")),
            FieldKind::Integer => value
                .as_i64()
                .map(Value::from)
                .ok_or_else(|| mismatch("a whole number")),
            FieldKind::Real => value
                .as_f64()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| mismatch("a number")),
            FieldKind::Date => value
                .as_str()
                .and_then(parse_iso_date)
                .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
                .ok_or_else(|| mismatch("a YYYY-MM-DD date")),
            FieldKind::Bool => value
                .as_bool()
                .map(|b| Value::from(i64::from(b)))
                .ok_or_else(|| mismatch("true or false")),
            FieldKind::TextList => {
                let items = value.as_array().ok_or_else(|| mismatch("a list of text"))?;
                if !items.iter().all(Value::is_string) {
                    return Err(mismatch("a list of text"));
                }
                serde_json::to_string(items)
                    .map(Value::String)
                    .map_err(|_| mismatch("a list of text"))
            }
        }
    }

    /// Converts a stored column value into the shape callers see.
    pub fn from_storage(&self, value: Value) -> Value {
        match (self.kind, value) {
            (_, Value::Null) => Value::Null,
            (FieldKind::Bool, Value::Number(n)) => Value::Bool(n.as_i64().unwrap_or(0) != 0),
            (FieldKind::Bool, Value::String(s)) => {
                Value::Bool(matches!(s.trim(), "1" | "true" | "TRUE" | "yes"))
            }
            (FieldKind::Real, Value::Number(n)) => n
                .as_f64()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            (FieldKind::TextList, Value::String(s)) => match serde_json::from_str::<Value>(&s) {
                Ok(list @ Value::Array(_)) => list,
                _ => {
                    tracing::warn!(
                        target: "civic_profile",
                        event = "stored_list_undecodable",
                        field = self.name
                    );
                    Value::Null
                }
            },
            (_, other) => other,
        }
    }
}

#[derive(Debug)]
pub struct EntitySchema {
    pub entity: &'static str,
    pub table: &'static str,
    pub legacy_table: Option<&'static str>,
    /// Public name of the identifier field.
    pub id_field: &'static str,
    pub id_scheme: IdScheme,
    /// Column refreshed on every update.
    pub updated_at_column: &'static str,
    /// Optional tenant/scope field used to narrow queries.
    pub scope_field: Option<&'static str>,
    pub default_sort: (&'static str, SortDirection),
    pub fields: &'static [FieldDef],
}

impl EntitySchema {
    pub fn field(&self, name: &str) -> Option<&'static FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn sortable(&self, name: &str) -> Option<&'static FieldDef> {
        self.field(name).filter(|f| f.sortable)
    }

    pub fn updatable(&self, name: &str) -> Option<&'static FieldDef> {
        self.field(name).filter(|f| f.updatable)
    }

    pub fn searchable(&self) -> impl Iterator<Item = &'static FieldDef> {
        self.fields.iter().filter(|f| f.searchable)
    }

    pub fn id_column(&self) -> &'static str {
        self.field(self.id_field)
            .map(|f| f.column)
            .unwrap_or(self.id_field)
    }

    /// Comma separated current-schema columns, in declaration order.
    pub fn select_list(&self) -> String {
        self.fields
            .iter()
            .map(|f| f.column)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Table expression for the current-schema source.
    pub fn primary_source(&self) -> String {
        self.table.to_string()
    }

    /// Table expression for the legacy source, projecting legacy columns
    /// under their current-schema names so one compiled predicate applies
    /// to either source.
    pub fn legacy_source(&self) -> Option<String> {
        let table = self.legacy_table?;
        let projection = self
            .fields
            .iter()
            .map(|f| match f.legacy_column {
                Some(legacy) => format!("{legacy} AS {}", f.column),
                None => format!("NULL AS {}", f.column),
            })
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!("(SELECT {projection} FROM {table}) AS legacy"))
    }

    /// Maps a storage row keyed by column into a record keyed by public name.
    pub fn decode_row(&self, mut row: Map<String, Value>) -> Map<String, Value> {
        let mut record = Map::with_capacity(self.fields.len());
        for field in self.fields {
            let raw = row.remove(field.column).unwrap_or(Value::Null);
            record.insert(field.name.to_string(), field.from_storage(raw));
        }
        record
    }
}
