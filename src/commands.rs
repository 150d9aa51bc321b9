use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult, EngineError};
use crate::filter::{Criterion, FilterSpec};
use crate::query::{self, PageLimits, PageSpec, SortSpec};
use crate::schema::EntitySchema;
use crate::store::Storage;
use crate::update;

/// Query call payload as it arrives from a caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryRequest {
    pub filters: BTreeMap<String, Option<Criterion>>,
    pub sort: Option<SortSpec>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub page: Option<i64>,
    pub search: Option<String>,
    /// Value of the entity's scope field that every result must carry.
    pub scope: Option<String>,
}

impl QueryRequest {
    pub fn from_json(raw: &str) -> AppResult<Self> {
        serde_json::from_str(raw).map_err(AppError::from)
    }

    fn filter_spec(&self, entity: &EntitySchema) -> Result<FilterSpec, EngineError> {
        let mut spec = FilterSpec {
            criteria: self.filters.clone(),
            search: self.search.clone(),
        };
        if let Some(scope) = &self.scope {
            let field = entity.scope_field.ok_or_else(|| {
                EngineError::invalid(format!("Entity '{}' cannot be scoped.", entity.entity))
            })?;
            // scope always wins over a caller criterion on the same field
            spec.criteria.insert(
                field.to_string(),
                Some(Criterion::Equals(Value::String(scope.clone()))),
            );
        }
        Ok(spec)
    }

    fn page_spec(&self) -> PageSpec {
        PageSpec {
            limit: self.limit,
            offset: self.offset,
            page: self.page,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub records: Vec<Value>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub page: i64,
    pub page_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub id: String,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRequest {
    pub id: String,
}

async fn run_query(
    storage: &dyn Storage,
    entity: &EntitySchema,
    limits: &PageLimits,
    request: &QueryRequest,
) -> Result<QueryResponse, EngineError> {
    let filter = request.filter_spec(entity)?;
    let page = query::execute(
        storage,
        entity,
        &filter,
        request.sort.as_ref(),
        request.page_spec(),
        limits,
    )
    .await?;
    Ok(QueryResponse {
        records: page.items.into_iter().map(Value::Object).collect(),
        total: page.total,
        limit: page.limit,
        offset: page.offset,
        page: page.page,
        page_count: page.page_count,
    })
}

pub async fn query_command(
    storage: &dyn Storage,
    entity: &EntitySchema,
    limits: &PageLimits,
    request: QueryRequest,
) -> AppResult<QueryResponse> {
    run_query(storage, entity, limits, &request)
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "query")
                .with_context("entity", entity.entity)
        })
}

async fn run_update(
    storage: &dyn Storage,
    entity: &EntitySchema,
    request: &UpdateRequest,
) -> Result<UpdateResponse, EngineError> {
    let id = entity.id_scheme.normalize(&request.id)?;
    let plan = update::compile(entity, &request.fields)?;
    let outcome = update::apply(storage, entity, &id, &plan).await?;
    Ok(UpdateResponse {
        id: outcome.id.formatted(),
        success: outcome.success,
    })
}

pub async fn update_command(
    storage: &dyn Storage,
    entity: &EntitySchema,
    request: UpdateRequest,
) -> AppResult<UpdateResponse> {
    run_update(storage, entity, &request).await.map_err(|err| {
        AppError::from(err)
            .with_context("operation", "update")
            .with_context("entity", entity.entity)
    })
}

async fn run_lookup(
    storage: &dyn Storage,
    entity: &EntitySchema,
    request: &LookupRequest,
) -> Result<Value, EngineError> {
    let id = entity.id_scheme.normalize(&request.id)?;
    query::lookup(storage, entity, &id).await.map(Value::Object)
}

pub async fn lookup_command(
    storage: &dyn Storage,
    entity: &EntitySchema,
    request: LookupRequest,
) -> AppResult<Value> {
    run_lookup(storage, entity, &request).await.map_err(|err| {
        AppError::from(err)
            .with_context("operation", "lookup")
            .with_context("entity", entity.entity)
    })
}
