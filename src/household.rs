//! The household register.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::error;

use crate::error::{EngineError, EngineResult};
use crate::filter::FilterSpec;
use crate::ids::IdScheme;
use crate::query::{self, Page, PageLimits, PageSpec, Record, SortSpec};
use crate::schema::{EntitySchema, FieldDef, FieldKind, SortDirection};
use crate::store::Storage;
use crate::update::{self, UpdateOutcome};

pub const HOUSEHOLD_ID: IdScheme = IdScheme::new("hh-", true);

const FIELDS: &[FieldDef] = &[
    FieldDef::new("id", "id", FieldKind::Text)
        .legacy("hh_id")
        .sortable(),
    FieldDef::new("name", "head_name", FieldKind::Text)
        .legacy("head")
        .sortable()
        .updatable()
        .searchable(),
    FieldDef::new("address", "address", FieldKind::Text)
        .legacy("addr")
        .nullable()
        .updatable()
        .searchable(),
    FieldDef::new("district", "district_code", FieldKind::Text)
        .legacy("district")
        .nullable()
        .sortable()
        .updatable(),
    FieldDef::new("family_card_no", "family_card_no", FieldKind::Text)
        .legacy("card_no")
        .nullable()
        .updatable()
        .searchable(),
    FieldDef::new("members_count", "members_count", FieldKind::Integer)
        .legacy("members")
        .sortable()
        .updatable(),
    FieldDef::new("monthly_income", "monthly_income", FieldKind::Real)
        .legacy("income")
        .nullable()
        .sortable()
        .updatable(),
    FieldDef::new("registered_on", "registered_on", FieldKind::Date)
        .legacy("registered")
        .sortable()
        .updatable(),
    FieldDef::new("low_income", "is_low_income", FieldKind::Bool)
        .legacy("low_income")
        .updatable(),
    // no legacy counterpart
    FieldDef::new("tags", "tags_json", FieldKind::TextList)
        .nullable()
        .updatable(),
    FieldDef::new("phone", "phone", FieldKind::Text)
        .legacy("phone")
        .nullable()
        .updatable(),
    FieldDef::new("created_at", "created_at", FieldKind::Integer)
        .legacy("created")
        .sortable(),
    FieldDef::new("updated_at", "updated_at", FieldKind::Integer)
        .legacy("modified")
        .sortable(),
];

pub const HOUSEHOLDS: EntitySchema = EntitySchema {
    entity: "household",
    table: "households",
    legacy_table: Some("households_v1"),
    id_field: "id",
    id_scheme: HOUSEHOLD_ID,
    updated_at_column: "updated_at",
    scope_field: Some("district"),
    default_sort: ("name", SortDirection::Asc),
    fields: FIELDS,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Household {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub district: Option<String>,
    pub family_card_no: Option<String>,
    pub members_count: i64,
    pub monthly_income: Option<f64>,
    pub registered_on: String,
    pub low_income: bool,
    pub tags: Option<Vec<String>>,
    pub phone: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<Record> for Household {
    type Error = EngineError;

    /// Null columns (common in legacy rows) fall back to field defaults.
    fn try_from(mut record: Record) -> EngineResult<Self> {
        record.retain(|_, value| !value.is_null());
        serde_json::from_value(Value::Object(record)).map_err(|err| {
            error!(
                target: "civic_profile",
                event = "record_decode_failed",
                entity = HOUSEHOLDS.entity,
                error = %err
            );
            EngineError::RetrievalFailure
        })
    }
}

pub async fn list_households(
    storage: &dyn Storage,
    filter: &FilterSpec,
    sort: Option<&SortSpec>,
    page: PageSpec,
    limits: &PageLimits,
) -> EngineResult<Page<Household>> {
    query::execute(storage, &HOUSEHOLDS, filter, sort, page, limits)
        .await?
        .try_map(Household::try_from)
}

pub async fn get_household(storage: &dyn Storage, id: &str) -> EngineResult<Household> {
    let id = HOUSEHOLD_ID.normalize(id)?;
    let record = query::lookup(storage, &HOUSEHOLDS, &id).await?;
    Household::try_from(record)
}

pub async fn update_household(
    storage: &dyn Storage,
    id: &str,
    fields: &Map<String, Value>,
) -> EngineResult<UpdateOutcome> {
    let id = HOUSEHOLD_ID.normalize(id)?;
    let plan = update::compile(&HOUSEHOLDS, fields)?;
    update::apply(storage, &HOUSEHOLDS, &id, &plan).await
}
