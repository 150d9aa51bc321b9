use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::fallback::{self, FallbackPolicy, SourceKind};
use crate::filter::{self, FilterSpec};
use crate::ids::CanonicalId;
use crate::schema::EntitySchema;
use crate::store::{Statement, Storage};

pub use crate::schema::SortDirection;

pub const DEFAULT_MAX_PAGE_SIZE: i64 = 100;
pub const DEFAULT_PAGE_SIZE: i64 = 25;

/// A record keyed by public field name.
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub max_page_size: i64,
    pub default_page_size: i64,
}

impl Default for PageLimits {
    fn default() -> Self {
        PageLimits {
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(key: impl Into<String>, direction: SortDirection) -> Self {
        SortSpec {
            key: key.into(),
            direction,
        }
    }
}

/// Requested window; `offset` wins over `page` when both are given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageSpec {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// 1-based page number.
    pub page: Option<i64>,
}

impl PageSpec {
    /// Effective `(limit, offset)`: limit clamped to `[1, max]`, offset
    /// never negative.
    pub fn resolve(&self, limits: &PageLimits) -> (i64, i64) {
        let max = limits.max_page_size.max(1);
        let limit = self
            .limit
            .unwrap_or(limits.default_page_size)
            .clamp(1, max);
        let offset = match (self.offset, self.page) {
            (Some(offset), _) => offset.max(0),
            (None, Some(page)) => (page.max(1) - 1).saturating_mul(limit),
            (None, None) => 0,
        };
        (limit, offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSort {
    pub column: &'static str,
    pub direction: SortDirection,
}

/// Maps a public sort key onto a sortable column. Unknown or missing keys
/// resolve to the entity's default sort, direction included.
pub fn resolve_sort(entity: &EntitySchema, sort: Option<&SortSpec>) -> ResolvedSort {
    if let Some(spec) = sort {
        if let Some(field) = entity.sortable(&spec.key) {
            return ResolvedSort {
                column: field.column,
                direction: spec.direction,
            };
        }
        debug!(
            target: "civic_profile",
            event = "sort_key_defaulted",
            entity = entity.entity
        );
    }
    let (key, direction) = entity.default_sort;
    ResolvedSort {
        column: entity
            .sortable(key)
            .map(|f| f.column)
            .unwrap_or_else(|| entity.id_column()),
        direction,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub page: i64,
    pub page_count: i64,
    #[serde(skip)]
    pub source: SourceKind,
}

impl<T> Page<T> {
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        Ok(Page {
            items: self.items.into_iter().map(f).collect::<Result<_, _>>()?,
            total: self.total,
            limit: self.limit,
            offset: self.offset,
            page: self.page,
            page_count: self.page_count,
            source: self.source,
        })
    }
}

/// Runs one filtered, sorted page and its matching count.
///
/// The page and count statements share one compiled predicate, and the
/// count runs against whichever source answered the page.
pub async fn execute(
    storage: &dyn Storage,
    entity: &EntitySchema,
    filter: &FilterSpec,
    sort: Option<&SortSpec>,
    page: PageSpec,
    limits: &PageLimits,
) -> EngineResult<Page<Record>> {
    let predicate = filter::compile(entity, filter)?;
    let sort = resolve_sort(entity, sort);
    let (limit, offset) = page.resolve(limits);

    let where_clause = predicate.where_clause();
    let select_list = entity.select_list();
    let id_column = entity.id_column();
    let order_by = if sort.column == id_column {
        format!("{} {}", sort.column, sort.direction.as_sql())
    } else {
        format!(
            "{} {}, {id_column} ASC",
            sort.column,
            sort.direction.as_sql()
        )
    };

    let page_statement = |source: &str| {
        let mut params = predicate.params.clone();
        params.push(Value::from(limit));
        params.push(Value::from(offset));
        Statement::new(
            format!("SELECT {select_list} FROM {source}{where_clause} ORDER BY {order_by} LIMIT ? OFFSET ?"),
            params,
        )
    };
    let count_statement = |source: &str| {
        Statement::new(
            format!("SELECT COUNT(*) AS total FROM {source}{where_clause}"),
            predicate.params.clone(),
        )
    };

    let resolved = fallback::resolve(
        storage,
        entity,
        &page_statement,
        FallbackPolicy::OnSchemaError,
    )
    .await?;
    let count_rows =
        fallback::resolve_on(storage, entity, resolved.source, &count_statement).await?;
    let total = count_rows
        .first()
        .and_then(|row| row.get("total"))
        .and_then(Value::as_i64)
        .unwrap_or(0);

    let items: Vec<Record> = resolved
        .rows
        .into_iter()
        .map(|row| entity.decode_row(row))
        .collect();

    info!(
        target: "civic_profile",
        event = "query_executed",
        entity = entity.entity,
        source = resolved.source.as_str(),
        predicate = %predicate.sql,
        order_by = %order_by,
        returned = items.len(),
        total,
        limit,
        offset
    );

    Ok(Page {
        items,
        total,
        limit,
        offset,
        page: offset / limit + 1,
        page_count: (total + limit - 1) / limit,
        source: resolved.source,
    })
}

/// Fetches one record by canonical id, consulting the legacy source when
/// the current table has no such row.
pub async fn lookup(
    storage: &dyn Storage,
    entity: &EntitySchema,
    id: &CanonicalId,
) -> EngineResult<Record> {
    let select_list = entity.select_list();
    let id_column = entity.id_column();
    let formatted = id.formatted();
    let statement = |source: &str| {
        Statement::new(
            format!("SELECT {select_list} FROM {source} WHERE {id_column} = ? LIMIT 1"),
            vec![Value::String(formatted.clone())],
        )
    };

    let resolved = fallback::resolve(
        storage,
        entity,
        &statement,
        FallbackPolicy::OnSchemaErrorOrEmpty,
    )
    .await?;
    match resolved.rows.into_iter().next() {
        Some(row) => {
            debug!(
                target: "civic_profile",
                event = "lookup_hit",
                entity = entity.entity,
                source = resolved.source.as_str()
            );
            Ok(entity.decode_row(row))
        }
        None => Err(EngineError::NotFound { id: formatted }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::household::HOUSEHOLDS;

    #[test]
    fn limit_is_clamped_and_offset_floored() {
        let limits = PageLimits::default();
        assert_eq!(PageSpec::default().resolve(&limits), (25, 0));
        let spec = PageSpec {
            limit: Some(0),
            offset: Some(-5),
            page: None,
        };
        assert_eq!(spec.resolve(&limits), (1, 0));
        let spec = PageSpec {
            limit: Some(10_000),
            offset: Some(7),
            page: None,
        };
        assert_eq!(spec.resolve(&limits), (100, 7));
    }

    #[test]
    fn page_number_converts_to_offset() {
        let limits = PageLimits::default();
        let spec = PageSpec {
            limit: Some(10),
            offset: None,
            page: Some(3),
        };
        assert_eq!(spec.resolve(&limits), (10, 20));
        let spec = PageSpec {
            limit: Some(10),
            offset: None,
            page: Some(0),
        };
        assert_eq!(spec.resolve(&limits), (10, 0));
        let spec = PageSpec {
            limit: Some(10),
            offset: Some(5),
            page: Some(3),
        };
        assert_eq!(spec.resolve(&limits), (10, 5));
    }

    #[test]
    fn known_sort_keys_map_to_columns() {
        let sort = resolve_sort(
            &HOUSEHOLDS,
            Some(&SortSpec::new("members_count", SortDirection::Desc)),
        );
        assert_eq!(sort.column, "members_count");
        assert_eq!(sort.direction, SortDirection::Desc);
    }

    #[test]
    fn unknown_sort_keys_use_the_default() {
        let default = resolve_sort(&HOUSEHOLDS, None);
        assert_eq!(default.column, "head_name");
        assert_eq!(default.direction, SortDirection::Asc);

        for key in ["", "nope", "head_name; DROP TABLE households", "phone"] {
            let sort = resolve_sort(&HOUSEHOLDS, Some(&SortSpec::new(key, SortDirection::Desc)));
            assert_eq!(sort, default, "{key}");
        }
    }
}
