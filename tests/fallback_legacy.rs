use anyhow::Result;
use civic_profile_lib::commands::{lookup_command, query_command, LookupRequest, QueryRequest};
use civic_profile_lib::fallback::SourceKind;
use civic_profile_lib::household::{get_household, update_household};
use civic_profile_lib::query::execute;
use civic_profile_lib::{
    Criterion, EngineError, FilterSpec, PageLimits, PageSpec, SqliteStorage, HOUSEHOLDS,
    QUERY_RETRIEVAL_FAILED,
};
use serde_json::{json, Map};
#[path = "util.rs"]
mod util;

async fn legacy_only_storage() -> SqliteStorage {
    let pool = util::temp_pool().await;
    util::create_legacy_table(&pool).await;
    util::insert_legacy_household(&pool, "hh-0100", "Wayan", "north", 3).await;
    util::insert_legacy_household(&pool, "hh-0101", "Ketut", "south", 6).await;
    util::insert_legacy_household(&pool, "hh-0102", "Made", "north", 2).await;
    SqliteStorage::new(pool)
}

#[tokio::test]
async fn missing_primary_table_reads_legacy_rows_in_current_shape() -> Result<()> {
    let storage = legacy_only_storage().await;
    let filter = FilterSpec::new().with("district", Criterion::Equals(json!("north")));

    let page = execute(
        &storage,
        &HOUSEHOLDS,
        &filter,
        None,
        PageSpec::default(),
        &PageLimits::default(),
    )
    .await?;
    assert_eq!(page.source, SourceKind::Legacy);
    assert_eq!(page.total, 2);

    // default order is by name
    let first = &page.items[0];
    assert_eq!(first["id"], json!("hh-0102"));
    assert_eq!(first["name"], json!("Made"));
    assert_eq!(first["address"], json!("Jl. Lama"));
    assert_eq!(first["members_count"], json!(2));
    assert_eq!(first["low_income"], json!(true));
    assert_eq!(first["registered_on"], json!("2015-06-01"));
    assert_eq!(first["tags"], json!(null));
    assert_eq!(first["updated_at"], json!(20));
    Ok(())
}

#[tokio::test]
async fn legacy_count_uses_the_same_predicate() -> Result<()> {
    let storage = legacy_only_storage().await;
    let request = QueryRequest::from_json(
        r#"{"filters": {"members_count": {"range": {"min": 3}}}, "limit": 1}"#,
    )?;
    let response = query_command(&storage, &HOUSEHOLDS, &PageLimits::default(), request).await?;
    assert_eq!(response.total, 2);
    assert_eq!(response.records.len(), 1);
    assert_eq!(response.page_count, 2);
    Ok(())
}

#[tokio::test]
async fn present_primary_is_authoritative_for_pages() -> Result<()> {
    let pool = util::migrated_pool().await;
    util::create_legacy_table(&pool).await;
    util::insert_legacy_household(&pool, "hh-0100", "Wayan", "north", 3).await;
    let storage = SqliteStorage::new(pool);

    let page = execute(
        &storage,
        &HOUSEHOLDS,
        &FilterSpec::new(),
        None,
        PageSpec::default(),
        &PageLimits::default(),
    )
    .await?;
    assert_eq!(page.source, SourceKind::Primary);
    assert_eq!(page.total, 0);
    assert!(page.items.is_empty());
    Ok(())
}

#[tokio::test]
async fn lookup_falls_through_to_unmigrated_records() -> Result<()> {
    let pool = util::migrated_pool().await;
    util::seed_households(&pool, 2).await;
    util::create_legacy_table(&pool).await;
    util::insert_legacy_household(&pool, "hh-0100", "Wayan", "north", 3).await;
    let storage = SqliteStorage::new(pool);

    let migrated = get_household(&storage, "hh-0001").await?;
    assert_eq!(migrated.name, "Siti");

    let legacy = get_household(&storage, "HH-0100").await?;
    assert_eq!(legacy.name, "Wayan");
    assert_eq!(legacy.members_count, 3);
    assert_eq!(legacy.tags, None);

    let err = get_household(&storage, "hh-0555").await.unwrap_err();
    assert_eq!(
        err,
        EngineError::NotFound {
            id: "hh-0555".into()
        }
    );
    Ok(())
}

#[tokio::test]
async fn updates_never_target_the_legacy_table() -> Result<()> {
    let pool = util::migrated_pool().await;
    util::create_legacy_table(&pool).await;
    util::insert_legacy_household(&pool, "hh-0100", "Wayan", "north", 3).await;
    let storage = SqliteStorage::new(pool);

    let mut fields = Map::new();
    fields.insert("name".into(), json!("Wayan Sudarma"));
    let err = update_household(&storage, "hh-0100", &fields)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));

    let (head,): (String,) = sqlx::query_as("SELECT head FROM households_v1 WHERE hh_id = 'hh-0100'")
        .fetch_one(storage.pool())
        .await?;
    assert_eq!(head, "Wayan");
    Ok(())
}

#[tokio::test]
async fn no_source_at_all_is_a_generic_retrieval_failure() -> Result<()> {
    let storage = SqliteStorage::new(util::temp_pool().await);

    let err = query_command(
        &storage,
        &HOUSEHOLDS,
        &PageLimits::default(),
        QueryRequest::default(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), QUERY_RETRIEVAL_FAILED);
    assert_eq!(err.message(), "Records could not be retrieved.");
    assert!(!err.to_string().contains("no such table"));
    assert!(!err.to_string().contains("SELECT"));

    let err = lookup_command(
        &storage,
        &HOUSEHOLDS,
        LookupRequest {
            id: "hh-0001".into(),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), QUERY_RETRIEVAL_FAILED);
    Ok(())
}
