use chrono::NaiveDate;
use rainfall_ingest::db::models::{DailyRecord, MonthlyRecord, TableKind, YearlyRecord};
use rainfall_ingest::db::Repository;
use rainfall_ingest::error::AppError;
use sqlx::PgPool;

fn daily(station: &str, date: &str, rainfall: Option<f64>) -> DailyRecord {
    DailyRecord {
        station_id: station.to_string(),
        date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        rainfall,
    }
}

fn monthly(station: &str, year: i32, month: i32, rainfall: f64) -> MonthlyRecord {
    MonthlyRecord {
        station_id: station.to_string(),
        year,
        month,
        rainfall,
    }
}

/// Test daily insert
#[sqlx::test]
async fn test_upsert_daily_inserts_rows(pool: PgPool) {
    let repo = Repository::new(pool.clone());

    let records = vec![
        daily("001006", "2024-01-01", Some(5.0)),
        daily("001006", "2024-01-02", None),
    ];

    let result = repo.upsert_daily(&records).await.expect("Insert failed");

    assert_eq!(result.table, TableKind::Daily);
    assert_eq!(result.rows_written, 2);
    assert_eq!(result.batches, 1);

    let rows = sqlx::query_as::<_, (String, NaiveDate, Option<f64>)>(
        "SELECT station_id, date, rainfall FROM rainfall_data_daily ORDER BY date",
    )
    .fetch_all(&pool)
    .await
    .expect("Query failed");

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].2, Some(5.0));
    assert_eq!(rows[1].2, None);
}

/// Upserting the same key twice keeps one row with the latest value
#[sqlx::test]
async fn test_upsert_daily_replaces_rainfall(pool: PgPool) {
    let repo = Repository::new(pool.clone());

    repo.upsert_daily(&[daily("001006", "2024-01-01", Some(5.0))])
        .await
        .expect("Initial insert failed");
    repo.upsert_daily(&[daily("001006", "2024-01-01", Some(12.5))])
        .await
        .expect("Update failed");

    let rows = sqlx::query_as::<_, (Option<f64>,)>(
        "SELECT rainfall FROM rainfall_data_daily WHERE station_id = $1",
    )
    .bind("001006")
    .fetch_all(&pool)
    .await
    .expect("Query failed");

    assert_eq!(rows, vec![(Some(12.5),)]);
}

/// Duplicate keys within one call collapse to the last record
#[sqlx::test]
async fn test_upsert_duplicate_keys_in_one_call(pool: PgPool) {
    let repo = Repository::new(pool.clone());

    let records = vec![
        daily("001006", "2024-01-01", Some(1.0)),
        daily("001006", "2024-01-01", Some(2.0)),
    ];

    let result = repo.upsert_daily(&records).await.expect("Insert failed");
    assert_eq!(result.rows_written, 1);

    let rainfall = sqlx::query_scalar::<_, Option<f64>>("SELECT rainfall FROM rainfall_data_daily")
        .fetch_one(&pool)
        .await
        .expect("Query failed");
    assert_eq!(rainfall, Some(2.0));
}

/// Records are written across several batches in one transaction
#[sqlx::test]
async fn test_upsert_multiple_batches(pool: PgPool) {
    let repo = Repository::new(pool.clone()).with_batch_size(10);

    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let records: Vec<DailyRecord> = (0..25)
        .map(|i| DailyRecord {
            station_id: "001006".to_string(),
            date: start + chrono::Duration::days(i),
            rainfall: Some(i as f64),
        })
        .collect();

    let result = repo.upsert_daily(&records).await.expect("Insert failed");
    assert_eq!(result.batches, 3);
    assert_eq!(result.rows_written, 25);

    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM rainfall_data_daily")
        .fetch_one(&pool)
        .await
        .expect("Count query failed");
    assert_eq!(count, 25);
}

/// A failing batch rolls back every batch of the same call
#[sqlx::test]
async fn test_failed_batch_rolls_back_whole_call(pool: PgPool) {
    let repo = Repository::new(pool.clone()).with_batch_size(2);

    let records = vec![
        monthly("001006", 2024, 1, 5.0),
        monthly("001006", 2024, 2, 3.0),
        // month 13 violates the table's CHECK constraint in the second batch
        monthly("001006", 2024, 13, 1.0),
    ];

    let err = repo.upsert_monthly(&records).await.unwrap_err();
    match err {
        AppError::Load { table, .. } => assert_eq!(table, "rainfall_data_monthly"),
        e => panic!("Expected Load error, got: {:?}", e),
    }

    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM rainfall_data_monthly")
        .fetch_one(&pool)
        .await
        .expect("Count query failed");
    assert_eq!(count, 0);
}

/// Each table commits on its own: a later failure leaves earlier tables written
#[sqlx::test]
async fn test_tables_commit_independently(pool: PgPool) {
    let repo = Repository::new(pool.clone());

    repo.upsert_daily(&[daily("001006", "2024-01-01", Some(5.0))])
        .await
        .expect("Daily insert failed");

    let result = repo
        .upsert_monthly(&[monthly("001006", 2024, 0, 5.0)])
        .await;
    assert!(result.is_err());

    let daily_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM rainfall_data_daily")
        .fetch_one(&pool)
        .await
        .expect("Count query failed");
    assert_eq!(daily_count, 1);
}

/// Yearly upsert replaces only the rainfall value
#[sqlx::test]
async fn test_upsert_yearly_updates_existing(pool: PgPool) {
    let repo = Repository::new(pool.clone());

    let first = YearlyRecord {
        station_id: "001006".to_string(),
        year: 2024,
        rainfall: 8.0,
    };
    let second = YearlyRecord {
        rainfall: 11.0,
        ..first.clone()
    };

    repo.upsert_yearly(&[first]).await.expect("Insert failed");
    let id_before = sqlx::query_scalar::<_, i64>("SELECT id FROM rainfall_data_yearly")
        .fetch_one(&pool)
        .await
        .expect("Query failed");

    repo.upsert_yearly(&[second]).await.expect("Update failed");

    let (id_after, rainfall) =
        sqlx::query_as::<_, (i64, f64)>("SELECT id, rainfall FROM rainfall_data_yearly")
            .fetch_one(&pool)
            .await
            .expect("Query failed");

    assert_eq!(id_after, id_before);
    assert_eq!(rainfall, 11.0);
}

/// Empty input writes nothing
#[sqlx::test]
async fn test_upsert_empty_is_noop(pool: PgPool) {
    let repo = Repository::new(pool.clone());

    let result = repo.upsert_yearly(&[]).await.expect("Empty upsert failed");

    assert_eq!(result.rows_written, 0);
    assert_eq!(result.batches, 0);
}
