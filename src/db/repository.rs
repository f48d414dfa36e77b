use crate::db::models::{DailyRecord, MonthlyRecord, TableKind, UpsertResult, YearlyRecord};
use crate::error::{AppError, Result};
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use tracing::{debug, error, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// A row type that can be upserted into one of the rainfall tables.
pub trait UpsertRecord {
    const KIND: TableKind;

    type Key: Eq + Hash;

    /// Value of the table's uniqueness constraint for this row.
    fn key(&self) -> Self::Key;

    /// Push this row's values in `TableKind::columns` order.
    fn bind_row(&self, row: &mut Separated<'_, '_, Postgres, &'static str>);
}

impl UpsertRecord for DailyRecord {
    const KIND: TableKind = TableKind::Daily;
    type Key = (String, chrono::NaiveDate);

    fn key(&self) -> Self::Key {
        (self.station_id.clone(), self.date)
    }

    fn bind_row(&self, row: &mut Separated<'_, '_, Postgres, &'static str>) {
        row.push_bind(self.station_id.clone())
            .push_bind(self.date)
            .push_bind(self.rainfall);
    }
}

impl UpsertRecord for MonthlyRecord {
    const KIND: TableKind = TableKind::Monthly;
    type Key = (String, i32, i32);

    fn key(&self) -> Self::Key {
        (self.station_id.clone(), self.year, self.month)
    }

    fn bind_row(&self, row: &mut Separated<'_, '_, Postgres, &'static str>) {
        row.push_bind(self.station_id.clone())
            .push_bind(self.year)
            .push_bind(self.month)
            .push_bind(self.rainfall);
    }
}

impl UpsertRecord for YearlyRecord {
    const KIND: TableKind = TableKind::Yearly;
    type Key = (String, i32);

    fn key(&self) -> Self::Key {
        (self.station_id.clone(), self.year)
    }

    fn bind_row(&self, row: &mut Separated<'_, '_, Postgres, &'static str>) {
        row.push_bind(self.station_id.clone())
            .push_bind(self.year)
            .push_bind(self.rainfall);
    }
}

#[derive(Clone)]
pub struct Repository {
    pool: PgPool,
    batch_size: usize,
}

impl Repository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub async fn upsert_daily(&self, records: &[DailyRecord]) -> Result<UpsertResult> {
        self.upsert(records).await
    }

    pub async fn upsert_monthly(&self, records: &[MonthlyRecord]) -> Result<UpsertResult> {
        self.upsert(records).await
    }

    pub async fn upsert_yearly(&self, records: &[YearlyRecord]) -> Result<UpsertResult> {
        self.upsert(records).await
    }

    /// Insert or replace records in batch
    ///
    /// Conflicts on the table's unique key overwrite only `rainfall`. All
    /// batches run inside one transaction: any failing batch rolls back the
    /// whole call and the error is returned. Nothing is shared across calls,
    /// so one table may commit while a later one fails.
    ///
    /// Records sharing a key collapse to the last occurrence, since Postgres
    /// refuses to update the same row twice in one statement.
    pub async fn upsert<R: UpsertRecord>(&self, records: &[R]) -> Result<UpsertResult> {
        let kind = R::KIND;
        let table = kind.table_name();

        if records.is_empty() {
            debug!("No rows to write to {}", table);
            return Ok(UpsertResult::empty(kind));
        }

        let unique = dedup_last_by_key(records);
        if unique.len() < records.len() {
            warn!(
                "Collapsed {} duplicate keys before writing to {}",
                records.len() - unique.len(),
                table
            );
        }

        let batch_count = unique.len().div_ceil(self.batch_size);
        let mut total_rows_affected = 0;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::load(table, e))?;

        for (batch_idx, chunk) in unique.chunks(self.batch_size).enumerate() {
            debug!(
                "Writing batch {}/{} to {} ({} rows)",
                batch_idx + 1,
                batch_count,
                table,
                chunk.len()
            );

            let mut query_builder = sqlx::QueryBuilder::<Postgres>::new(format!(
                "INSERT INTO {} ({}) ",
                table,
                kind.columns()
            ));

            query_builder.push_values(chunk.iter(), |mut b, record| {
                record.bind_row(&mut b);
            });

            query_builder.push(format!(
                " ON CONFLICT ({}) DO UPDATE SET rainfall = EXCLUDED.rainfall",
                kind.conflict_target()
            ));

            let outcome = query_builder.build().execute(&mut *tx).await;
            match outcome {
                Ok(result) => total_rows_affected += result.rows_affected(),
                Err(e) => {
                    error!(
                        "Error inserting batch {}/{} into {}: {}",
                        batch_idx + 1,
                        batch_count,
                        table,
                        e
                    );
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!("Rollback of {} failed: {}", table, rollback_err);
                    }
                    return Err(AppError::load(table, e));
                }
            }
        }

        tx.commit().await.map_err(|e| AppError::load(table, e))?;

        Ok(UpsertResult {
            table: kind,
            rows_written: unique.len(),
            batches: batch_count,
            total_rows_affected,
        })
    }
}

/// Keep one record per key, the last one seen, in first-seen key order.
fn dedup_last_by_key<R: UpsertRecord>(records: &[R]) -> Vec<&R> {
    let mut positions: HashMap<R::Key, usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<&R> = Vec::with_capacity(records.len());

    for record in records {
        match positions.entry(record.key()) {
            Entry::Occupied(slot) => unique[*slot.get()] = record,
            Entry::Vacant(slot) => {
                slot.insert(unique.len());
                unique.push(record);
            }
        }
    }

    unique
}
