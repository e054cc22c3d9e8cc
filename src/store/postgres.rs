//! PostgreSQL adapter over a shared `PgPool`.

use crate::config::{EngineSettings, EntitySchema};
use crate::error::StoreError;
use crate::filter::Predicate;
use crate::query::{QueryDescriptor, AGGREGATE_COUNT_KEY};
use crate::sql::{self, BindValue, QueryBuf};
use crate::store::{Record, StorageAdapter};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::PgPool;

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    /// Build the pool from `DATABASE_URL` / `DATABASE_MAX_CONNECTIONS`.
    pub async fn connect(settings: &EngineSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.database_url)
            .await?;
        tracing::info!(max_connections = settings.max_connections, "connected to postgres");
        Ok(PgStore { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_all(&self, q: &QueryBuf) -> Result<Vec<Record>, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(BindValue::from(p));
        }
        let rows = query.fetch_all(&self.pool).await.map_err(classify)?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn fetch_one(&self, q: &QueryBuf) -> Result<Record, StoreError> {
        self.fetch_all(q)
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::Db(sqlx::Error::RowNotFound))
    }
}

/// Unique violations become `Conflict`; everything else stays a database error.
fn classify(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::Conflict(db.message().to_string())
        }
        _ => StoreError::Db(e),
    }
}

#[async_trait]
impl StorageAdapter for PgStore {
    async fn insert(&self, entity: &EntitySchema, record: &Record) -> Result<Record, StoreError> {
        self.fetch_one(&sql::insert(entity, record)).await
    }

    async fn select(&self, entity: &EntitySchema, query: &QueryDescriptor) -> Result<Vec<Record>, StoreError> {
        self.fetch_all(&sql::select(entity, query)).await
    }

    async fn count(&self, entity: &EntitySchema, query: &QueryDescriptor) -> Result<u64, StoreError> {
        let row = self.fetch_one(&sql::count(entity, query)).await?;
        Ok(row
            .get(AGGREGATE_COUNT_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    async fn update(
        &self,
        entity: &EntitySchema,
        predicate: &Predicate,
        patch: &Record,
    ) -> Result<Vec<Record>, StoreError> {
        self.fetch_all(&sql::update_where(entity, predicate, patch)).await
    }

    async fn delete(&self, entity: &EntitySchema, predicate: &Predicate) -> Result<Vec<Record>, StoreError> {
        self.fetch_all(&sql::delete_where(entity, predicate)).await
    }

    async fn upsert(
        &self,
        entity: &EntitySchema,
        record: &Record,
        conflict: &[String],
    ) -> Result<Record, StoreError> {
        self.fetch_one(&sql::upsert(entity, record, conflict)).await
    }
}

fn row_to_record(row: &PgRow) -> Record {
    use sqlx::{Column, Row};
    let mut map = Record::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

/// NUMERIC cell: whole values as integers, others as floats, text when neither fits.
fn decimal_to_value(d: Decimal) -> Value {
    if d.fract().is_zero() {
        if let Some(i) = d.to_i64() {
            return Value::from(i);
        }
    }
    d.to_f64()
        .and_then(serde_json::Number::from_f64)
        .map_or_else(|| Value::String(d.to_string()), Value::Number)
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(d)) = row.try_get::<Option<Decimal>, _>(name) {
        return decimal_to_value(d);
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    if let Ok(Some(items)) = row.try_get::<Option<Vec<String>>, _>(name) {
        return Value::Array(items.into_iter().map(Value::String).collect());
    }
    if let Ok(Some(items)) = row.try_get::<Option<Vec<i64>>, _>(name) {
        return Value::Array(items.into_iter().map(Value::from).collect());
    }
    if let Ok(Some(items)) = row.try_get::<Option<Vec<i32>>, _>(name) {
        return Value::Array(items.into_iter().map(Value::from).collect());
    }
    if let Ok(Some(items)) = row.try_get::<Option<Vec<uuid::Uuid>>, _>(name) {
        return Value::Array(items.into_iter().map(|u| Value::String(u.to_string())).collect());
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_cells_become_json_numbers() {
        assert_eq!(decimal_to_value(Decimal::new(4200, 2)), json!(42));
        assert_eq!(decimal_to_value(Decimal::new(250, 2)), json!(2.5));
        assert_eq!(decimal_to_value(Decimal::new(-7, 0)), json!(-7));
        assert_eq!(decimal_to_value(Decimal::MAX), json!(Decimal::MAX.to_f64().unwrap()));
    }
}
