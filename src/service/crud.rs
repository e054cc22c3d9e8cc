//! Generic CRUD execution over a storage adapter.

use crate::config::EntitySchema;
use crate::error::{AppError, StoreError};
use crate::filter::Predicate;
use crate::query::QueryDescriptor;
use crate::response::{Envelope, Paginator};
use crate::service::validation::{FieldValidator, ValidationMode};
use crate::store::{Record, StorageAdapter};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// `perPage` reported when a counted list is not paginated.
pub const DEFAULT_PER_PAGE: u32 = 25;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CreateManyOptions {
    /// Check every record against the schema before the first insert.
    pub validate: bool,
}

/// Shape of `find_and_count_all` results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResultFormat {
    #[default]
    Envelope,
    CountAndRows,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CountedRows {
    pub count: u64,
    pub rows: Vec<Record>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FindAndCount {
    Envelope(Envelope),
    Counted(CountedRows),
}

impl FindAndCount {
    pub fn into_envelope(self) -> Envelope {
        match self {
            FindAndCount::Envelope(e) => e,
            FindAndCount::Counted(c) => Envelope::data(rows_value(c.rows)),
        }
    }
}

fn rows_value(rows: Vec<Record>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}

/// CRUD verbs implemented once, parameterized by entity schema.
///
/// Storage failures are wrapped with the entity, operation and predicate and
/// are never retried.
pub struct CrudService<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for CrudService<S> {
    fn clone(&self) -> Self {
        CrudService {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: StorageAdapter + ?Sized> CrudService<S> {
    pub fn new(store: Arc<S>) -> Self {
        CrudService { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Insert one record; the returned row carries generated fields.
    pub async fn create_one(&self, entity: &EntitySchema, data: &Record) -> Result<Record, AppError> {
        let row = self
            .store
            .insert(entity, data)
            .await
            .map_err(|e| fail(entity, "create", Predicate::True, e))?;
        tracing::info!(entity = %entity.name, "created");
        Ok(row)
    }

    /// Insert records one by one. A storage failure part-way leaves the earlier
    /// rows in place.
    pub async fn create_many(
        &self,
        entity: &EntitySchema,
        records: &[Record],
        options: CreateManyOptions,
    ) -> Result<Vec<Record>, AppError> {
        if options.validate {
            let validator = FieldValidator::new(entity);
            for record in records {
                validator.check(record, ValidationMode::Create)?;
            }
        }
        let mut out = Vec::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            let row = self.store.insert(entity, record).await.map_err(|e| {
                if i > 0 {
                    tracing::warn!(entity = %entity.name, inserted = i, "create_many stopped part-way");
                }
                fail(entity, "create_many", Predicate::True, e)
            })?;
            out.push(row);
        }
        tracing::info!(entity = %entity.name, count = out.len(), "created many");
        Ok(out)
    }

    /// First row of the query, if any. With pagination, the first row of that page.
    pub async fn find_one(&self, entity: &EntitySchema, query: &QueryDescriptor) -> Result<Option<Record>, AppError> {
        let start = query.offset().map_or(1, |o| u32::try_from(o + 1).unwrap_or(u32::MAX));
        let single = query.clone().with_pagination(start, 1);
        let rows = self
            .store
            .select(entity, &single)
            .await
            .map_err(|e| fail(entity, "find_one", &query.predicate, e))?;
        Ok(rows.into_iter().next())
    }

    /// Row whose primary key equals `key`; includes and projection of `query` apply.
    pub async fn find_by_key(
        &self,
        entity: &EntitySchema,
        key: &Value,
        query: &QueryDescriptor,
    ) -> Result<Option<Record>, AppError> {
        let mut by_key = query.clone();
        by_key.predicate = Predicate::eq(entity.primary_key().name.clone(), key.clone());
        self.find_one(entity, &by_key).await
    }

    /// Every matching row (unbounded without pagination). With aggregation the
    /// rows are `{<groupBy>: value, "count": n}`.
    pub async fn find_all(&self, entity: &EntitySchema, query: &QueryDescriptor) -> Result<Vec<Record>, AppError> {
        self.store
            .select(entity, query)
            .await
            .map_err(|e| fail(entity, "find_all", &query.predicate, e))
    }

    /// Distinct count of matching rows plus the page of rows.
    pub async fn find_and_count_all(
        &self,
        entity: &EntitySchema,
        query: &QueryDescriptor,
        format: ResultFormat,
    ) -> Result<FindAndCount, AppError> {
        let count = self
            .store
            .count(entity, query)
            .await
            .map_err(|e| fail(entity, "count", &query.predicate, e))?;
        let rows = self.find_all(entity, query).await?;
        Ok(match format {
            ResultFormat::CountAndRows => FindAndCount::Counted(CountedRows { count, rows }),
            ResultFormat::Envelope => {
                let per_page = query.limit().unwrap_or(DEFAULT_PER_PAGE);
                let current = query.pagination.map(|p| p.page()).unwrap_or(1);
                FindAndCount::Envelope(Envelope {
                    data: rows_value(rows),
                    paginator: Some(Paginator::new(count, per_page, current)),
                })
            }
        })
    }

    pub async fn count(&self, entity: &EntitySchema, predicate: &Predicate) -> Result<u64, AppError> {
        let query = QueryDescriptor::new(predicate.clone());
        self.store
            .count(entity, &query)
            .await
            .map_err(|e| fail(entity, "count", predicate, e))
    }

    /// Apply `patch` to every matching row and return the rows after the change.
    /// `updated_at` is refreshed unless the patch sets it. No match is an empty result.
    pub async fn update(
        &self,
        entity: &EntitySchema,
        predicate: &Predicate,
        patch: &Record,
    ) -> Result<Vec<Record>, AppError> {
        let mut patch = patch.clone();
        if entity.has_field("updated_at") && !patch.contains_key("updated_at") {
            patch.insert(
                "updated_at".into(),
                Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        let rows = self
            .store
            .update(entity, predicate, &patch)
            .await
            .map_err(|e| fail(entity, "update", predicate, e))?;
        tracing::info!(entity = %entity.name, predicate = %predicate, affected = rows.len(), "updated");
        Ok(rows)
    }

    /// Physically delete every matching row; returns the rows as they were.
    pub async fn destroy(&self, entity: &EntitySchema, predicate: &Predicate) -> Result<Vec<Record>, AppError> {
        let rows = self
            .store
            .delete(entity, predicate)
            .await
            .map_err(|e| fail(entity, "destroy", predicate, e))?;
        tracing::info!(entity = %entity.name, predicate = %predicate, affected = rows.len(), "destroyed");
        Ok(rows)
    }

    pub async fn delete_by_key(&self, entity: &EntitySchema, key: &Value) -> Result<Option<Record>, AppError> {
        let predicate = Predicate::eq(entity.primary_key().name.clone(), key.clone());
        Ok(self.destroy(entity, &predicate).await?.into_iter().next())
    }

    /// Insert or update on `conflict_fields` (the primary key when empty).
    pub async fn upsert(
        &self,
        entity: &EntitySchema,
        data: &Record,
        conflict_fields: &[String],
    ) -> Result<Record, AppError> {
        let conflict: Vec<String> = if conflict_fields.is_empty() {
            vec![entity.primary_key().name.clone()]
        } else {
            for f in conflict_fields {
                if !entity.has_field(f) {
                    return Err(AppError::BadRequest(format!(
                        "unknown conflict field '{}' on {}",
                        f, entity.name
                    )));
                }
            }
            conflict_fields.to_vec()
        };
        let row = self
            .store
            .upsert(entity, data, &conflict)
            .await
            .map_err(|e| fail(entity, "upsert", Predicate::True, e))?;
        tracing::info!(entity = %entity.name, conflict = ?conflict, "upserted");
        Ok(row)
    }
}

fn fail(entity: &EntitySchema, operation: &'static str, predicate: impl ToString, source: StoreError) -> AppError {
    tracing::error!(entity = %entity.name, operation, error = %source, "storage failure");
    AppError::storage(&entity.name, operation, predicate, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_str;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn setup() -> (CrudService<MemoryStore>, Arc<EntitySchema>) {
        let reg = load_from_str(
            r#"{ "entities": [ { "name": "Tag", "fields": [
                { "name": "id", "type": "integer", "isPrimaryKey": true, "generated": true },
                { "name": "label", "type": "string", "nullable": false, "unique": true }
            ] } ] }"#,
        )
        .unwrap();
        let tag = reg.require("Tag").unwrap().clone();
        (CrudService::new(Arc::new(MemoryStore::new())), tag)
    }

    fn rec(v: Value) -> Record {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn find_one_keeps_the_page() {
        let (crud, tag) = setup();
        for label in ["a", "b", "c", "d", "e"] {
            crud.create_one(&tag, &rec(json!({ "label": label }))).await.unwrap();
        }
        let sorted = QueryDescriptor::new(Predicate::True).with_sort(vec![crate::query::SortKey::asc("id")]);
        let first = crud.find_one(&tag, &sorted).await.unwrap().unwrap();
        assert_eq!(first["label"], json!("a"));
        let paged = sorted.clone().with_pagination(2, 2);
        let third = crud.find_one(&tag, &paged).await.unwrap().unwrap();
        assert_eq!(third["label"], json!("c"));
        assert!(crud.find_one(&tag, &sorted.with_pagination(4, 2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_touches_updated_at_unless_set() {
        let (crud, tag) = setup();
        let row = crud.create_one(&tag, &rec(json!({ "label": "a" }))).await.unwrap();
        let pinned = "2001-01-01T00:00:00+00:00";
        let out = crud
            .update(
                &tag,
                &Predicate::eq("id", row["id"].clone()),
                &rec(json!({ "updated_at": pinned })),
            )
            .await
            .unwrap();
        assert_eq!(out[0]["updated_at"], json!(pinned));
        let out = crud
            .update(&tag, &Predicate::eq("id", row["id"].clone()), &rec(json!({ "label": "b" })))
            .await
            .unwrap();
        assert_ne!(out[0]["updated_at"], json!(pinned));
    }

    #[tokio::test]
    async fn storage_failures_carry_context() {
        let (crud, tag) = setup();
        crud.create_one(&tag, &rec(json!({ "label": "a" }))).await.unwrap();
        let err = crud.create_one(&tag, &rec(json!({ "label": "a" }))).await.unwrap_err();
        match err {
            AppError::Storage { ref entity, operation, source: StoreError::Conflict(_), .. } => {
                assert_eq!(entity, "Tag");
                assert_eq!(operation, "create");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_many_validates_before_inserting() {
        let (crud, tag) = setup();
        let batch = vec![rec(json!({ "label": "a" })), rec(json!({ "label": 7 }))];
        let err = crud
            .create_many(&tag, &batch, CreateManyOptions { validate: true })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationFailed(_)));
        assert_eq!(crud.count(&tag, &Predicate::True).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn create_many_without_validation_can_stop_part_way() {
        let (crud, tag) = setup();
        let batch = vec![rec(json!({ "label": "a" })), rec(json!({ "label": "a" }))];
        assert!(crud.create_many(&tag, &batch, CreateManyOptions::default()).await.is_err());
        assert_eq!(crud.count(&tag, &Predicate::True).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_defaults_to_primary_key() {
        let (crud, tag) = setup();
        let row = crud.create_one(&tag, &rec(json!({ "label": "a" }))).await.unwrap();
        let out = crud
            .upsert(&tag, &rec(json!({ "id": row["id"], "label": "z" })), &[])
            .await
            .unwrap();
        assert_eq!(out["label"], json!("z"));
        let by_label = crud
            .upsert(&tag, &rec(json!({ "label": "z" })), &["label".to_string()])
            .await
            .unwrap();
        assert_eq!(by_label["id"], row["id"]);
        assert_eq!(crud.count(&tag, &Predicate::True).await.unwrap(), 1);
        assert!(crud.upsert(&tag, &rec(json!({ "label": "q" })), &["nope".into()]).await.is_err());
    }

    #[tokio::test]
    async fn counted_rows_format() {
        let (crud, tag) = setup();
        for l in ["a", "b", "c"] {
            crud.create_one(&tag, &rec(json!({ "label": l }))).await.unwrap();
        }
        let q = QueryDescriptor::new(Predicate::True).with_pagination(1, 2);
        match crud.find_and_count_all(&tag, &q, ResultFormat::CountAndRows).await.unwrap() {
            FindAndCount::Counted(c) => {
                assert_eq!(c.count, 3);
                assert_eq!(c.rows.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        let env = crud
            .find_and_count_all(&tag, &QueryDescriptor::new(Predicate::True), ResultFormat::Envelope)
            .await
            .unwrap()
            .into_envelope();
        assert_eq!(env.paginator, Some(Paginator::new(3, DEFAULT_PER_PAGE, 1)));
    }
}
