//! Entity handlers: create, get by key, list, update, soft delete.
//!
//! Each handler takes an already-authenticated payload and returns a `Reply`
//! (or an `AppError`), both of which render as axum responses.

use crate::config::EntitySchema;
use crate::error::AppError;
use crate::filter::{Filter, Predicate};
use crate::query::{FindOptions, IncludeInput, PaginationInput, SortInput};
use crate::response::{Envelope, Reply};
use crate::service::{FieldValidator, ResultFormat, ValidationMode};
use crate::state::AppState;
use crate::store::{Record, StorageAdapter};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

const SOFT_DELETE_FLAG: &str = "is_deleted";

/// Per-entity handler policy.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerOptions {
    /// Checked on update against every other row.
    #[serde(default)]
    pub unique_fields: Vec<String>,
    #[serde(default)]
    pub allow_unknown: bool,
    /// Includes applied to get-by-key and list.
    #[serde(default)]
    pub include: Vec<IncludeInput>,
    #[serde(default)]
    pub attributes: Option<Vec<String>>,
}

/// List request body: `{filters, pagination?, sort?}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ListRequest {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub pagination: Option<PaginationInput>,
    #[serde(default)]
    pub sort: Option<SortInput>,
}

pub struct HandlerFactory<S: ?Sized> {
    state: AppState<S>,
}

impl<S: StorageAdapter + ?Sized> HandlerFactory<S> {
    pub fn new(state: AppState<S>) -> Self {
        HandlerFactory { state }
    }

    /// Handlers of one entity. Unknown entity names and unknown option fields fail here.
    pub fn entity(&self, name: &str, options: HandlerOptions) -> Result<EntityHandlers<S>, AppError> {
        let entity = Arc::clone(self.state.registry.require(name)?);
        for f in &options.unique_fields {
            if !entity.has_field(f) {
                return Err(AppError::BadRequest(format!(
                    "unique field '{}' is not a field of {}",
                    f, entity.name
                )));
            }
        }
        Ok(EntityHandlers {
            state: self.state.clone(),
            entity,
            options,
        })
    }
}

pub struct EntityHandlers<S: ?Sized> {
    state: AppState<S>,
    entity: Arc<EntitySchema>,
    options: HandlerOptions,
}

fn body_to_record(value: Value) -> Result<Record, AppError> {
    match value {
        Value::Object(m) => Ok(m),
        _ => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}

impl<S: StorageAdapter + ?Sized> EntityHandlers<S> {
    pub fn entity(&self) -> &EntitySchema {
        &self.entity
    }

    fn validator(&self) -> FieldValidator<'_> {
        FieldValidator::new(&self.entity).allow_unknown(self.options.allow_unknown)
    }

    fn key_predicate(&self, key: &Value) -> Predicate {
        Predicate::eq(self.entity.primary_key().name.clone(), key.clone())
    }

    fn not_found(&self, key: &str) -> AppError {
        AppError::RecordNotFound {
            entity: self.entity.name.clone(),
            key: key.to_string(),
        }
    }

    fn find_options(&self) -> FindOptions {
        FindOptions {
            include: self.options.include.clone(),
            attributes: self.options.attributes.clone(),
            ..FindOptions::default()
        }
    }

    /// Validate in create mode, insert, reply `201`.
    pub async fn create(&self, payload: Value) -> Result<Reply, AppError> {
        let record = body_to_record(payload)?;
        let crud = self.state.crud();
        self.validator()
            .validate(&crud, &record, ValidationMode::Create)
            .await?;
        let row = crud.create_one(&self.entity, &record).await?;
        Ok(Reply::created(row))
    }

    pub async fn get_by_key(&self, key: &str) -> Result<Reply, AppError> {
        let id = self.entity.parse_key(key)?;
        let query = self.state.composer().compose(&self.entity, &self.find_options())?;
        let row = self
            .state
            .crud()
            .find_by_key(&self.entity, &id, &query)
            .await?
            .ok_or_else(|| self.not_found(key))?;
        Ok(Reply::fetched(Envelope::data(row)))
    }

    /// Filter, sort and paginate; the envelope carries a paginator.
    pub async fn list(&self, request: ListRequest) -> Result<Reply, AppError> {
        let options = FindOptions {
            filters: request.filters,
            sort: request.sort,
            pagination: request.pagination,
            ..self.find_options()
        };
        let query = self.state.composer().compose(&self.entity, &options)?;
        let envelope = self
            .state
            .crud()
            .find_and_count_all(&self.entity, &query, ResultFormat::Envelope)
            .await?
            .into_envelope();
        Ok(Reply::fetched(envelope))
    }

    /// The row must exist; the payload is validated in update mode and each
    /// configured unique field must not be held by another row.
    pub async fn update(&self, key: &str, payload: Value) -> Result<Reply, AppError> {
        let id = self.entity.parse_key(key)?;
        let record = body_to_record(payload)?;
        let crud = self.state.crud();
        let by_key = self.key_predicate(&id);
        if crud.count(&self.entity, &by_key).await? == 0 {
            return Err(self.not_found(key));
        }
        self.validator()
            .validate(&crud, &record, ValidationMode::Update)
            .await?;
        let pk = &self.entity.primary_key().name;
        for field in &self.options.unique_fields {
            let Some(value) = record.get(field).filter(|v| !v.is_null()) else {
                continue;
            };
            let others = Predicate::And(vec![
                Predicate::eq(field.clone(), value.clone()),
                Predicate::ne(pk.clone(), id.clone()),
            ]);
            if crud.count(&self.entity, &others).await? > 0 {
                return Err(AppError::UniqueConstraintViolation {
                    field: field.clone(),
                    value: value.clone(),
                });
            }
        }
        let rows = crud.update(&self.entity, &by_key, &record).await?;
        Ok(Reply::updated(Value::Array(
            rows.into_iter().map(Value::Object).collect(),
        )))
    }

    /// Flag the row, then flag rows of every soft-delete-aware relation whose
    /// foreign key holds the key, in declaration order. One level only.
    pub async fn soft_delete(&self, key: &str) -> Result<Reply, AppError> {
        if !self.entity.has_field(SOFT_DELETE_FLAG) {
            return Err(AppError::BadRequest(format!(
                "{} has no {} field",
                self.entity.name, SOFT_DELETE_FLAG
            )));
        }
        let id = self.entity.parse_key(key)?;
        let crud = self.state.crud();
        let mut flag = Record::new();
        flag.insert(SOFT_DELETE_FLAG.into(), Value::Bool(true));

        let flagged = crud.update(&self.entity, &self.key_predicate(&id), &flag).await?;
        if flagged.is_empty() {
            return Err(self.not_found(key));
        }

        let mut completed = Vec::new();
        for relation in self.entity.relations.iter().filter(|r| r.soft_delete_aware) {
            let cascaded = match self.state.registry.require(&relation.target_entity) {
                Ok(target) => {
                    crud.update(target, &Predicate::eq(relation.foreign_key.clone(), id.clone()), &flag)
                        .await
                }
                Err(e) => Err(e),
            };
            match cascaded {
                Ok(rows) => {
                    tracing::info!(
                        entity = %self.entity.name,
                        relation = %relation.name,
                        affected = rows.len(),
                        "soft delete cascaded"
                    );
                    completed.push(relation.name.clone());
                }
                Err(source) => {
                    tracing::warn!(
                        entity = %self.entity.name,
                        key,
                        completed = ?completed,
                        failed = %relation.name,
                        "soft delete cascade stopped"
                    );
                    return Err(AppError::PartialCascadeFailure {
                        entity: self.entity.name.clone(),
                        key: key.to_string(),
                        completed,
                        failed: relation.name.clone(),
                        source: Box::new(source),
                    });
                }
            }
        }
        Ok(Reply::deleted(json!({})))
    }
}
