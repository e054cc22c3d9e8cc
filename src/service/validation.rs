//! Payload validation from the entity schema.

use crate::config::{EntitySchema, FieldDef, FieldType};
use crate::error::{AppError, ValidationError};
use crate::filter::Predicate;
use crate::service::crud::CrudService;
use crate::store::{Record, StorageAdapter};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationMode {
    /// Required fields and uniqueness are enforced.
    Create,
    /// Only the fields present are checked.
    Update,
}

/// Canonical textual uuid, versions 1 to 5.
fn is_uuid(s: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[1-5][0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$").ok()
    })
    .as_ref()
    .map_or(false, |re| re.is_match(s))
}

pub struct FieldValidator<'a> {
    entity: &'a EntitySchema,
    allow_unknown: bool,
}

impl<'a> FieldValidator<'a> {
    pub fn new(entity: &'a EntitySchema) -> Self {
        FieldValidator {
            entity,
            allow_unknown: false,
        }
    }

    pub fn allow_unknown(mut self, allow: bool) -> Self {
        self.allow_unknown = allow;
        self
    }

    /// Checks that need no store: unknown keys, required fields (create only), then types.
    pub fn check(&self, payload: &Record, mode: ValidationMode) -> Result<(), ValidationError> {
        if !self.allow_unknown {
            let unknown: Vec<String> = payload
                .keys()
                .filter(|k| !self.entity.has_field(k))
                .cloned()
                .collect();
            if !unknown.is_empty() {
                return Err(ValidationError::UnknownFields(unknown));
            }
        }
        if mode == ValidationMode::Create {
            for f in &self.entity.fields {
                if f.nullable || f.has_default() {
                    continue;
                }
                if payload.get(&f.name).map_or(true, Value::is_null) {
                    return Err(ValidationError::MissingField(f.name.clone()));
                }
            }
        }
        for (key, value) in payload {
            let Some(f) = self.entity.field(key) else {
                continue;
            };
            if !value.is_null() && !accepts(f, value) {
                return Err(ValidationError::TypeMismatch {
                    field: f.name.clone(),
                    expected: expected(f),
                });
            }
        }
        Ok(())
    }

    /// Full validation. On create, each unique field with a value is looked up
    /// in the store after the static checks pass.
    pub async fn validate<S: StorageAdapter + ?Sized>(
        &self,
        crud: &CrudService<S>,
        payload: &Record,
        mode: ValidationMode,
    ) -> Result<(), AppError> {
        self.check(payload, mode)?;
        if mode != ValidationMode::Create {
            return Ok(());
        }
        for f in self.entity.fields.iter().filter(|f| f.unique) {
            let Some(value) = payload.get(&f.name).filter(|v| !v.is_null()) else {
                continue;
            };
            let taken = crud
                .count(self.entity, &Predicate::eq(f.name.clone(), value.clone()))
                .await?;
            if taken > 0 {
                return Err(AppError::DuplicateValue {
                    field: f.name.clone(),
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }
}

fn expected(f: &FieldDef) -> String {
    if f.array {
        format!("{}[]", f.field_type)
    } else {
        f.field_type.to_string()
    }
}

fn accepts(f: &FieldDef, value: &Value) -> bool {
    if f.array {
        return match value {
            Value::Array(items) => items
                .iter()
                .all(|i| i.is_null() || accepts_scalar(&f.field_type, i)),
            _ => false,
        };
    }
    accepts_scalar(&f.field_type, value)
}

fn accepts_scalar(t: &FieldType, value: &Value) -> bool {
    match t {
        FieldType::String => value.is_string(),
        FieldType::Integer => {
            value.is_i64() || value.is_u64() || value.as_f64().map_or(false, |f| f.is_finite() && f.fract() == 0.0)
        }
        FieldType::Float => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Date => value.as_str().map_or(false, is_date),
        FieldType::Uuid => value.as_str().map_or(false, is_uuid),
        FieldType::Json => value.is_object() || value.is_array(),
        FieldType::Other(_) => true,
    }
}

/// RFC 3339, `YYYY-MM-DD`, or `YYYY-MM-DD[ T]HH:MM:SS[.fff]`.
fn is_date(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").is_ok()
}
