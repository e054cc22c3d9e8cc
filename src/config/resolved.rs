//! Resolved schema registry: documents validated and flattened for runtime use.

use crate::error::AppError;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Declared type of a field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Uuid,
    Json,
    /// Type name the engine does not know; values pass through unchecked.
    Other(String),
}

impl FieldType {
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "string" | "text" => FieldType::String,
            "integer" | "int" | "bigint" => FieldType::Integer,
            "float" | "double" | "decimal" | "number" => FieldType::Float,
            "boolean" | "bool" => FieldType::Boolean,
            "date" | "datetime" | "timestamp" => FieldType::Date,
            "uuid" => FieldType::Uuid,
            "json" | "jsonb" => FieldType::Json,
            _ => FieldType::Other(name.to_string()),
        }
    }

    /// Default PostgreSQL type used to cast bound parameters.
    pub fn pg_cast(&self) -> Option<&'static str> {
        match self {
            FieldType::String => Some("text"),
            FieldType::Integer => Some("bigint"),
            FieldType::Float => Some("double precision"),
            FieldType::Boolean => Some("boolean"),
            FieldType::Date => Some("timestamptz"),
            FieldType::Uuid => Some("uuid"),
            FieldType::Json => Some("jsonb"),
            FieldType::Other(_) => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => f.write_str("string"),
            FieldType::Integer => f.write_str("integer"),
            FieldType::Float => f.write_str("float"),
            FieldType::Boolean => f.write_str("boolean"),
            FieldType::Date => f.write_str("date"),
            FieldType::Uuid => f.write_str("uuid"),
            FieldType::Json => f.write_str("json"),
            FieldType::Other(name) => f.write_str(name),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub array: bool,
    pub default: Option<Value>,
    pub generated: bool,
    pub pg_type: Option<String>,
}

impl FieldDef {
    /// Whether the store fills the value when the payload omits it.
    pub fn has_default(&self) -> bool {
        self.default.is_some() || self.generated
    }

    /// Cast applied to bound parameters for this column (element type for arrays).
    pub fn cast(&self) -> Option<String> {
        match &self.pg_type {
            Some(t) => Some(t.trim_end_matches("[]").to_string()),
            None => self.field_type.pg_cast().map(str::to_string),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationKind {
    One,
    Many,
}

/// Relation from an entity to the rows of `target_entity` whose `foreign_key` holds its primary key.
#[derive(Clone, Debug)]
pub struct RelationDef {
    pub name: String,
    pub kind: RelationKind,
    pub target_entity: String,
    pub foreign_key: String,
    pub soft_delete_aware: bool,
}

#[derive(Clone, Debug)]
pub struct EntitySchema {
    pub name: String,
    pub schema_name: String,
    pub table_name: String,
    pub fields: Vec<FieldDef>,
    pub relations: Vec<RelationDef>,
    pub(crate) primary_key: usize,
}

impl EntitySchema {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn primary_key(&self) -> &FieldDef {
        &self.fields[self.primary_key]
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Parse a key given as text (e.g. a path segment) according to the primary key type.
    pub fn parse_key(&self, key: &str) -> Result<Value, AppError> {
        let pk = self.primary_key();
        Ok(match pk.field_type {
            FieldType::Uuid => {
                let u = uuid::Uuid::parse_str(key)
                    .map_err(|_| AppError::BadRequest(format!("invalid uuid key '{}'", key)))?;
                Value::String(u.to_string())
            }
            FieldType::Integer => {
                let n: i64 = key
                    .parse()
                    .map_err(|_| AppError::BadRequest(format!("invalid integer key '{}'", key)))?;
                Value::Number(n.into())
            }
            _ => Value::String(key.to_string()),
        })
    }
}

/// Read-only set of entity schemas, built once at startup.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    pub entities: Vec<Arc<EntitySchema>>,
    pub(crate) by_name: HashMap<String, Arc<EntitySchema>>,
}

impl SchemaRegistry {
    pub fn get(&self, name: &str) -> Option<&Arc<EntitySchema>> {
        self.by_name.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&Arc<EntitySchema>, AppError> {
        self.get(name)
            .ok_or_else(|| AppError::UnknownEntity(name.to_string()))
    }
}
