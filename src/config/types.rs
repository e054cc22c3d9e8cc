//! Raw schema document types, as read from the registry JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchemaDocument {
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityConfig {
    pub name: String,
    /// Table name; defaults to the entity name.
    #[serde(default)]
    pub table: Option<String>,
    /// PostgreSQL schema; defaults to `public`.
    #[serde(default)]
    pub schema: Option<String>,
    /// Adds `created_at` / `updated_at` when they are not declared.
    #[serde(default = "default_true")]
    pub timestamps: bool,
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub relations: Vec<RelationConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub is_primary_key: bool,
    /// Multi-valued (array) column.
    #[serde(default)]
    pub array: bool,
    #[serde(default)]
    pub default: Option<Value>,
    /// Value produced by the store (serial, gen_random_uuid(), ...).
    #[serde(default)]
    pub generated: bool,
    #[serde(default)]
    pub pg_type: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationConfig {
    pub name: String,
    pub kind: String,
    pub target_entity: String,
    /// Column on the target entity holding this entity's primary key.
    pub foreign_key: String,
    #[serde(default)]
    pub soft_delete_aware: bool,
}

fn default_true() -> bool {
    true
}
