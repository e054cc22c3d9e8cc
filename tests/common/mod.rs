#![allow(dead_code)]

use schema_crud::{load_from_str, AppState, EngineSettings, MemoryStore, Record, SchemaRegistry};
use serde_json::Value;
use std::sync::Arc;

pub const LIBRARY: &str = r#"{
  "entities": [
    {
      "name": "Author",
      "table": "authors",
      "fields": [
        { "name": "id", "type": "integer", "isPrimaryKey": true, "generated": true },
        { "name": "name", "type": "string", "nullable": false },
        { "name": "email", "type": "string", "unique": true },
        { "name": "is_deleted", "type": "boolean", "nullable": false, "default": false }
      ],
      "relations": [
        { "name": "books", "kind": "many", "targetEntity": "Book", "foreignKey": "author_id", "softDeleteAware": true },
        { "name": "profile", "kind": "one", "targetEntity": "Profile", "foreignKey": "author_id", "softDeleteAware": true },
        { "name": "awards", "kind": "many", "targetEntity": "Award", "foreignKey": "author_id" }
      ]
    },
    {
      "name": "Book",
      "table": "books",
      "fields": [
        { "name": "id", "type": "integer", "isPrimaryKey": true, "generated": true },
        { "name": "author_id", "type": "integer" },
        { "name": "title", "type": "string", "nullable": false },
        { "name": "isbn", "type": "string", "unique": true },
        { "name": "year", "type": "integer" },
        { "name": "tags", "type": "string", "array": true },
        { "name": "is_deleted", "type": "boolean", "nullable": false, "default": false }
      ],
      "relations": [
        { "name": "reviews", "kind": "many", "targetEntity": "Review", "foreignKey": "book_id" }
      ]
    },
    {
      "name": "Profile",
      "fields": [
        { "name": "id", "type": "integer", "isPrimaryKey": true, "generated": true },
        { "name": "author_id", "type": "integer" },
        { "name": "bio", "type": "string" },
        { "name": "is_deleted", "type": "boolean", "nullable": false, "default": false }
      ]
    },
    {
      "name": "Award",
      "fields": [
        { "name": "id", "type": "integer", "isPrimaryKey": true, "generated": true },
        { "name": "author_id", "type": "integer" },
        { "name": "title", "type": "string" },
        { "name": "is_deleted", "type": "boolean", "nullable": false, "default": false }
      ]
    },
    {
      "name": "Review",
      "timestamps": false,
      "fields": [
        { "name": "id", "type": "integer", "isPrimaryKey": true, "generated": true },
        { "name": "book_id", "type": "integer" },
        { "name": "stars", "type": "integer" }
      ]
    }
  ]
}"#;

pub fn registry() -> SchemaRegistry {
    load_from_str(LIBRARY).expect("library schema")
}

pub fn state_with<S: schema_crud::StorageAdapter>(store: S) -> AppState<S> {
    AppState::new(Arc::new(store), registry(), EngineSettings::default())
}

pub fn state() -> AppState<MemoryStore> {
    state_with(MemoryStore::new())
}

pub fn rec(v: Value) -> Record {
    match v {
        Value::Object(m) => m,
        other => panic!("not an object: {other}"),
    }
}

/// Insert every object of `rows` into `entity`, returning the stored rows.
pub async fn seed<S: schema_crud::StorageAdapter>(state: &AppState<S>, entity: &str, rows: Value) -> Vec<Record> {
    let schema = state.registry.require(entity).expect("entity").clone();
    let crud = state.crud();
    let mut out = Vec::new();
    for row in rows.as_array().expect("array of rows") {
        out.push(crud.create_one(&schema, &rec(row.clone())).await.expect("seed row"));
    }
    out
}

pub fn ids(rows: &[Record]) -> Vec<i64> {
    rows.iter().filter_map(|r| r.get("id").and_then(Value::as_i64)).collect()
}
