//! Build the schema registry from a schema document (in memory, string or file).

use crate::config::resolved::{EntitySchema, FieldDef, FieldType, RelationDef, RelationKind, SchemaRegistry};
use crate::config::types::*;
use crate::config::validate;
use crate::error::ConfigError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Build the registry from a document (validates first).
pub fn resolve(doc: &SchemaDocument) -> Result<SchemaRegistry, ConfigError> {
    validate(doc)?;

    let mut entities = Vec::with_capacity(doc.entities.len());
    let mut by_name = HashMap::new();

    for e in &doc.entities {
        let mut fields: Vec<FieldDef> = e.fields.iter().map(resolve_field).collect();
        if e.timestamps {
            for name in ["created_at", "updated_at"] {
                if !fields.iter().any(|f| f.name == name) {
                    fields.push(FieldDef {
                        name: name.to_string(),
                        field_type: FieldType::Date,
                        nullable: false,
                        unique: false,
                        primary_key: false,
                        array: false,
                        default: None,
                        generated: true,
                        pg_type: Some("timestamptz".into()),
                    });
                }
            }
        }
        let primary_key = fields
            .iter()
            .position(|f| f.primary_key)
            .ok_or_else(|| ConfigError::PrimaryKey {
                entity: e.name.clone(),
                found: 0,
            })?;
        let relations = e
            .relations
            .iter()
            .map(|r| RelationDef {
                name: r.name.clone(),
                kind: if r.kind.eq_ignore_ascii_case("one") {
                    RelationKind::One
                } else {
                    RelationKind::Many
                },
                target_entity: r.target_entity.clone(),
                foreign_key: r.foreign_key.clone(),
                soft_delete_aware: r.soft_delete_aware,
            })
            .collect();

        let entity = Arc::new(EntitySchema {
            name: e.name.clone(),
            schema_name: e.schema.clone().unwrap_or_else(|| "public".into()),
            table_name: e.table.clone().unwrap_or_else(|| e.name.clone()),
            fields,
            relations,
            primary_key,
        });
        by_name.insert(e.name.clone(), Arc::clone(&entity));
        entities.push(entity);
    }

    tracing::debug!(entities = entities.len(), "schema registry resolved");
    Ok(SchemaRegistry { entities, by_name })
}

fn resolve_field(f: &FieldConfig) -> FieldDef {
    FieldDef {
        name: f.name.clone(),
        field_type: FieldType::parse(&f.type_),
        // a primary key is never nullable
        nullable: f.nullable && !f.is_primary_key,
        unique: f.unique,
        primary_key: f.is_primary_key,
        array: f.array,
        default: f.default.clone(),
        generated: f.generated,
        pg_type: f.pg_type.clone(),
    }
}

/// Parse and resolve a registry from JSON text.
pub fn load_from_str(json: &str) -> Result<SchemaRegistry, ConfigError> {
    let doc: SchemaDocument = serde_json::from_str(json)?;
    resolve(&doc)
}

/// Read the schema document at `path` and resolve it.
pub async fn load_from_path(path: impl AsRef<Path>) -> Result<SchemaRegistry, ConfigError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    load_from_str(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIBRARY: &str = r#"{
        "entities": [
            {
                "name": "Author",
                "table": "authors",
                "fields": [
                    { "name": "id", "type": "integer", "isPrimaryKey": true, "generated": true },
                    { "name": "name", "type": "string", "nullable": false },
                    { "name": "is_deleted", "type": "boolean", "default": false }
                ],
                "relations": [
                    { "name": "books", "kind": "many", "targetEntity": "Book", "foreignKey": "author_id", "softDeleteAware": true }
                ]
            },
            {
                "name": "Book",
                "timestamps": false,
                "fields": [
                    { "name": "id", "type": "uuid", "isPrimaryKey": true },
                    { "name": "author_id", "type": "integer" },
                    { "name": "is_deleted", "type": "boolean" }
                ]
            }
        ]
    }"#;

    #[test]
    fn resolves_entities_in_order() {
        let registry = load_from_str(LIBRARY).unwrap();
        let author = registry.require("Author").unwrap();
        assert_eq!(author.table_name, "authors");
        assert_eq!(author.schema_name, "public");
        assert_eq!(author.primary_key().name, "id");
        let names: Vec<_> = author.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["id", "name", "is_deleted", "created_at", "updated_at"]);
        assert!(!author.primary_key().nullable);

        let book = registry.require("Book").unwrap();
        assert_eq!(book.table_name, "Book");
        assert!(!book.has_field("updated_at"));
        assert_eq!(book.primary_key().field_type, FieldType::Uuid);
        assert_eq!(author.relations[0].kind, RelationKind::Many);
    }

    #[test]
    fn unknown_entity_is_reported() {
        let registry = load_from_str(LIBRARY).unwrap();
        assert!(matches!(
            registry.require("Shelf"),
            Err(crate::error::AppError::UnknownEntity(name)) if name == "Shelf"
        ));
    }

    #[test]
    fn rejects_dangling_foreign_key() {
        let bad = LIBRARY.replace("\"foreignKey\": \"author_id\"", "\"foreignKey\": \"writer_id\"");
        assert!(matches!(
            load_from_str(&bad),
            Err(ConfigError::MissingReference { kind: "foreign key", .. })
        ));
    }

    #[test]
    fn rejects_soft_delete_target_without_flag() {
        let bad = LIBRARY.replace(
            "{ \"name\": \"is_deleted\", \"type\": \"boolean\" }",
            "{ \"name\": \"title\", \"type\": \"string\" }",
        );
        assert!(matches!(load_from_str(&bad), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn requires_single_primary_key() {
        let bad = LIBRARY.replace(
            "{ \"name\": \"id\", \"type\": \"uuid\", \"isPrimaryKey\": true }",
            "{ \"name\": \"id\", \"type\": \"uuid\" }",
        );
        assert!(matches!(
            load_from_str(&bad),
            Err(ConfigError::PrimaryKey { found: 0, .. })
        ));
    }

    #[test]
    fn parses_keys_by_primary_key_type() {
        let registry = load_from_str(LIBRARY).unwrap();
        let author = registry.require("Author").unwrap();
        assert_eq!(author.parse_key("42").unwrap(), serde_json::json!(42));
        assert!(author.parse_key("forty-two").is_err());
    }
}
