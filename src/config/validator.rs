//! Schema document validation: naming, primary keys and relation integrity.

use crate::config::{FieldType, SchemaDocument};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

pub fn validate(doc: &SchemaDocument) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for e in &doc.entities {
        if !names.insert(e.name.as_str()) {
            return Err(ConfigError::DuplicateEntity(e.name.clone()));
        }
        let mut field_names = HashSet::new();
        for f in &e.fields {
            if !field_names.insert(f.name.as_str()) {
                return Err(ConfigError::DuplicateField {
                    entity: e.name.clone(),
                    field: f.name.clone(),
                });
            }
        }
        let pk_count = e.fields.iter().filter(|f| f.is_primary_key).count();
        if pk_count != 1 {
            return Err(ConfigError::PrimaryKey {
                entity: e.name.clone(),
                found: pk_count,
            });
        }
        let mut relation_names = HashSet::new();
        for r in &e.relations {
            if !relation_names.insert(r.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate relation {}.{}",
                    e.name, r.name
                )));
            }
            if !matches!(r.kind.to_lowercase().as_str(), "one" | "many") {
                return Err(ConfigError::Validation(format!(
                    "relation {}.{}: kind must be 'one' or 'many', got '{}'",
                    e.name, r.name, r.kind
                )));
            }
        }
    }

    let fields_by_entity: HashMap<&str, HashMap<&str, &str>> = doc
        .entities
        .iter()
        .map(|e| {
            let fields = e
                .fields
                .iter()
                .map(|f| (f.name.as_str(), f.type_.as_str()))
                .collect();
            (e.name.as_str(), fields)
        })
        .collect();

    for e in &doc.entities {
        for r in &e.relations {
            let target = fields_by_entity
                .get(r.target_entity.as_str())
                .ok_or_else(|| ConfigError::MissingReference {
                    kind: "entity",
                    id: r.target_entity.clone(),
                })?;
            if !target.contains_key(r.foreign_key.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "foreign key",
                    id: format!("{}.{}", r.target_entity, r.foreign_key),
                });
            }
            if r.soft_delete_aware {
                let is_bool = target
                    .get("is_deleted")
                    .map(|t| FieldType::parse(t) == FieldType::Boolean)
                    .unwrap_or(false);
                if !is_bool {
                    return Err(ConfigError::Validation(format!(
                        "relation {}.{} is softDeleteAware but {} has no boolean is_deleted field",
                        e.name, r.name, r.target_entity
                    )));
                }
            }
        }
    }

    Ok(())
}
