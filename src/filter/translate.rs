//! Operator translator: filter expressions to predicates, scoped to one entity.
//!
//! Pure: the schema is only read and no storage is touched.

use crate::config::{EntitySchema, FieldDef, FieldType};
use crate::error::AppError;
use crate::filter::{Comparison, Filter, Operator, Predicate};
use serde_json::Value;

/// Translate a list of filters joined by AND.
pub fn translate_all(entity: &EntitySchema, filters: &[Filter]) -> Result<Predicate, AppError> {
    let preds = filters
        .iter()
        .map(|f| translate(entity, f))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Predicate::all(preds))
}

pub fn translate(entity: &EntitySchema, filter: &Filter) -> Result<Predicate, AppError> {
    match filter {
        Filter::Group {
            combinator,
            children,
        } => {
            let preds = children
                .iter()
                .map(|c| translate(entity, c))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(match combinator {
                crate::filter::Combinator::And => Predicate::And(preds),
                crate::filter::Combinator::Or => Predicate::Or(preds),
            })
        }
        Filter::Condition {
            field,
            operator,
            value,
        } => {
            let op = Operator::parse(operator).ok_or_else(|| AppError::UnsupportedOperator {
                operator: operator.clone(),
                field: field.clone(),
            })?;
            let def = entity.field(field).ok_or_else(|| {
                AppError::InvalidFilter(format!("unknown field '{}' on {}", field, entity.name))
            })?;
            condition(def, op, value)
        }
    }
}

fn condition(def: &FieldDef, op: Operator, value: &Value) -> Result<Predicate, AppError> {
    let field = def.name.clone();
    let compare = |cmp: Comparison| Predicate::Compare {
        field: def.name.clone(),
        op: cmp,
        value: value.clone(),
    };
    Ok(match op {
        Operator::Eq => compare(Comparison::Eq),
        Operator::Ne => compare(Comparison::Ne),
        Operator::Gt | Operator::Lt | Operator::Gte | Operator::Lte => {
            require_scalar(def, op, value)?;
            compare(match op {
                Operator::Gt => Comparison::Gt,
                Operator::Lt => Comparison::Lt,
                Operator::Gte => Comparison::Gte,
                _ => Comparison::Lte,
            })
        }
        Operator::Like => {
            let needle = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return Err(invalid_value(def, op, "expected a string")),
            };
            Predicate::Like { field, needle }
        }
        // `any` is equality against any listed element, the same predicate as `in`
        Operator::In | Operator::Any => Predicate::In {
            field,
            values: require_array(def, op, value)?,
        },
        Operator::Nin => Predicate::NotIn {
            field,
            values: require_array(def, op, value)?,
        },
        Operator::Between => match value {
            Value::Array(pair) if pair.len() == 2 => {
                for bound in pair {
                    require_scalar(def, op, bound)?;
                }
                Predicate::Between {
                    field,
                    low: pair[0].clone(),
                    high: pair[1].clone(),
                }
            }
            _ => {
                return Err(invalid_value(
                    def,
                    op,
                    "expected a two-element array [low, high]",
                ))
            }
        },
        Operator::Overlap => {
            if !def.array {
                return Err(AppError::InvalidFilter(format!(
                    "'overlap' requires a multi-valued field, '{}' is not",
                    def.name
                )));
            }
            Predicate::Overlap {
                field,
                values: require_array(def, op, value)?,
            }
        }
        Operator::Contains => {
            if def.array {
                let values = match value {
                    Value::Array(items) => items.clone(),
                    Value::Null => return Err(invalid_value(def, op, "expected a value")),
                    scalar => vec![scalar.clone()],
                };
                Predicate::Contains {
                    field,
                    value: Value::Array(values),
                }
            } else if def.field_type == FieldType::Json {
                Predicate::Contains {
                    field,
                    value: value.clone(),
                }
            } else {
                return Err(AppError::InvalidFilter(format!(
                    "'contains' requires a multi-valued or json field, '{}' is {}",
                    def.name, def.field_type
                )));
            }
        }
        Operator::And | Operator::Or => {
            return Err(AppError::InvalidFilter(format!(
                "'{}' on field '{}' needs children",
                op, def.name
            )))
        }
    })
}

fn require_scalar(def: &FieldDef, op: Operator, value: &Value) -> Result<(), AppError> {
    match value {
        Value::Null | Value::Array(_) | Value::Object(_) => {
            Err(invalid_value(def, op, "expected a scalar value"))
        }
        _ => Ok(()),
    }
}

fn require_array(def: &FieldDef, op: Operator, value: &Value) -> Result<Vec<Value>, AppError> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(invalid_value(def, op, "expected an array")),
    }
}

fn invalid_value(def: &FieldDef, op: Operator, reason: &str) -> AppError {
    AppError::InvalidOperatorValue {
        operator: op.as_str().to_string(),
        field: def.name.clone(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_str;
    use serde_json::json;
    use std::sync::Arc;

    fn books() -> Arc<EntitySchema> {
        let registry = load_from_str(
            r#"{ "entities": [ { "name": "Book", "fields": [
                { "name": "id", "type": "integer", "isPrimaryKey": true },
                { "name": "title", "type": "string" },
                { "name": "year", "type": "integer" },
                { "name": "location", "type": "string", "array": true },
                { "name": "meta", "type": "json" }
            ] } ] }"#,
        )
        .unwrap();
        Arc::clone(registry.require("Book").unwrap())
    }

    #[test]
    fn between_needs_a_pair() {
        let book = books();
        for bad in [json!([1990]), json!([1, 2, 3]), json!(1990), json!("1990,2000")] {
            let err = translate(&book, &Filter::condition("year", Operator::Between, bad)).unwrap_err();
            assert!(
                matches!(&err, AppError::InvalidOperatorValue { field, .. } if field == "year"),
                "{err}"
            );
        }
        let ok = translate(&book, &Filter::condition("year", Operator::Between, json!([1990, 2000]))).unwrap();
        assert_eq!(
            ok,
            Predicate::Between {
                field: "year".into(),
                low: json!(1990),
                high: json!(2000)
            }
        );
    }

    #[test]
    fn unsupported_operator_names_field() {
        let book = books();
        let f = Filter::Condition {
            field: "title".into(),
            operator: "regex".into(),
            value: json!("^a"),
        };
        assert!(matches!(
            translate(&book, &f),
            Err(AppError::UnsupportedOperator { operator, field }) if operator == "regex" && field == "title"
        ));
    }

    #[test]
    fn unknown_field_is_invalid_filter() {
        let book = books();
        let f = Filter::condition("isbn", Operator::Eq, json!("x"));
        assert!(matches!(translate(&book, &f), Err(AppError::InvalidFilter(_))));
    }

    #[test]
    fn overlap_takes_the_ordinary_path_for_every_field() {
        let book = books();
        let p = translate(&book, &Filter::condition("location", Operator::Overlap, json!(["a", "b"]))).unwrap();
        assert_eq!(
            p,
            Predicate::Overlap {
                field: "location".into(),
                values: vec![json!("a"), json!("b")]
            }
        );
        let err = translate(&book, &Filter::condition("title", Operator::Overlap, json!(["a"]))).unwrap_err();
        assert!(matches!(err, AppError::InvalidFilter(_)));
    }

    #[test]
    fn groups_translate_recursively() {
        let book = books();
        let f = Filter::and(vec![
            Filter::condition("title", Operator::Like, json!("dune")),
            Filter::or(vec![
                Filter::condition("year", Operator::Lt, json!(1970)),
                Filter::condition("meta", Operator::Contains, json!({ "award": "hugo" })),
            ]),
        ]);
        let p = translate(&book, &f).unwrap();
        assert_eq!(
            p.to_string(),
            r#"(title ILIKE '%dune%' AND (year < 1970 OR meta @> {"award":"hugo"}))"#
        );
    }

    #[test]
    fn combinator_as_leaf_is_rejected() {
        let book = books();
        let f = Filter::condition("year", Operator::And, json!(1));
        assert!(matches!(translate(&book, &f), Err(AppError::InvalidFilter(_))));
    }

    #[test]
    fn list_is_implicit_and() {
        let book = books();
        let p = translate_all(
            &book,
            &[
                Filter::condition("year", Operator::Gte, json!(1960)),
                Filter::condition("id", Operator::Nin, json!([1, 2])),
            ],
        )
        .unwrap();
        assert!(matches!(p, Predicate::And(ref items) if items.len() == 2));
        assert_eq!(translate_all(&book, &[]).unwrap(), Predicate::True);
    }
}
