//! Query composer: caller options to a query descriptor.
//!
//! Includes are resolved depth-first through the registry. The recursion is
//! bounded by `max_depth` and refuses to revisit an entity already on the
//! current include path, so cyclic relation graphs are rejected instead of
//! expanded.

use crate::config::{EntitySchema, RelationDef, SchemaRegistry, DEFAULT_MAX_INCLUDE_DEPTH};
use crate::error::AppError;
use crate::filter::{translate_all, Filter, FilterInput};
use crate::query::{Aggregation, Direction, Pagination, QueryDescriptor, ResolvedInclude, SortKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Sort as sent by callers: `{sortBy, sortOrder}`, `{field: 1|-1|"asc"|"desc", ...}` or `[[field, dir], ...]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortInput {
    Keyed {
        #[serde(rename = "sortBy")]
        sort_by: String,
        #[serde(rename = "sortOrder", default)]
        sort_order: Option<Value>,
    },
    Pairs(Vec<(String, Value)>),
    Fields(Map<String, Value>),
}

/// Page and limit, as numbers or numeric strings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PaginationInput {
    #[serde(default)]
    pub page: Option<Value>,
    #[serde(default)]
    pub limit: Option<Value>,
}

impl PaginationInput {
    pub fn new(page: u32, limit: u32) -> Self {
        PaginationInput {
            page: Some(page.into()),
            limit: Some(limit.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncludeInput {
    /// Target entity name.
    pub model: String,
    /// Relation name, when several relations reach the same entity.
    #[serde(default, rename = "as")]
    pub alias: Option<String>,
    #[serde(default, rename = "where", alias = "query")]
    pub filter: Option<FilterInput>,
    #[serde(default)]
    pub include: Vec<IncludeInput>,
}

impl IncludeInput {
    pub fn model(model: impl Into<String>) -> Self {
        IncludeInput {
            model: model.into(),
            alias: None,
            filter: None,
            include: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationInput {
    pub group_by: String,
    pub count_distinct: String,
}

/// Caller-supplied query options for one entity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindOptions {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub sort: Option<SortInput>,
    #[serde(default)]
    pub pagination: Option<PaginationInput>,
    #[serde(default)]
    pub include: Vec<IncludeInput>,
    #[serde(default)]
    pub attributes: Option<Vec<String>>,
    #[serde(default, alias = "groupCount")]
    pub aggregation: Option<AggregationInput>,
}

pub struct QueryComposer<'a> {
    registry: &'a SchemaRegistry,
    max_depth: usize,
}

impl<'a> QueryComposer<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        QueryComposer {
            registry,
            max_depth: DEFAULT_MAX_INCLUDE_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn compose(&self, entity: &EntitySchema, options: &FindOptions) -> Result<QueryDescriptor, AppError> {
        let predicate = translate_all(entity, &options.filters)?;
        let sort = self.sort(entity, options.sort.as_ref())?;
        let pagination = pagination(options.pagination.as_ref());
        let includes = self.includes(entity, &options.include)?;
        let projection = match &options.attributes {
            Some(attrs) if !attrs.is_empty() => {
                for a in attrs {
                    known_field(entity, a, "attribute")?;
                }
                Some(attrs.clone())
            }
            _ => None,
        };
        let aggregation = match &options.aggregation {
            Some(a) => {
                known_field(entity, &a.group_by, "groupBy")?;
                known_field(entity, &a.count_distinct, "countDistinct")?;
                Some(Aggregation {
                    group_by: a.group_by.clone(),
                    count_distinct: a.count_distinct.clone(),
                })
            }
            None => None,
        };
        Ok(QueryDescriptor {
            predicate,
            sort,
            pagination,
            includes,
            projection,
            aggregation,
        })
    }

    /// Sort keys; without input, `updated_at` ascending (primary key when the entity has no `updated_at`).
    pub fn sort(&self, entity: &EntitySchema, input: Option<&SortInput>) -> Result<Vec<SortKey>, AppError> {
        let keys = match input {
            None => Vec::new(),
            Some(SortInput::Keyed {
                sort_by,
                sort_order,
            }) => vec![SortKey {
                field: sort_by.clone(),
                direction: sort_order
                    .as_ref()
                    .map(Direction::from_token)
                    .unwrap_or(Direction::Asc),
            }],
            Some(SortInput::Pairs(pairs)) => pairs
                .iter()
                .map(|(field, dir)| SortKey {
                    field: field.clone(),
                    direction: Direction::from_token(dir),
                })
                .collect(),
            Some(SortInput::Fields(map)) => map
                .iter()
                .map(|(field, dir)| SortKey {
                    field: field.clone(),
                    direction: Direction::from_token(dir),
                })
                .collect(),
        };
        if keys.is_empty() {
            return Ok(vec![default_sort(entity)]);
        }
        for k in &keys {
            known_field(entity, &k.field, "sort field")?;
        }
        Ok(keys)
    }

    pub fn includes(&self, entity: &EntitySchema, inputs: &[IncludeInput]) -> Result<Vec<ResolvedInclude>, AppError> {
        let mut path = vec![entity.name.clone()];
        inputs
            .iter()
            .map(|i| self.resolve_include(entity, i, 1, &mut path))
            .collect()
    }

    fn resolve_include(
        &self,
        parent: &EntitySchema,
        input: &IncludeInput,
        depth: usize,
        path: &mut Vec<String>,
    ) -> Result<ResolvedInclude, AppError> {
        if depth > self.max_depth {
            return Err(AppError::InvalidInclude(format!(
                "include depth exceeds {} at '{}'",
                self.max_depth, input.model
            )));
        }
        let target = self
            .registry
            .get(&input.model)
            .ok_or_else(|| AppError::InvalidInclude(format!("unknown model '{}'", input.model)))?;
        let relation = find_relation(parent, input)?;
        if path.iter().any(|seen| *seen == target.name) {
            return Err(AppError::InvalidInclude(format!(
                "relation cycle: {} -> {}",
                path.join(" -> "),
                target.name
            )));
        }

        let predicate = match &input.filter {
            Some(f) => Some(translate_all(target, &f.clone().into_filters())?),
            None => None,
        };

        path.push(target.name.clone());
        let nested = input
            .include
            .iter()
            .map(|i| self.resolve_include(target, i, depth + 1, path))
            .collect::<Result<Vec<_>, _>>();
        path.pop();

        Ok(ResolvedInclude {
            relation: relation.clone(),
            target: Arc::clone(target),
            predicate,
            includes: nested?,
        })
    }
}

fn find_relation<'e>(parent: &'e EntitySchema, input: &IncludeInput) -> Result<&'e RelationDef, AppError> {
    let found = match &input.alias {
        Some(alias) => parent
            .relation(alias)
            .filter(|r| r.target_entity == input.model),
        None => parent
            .relations
            .iter()
            .find(|r| r.target_entity == input.model),
    };
    found.ok_or_else(|| {
        AppError::InvalidInclude(format!(
            "{} has no relation{} to {}",
            parent.name,
            input
                .alias
                .as_deref()
                .map(|a| format!(" '{}'", a))
                .unwrap_or_default(),
            input.model
        ))
    })
}

fn default_sort(entity: &EntitySchema) -> SortKey {
    if entity.has_field("updated_at") {
        SortKey::asc("updated_at")
    } else {
        SortKey::asc(entity.primary_key().name.clone())
    }
}

/// Applied only when both page and limit are present and positive; otherwise unbounded.
pub fn pagination(input: Option<&PaginationInput>) -> Option<Pagination> {
    let input = input?;
    let page = positive(input.page.as_ref()?)?;
    let limit = positive(input.limit.as_ref()?)?;
    Some(Pagination::new(page, limit))
}

fn positive(v: &Value) -> Option<u32> {
    let n = match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }?;
    u32::try_from(n).ok().filter(|n| *n > 0)
}

fn known_field(entity: &EntitySchema, name: &str, what: &str) -> Result<(), AppError> {
    if entity.has_field(name) {
        Ok(())
    } else {
        Err(AppError::InvalidFilter(format!(
            "unknown {} '{}' on {}",
            what, name, entity.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_str;
    use crate::filter::Predicate;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        load_from_str(
            r#"{ "entities": [
                { "name": "Author", "fields": [
                    { "name": "id", "type": "integer", "isPrimaryKey": true },
                    { "name": "name", "type": "string" }
                  ],
                  "relations": [
                    { "name": "books", "kind": "many", "targetEntity": "Book", "foreignKey": "author_id" },
                    { "name": "bio", "kind": "one", "targetEntity": "Bio", "foreignKey": "author_id" }
                  ] },
                { "name": "Book", "timestamps": false, "fields": [
                    { "name": "id", "type": "integer", "isPrimaryKey": true },
                    { "name": "author_id", "type": "integer" },
                    { "name": "title", "type": "string" }
                  ],
                  "relations": [
                    { "name": "reviews", "kind": "many", "targetEntity": "Review", "foreignKey": "book_id" }
                  ] },
                { "name": "Review", "fields": [
                    { "name": "id", "type": "integer", "isPrimaryKey": true },
                    { "name": "book_id", "type": "integer" },
                    { "name": "stars", "type": "integer" }
                  ],
                  "relations": [
                    { "name": "subject", "kind": "one", "targetEntity": "Book", "foreignKey": "id" }
                  ] },
                { "name": "Bio", "fields": [
                    { "name": "id", "type": "integer", "isPrimaryKey": true },
                    { "name": "author_id", "type": "integer" }
                  ] }
            ] }"#,
        )
        .unwrap()
    }

    #[test]
    fn default_sort_is_updated_at_then_primary_key() {
        let reg = registry();
        let c = QueryComposer::new(&reg);
        let author = reg.require("Author").unwrap();
        assert_eq!(c.sort(author, None).unwrap(), vec![SortKey::asc("updated_at")]);
        let book = reg.require("Book").unwrap();
        assert_eq!(c.sort(book, None).unwrap(), vec![SortKey::asc("id")]);
    }

    #[test]
    fn sort_forms() {
        let reg = registry();
        let c = QueryComposer::new(&reg);
        let author = reg.require("Author").unwrap();
        let keyed: SortInput = serde_json::from_value(json!({ "sortBy": "name", "sortOrder": "desc" })).unwrap();
        assert_eq!(c.sort(author, Some(&keyed)).unwrap(), vec![SortKey::desc("name")]);
        let fields: SortInput = serde_json::from_value(json!({ "name": -1, "id": 1 })).unwrap();
        assert_eq!(
            c.sort(author, Some(&fields)).unwrap(),
            vec![SortKey::desc("name"), SortKey::asc("id")]
        );
        let weird: SortInput = serde_json::from_value(json!({ "sortBy": "name", "sortOrder": "down" })).unwrap();
        assert_eq!(c.sort(author, Some(&weird)).unwrap(), vec![SortKey::asc("name")]);
        let unknown: SortInput = serde_json::from_value(json!({ "rating": 1 })).unwrap();
        assert!(matches!(c.sort(author, Some(&unknown)), Err(AppError::InvalidFilter(_))));
    }

    #[test]
    fn pagination_needs_both_positive() {
        assert_eq!(pagination(None), None);
        assert_eq!(
            pagination(Some(&PaginationInput::new(2, 10))),
            Some(Pagination::new(2, 10))
        );
        let strings = PaginationInput {
            page: Some(json!("3")),
            limit: Some(json!("5")),
        };
        assert_eq!(pagination(Some(&strings)), Some(Pagination::new(3, 5)));
        let no_page = PaginationInput {
            page: None,
            limit: Some(json!(5)),
        };
        assert_eq!(pagination(Some(&no_page)), None);
        let zero = PaginationInput {
            page: Some(json!(0)),
            limit: Some(json!(5)),
        };
        assert_eq!(pagination(Some(&zero)), None);
    }

    #[test]
    fn nested_includes_resolve_with_scoped_filters() {
        let reg = registry();
        let c = QueryComposer::new(&reg);
        let author = reg.require("Author").unwrap();
        let inputs: Vec<IncludeInput> = serde_json::from_value(json!([
            { "model": "Book",
              "where": { "field": "title", "operator": "like", "value": "sea" },
              "include": [ { "model": "Review" } ] }
        ]))
        .unwrap();
        let includes = c.includes(author, &inputs).unwrap();
        assert_eq!(includes.len(), 1);
        assert_eq!(includes[0].relation.name, "books");
        assert!(includes[0].required());
        assert_eq!(
            includes[0].predicate,
            Some(Predicate::Like {
                field: "title".into(),
                needle: "sea".into()
            })
        );
        assert_eq!(includes[0].includes[0].relation.name, "reviews");
        assert!(!includes[0].includes[0].required());
    }

    #[test]
    fn nested_filter_is_scoped_to_the_joined_entity() {
        let reg = registry();
        let c = QueryComposer::new(&reg);
        let author = reg.require("Author").unwrap();
        let inputs = vec![IncludeInput {
            filter: Some(FilterInput::One(Filter::condition(
                "name",
                crate::filter::Operator::Eq,
                json!("x"),
            ))),
            ..IncludeInput::model("Book")
        }];
        assert!(matches!(c.includes(author, &inputs), Err(AppError::InvalidFilter(_))));
    }

    #[test]
    fn rejects_cycles_and_depth() {
        let reg = registry();
        let author = reg.require("Author").unwrap();
        let book = reg.require("Book").unwrap();
        let cyclic = vec![IncludeInput {
            include: vec![IncludeInput::model("Book")],
            ..IncludeInput::model("Review")
        }];
        let err = QueryComposer::new(&reg).includes(book, &cyclic).unwrap_err();
        assert!(matches!(err, AppError::InvalidInclude(ref m) if m.contains("cycle")), "{err}");

        let deep = vec![IncludeInput {
            include: vec![IncludeInput::model("Review")],
            ..IncludeInput::model("Book")
        }];
        let err = QueryComposer::new(&reg)
            .with_max_depth(1)
            .includes(author, &deep)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInclude(ref m) if m.contains("depth")));
    }

    #[test]
    fn unknown_relation_is_invalid_include() {
        let reg = registry();
        let book = reg.require("Book").unwrap();
        let err = QueryComposer::new(&reg)
            .includes(book, &[IncludeInput::model("Author")])
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInclude(_)));
    }

    #[test]
    fn compose_checks_projection_and_aggregation() {
        let reg = registry();
        let c = QueryComposer::new(&reg);
        let book = reg.require("Book").unwrap();
        let opts: FindOptions = serde_json::from_value(json!({
            "attributes": ["id", "title"],
            "groupCount": { "groupBy": "author_id", "countDistinct": "title" }
        }))
        .unwrap();
        let q = c.compose(book, &opts).unwrap();
        assert_eq!(q.projection, Some(vec!["id".to_string(), "title".to_string()]));
        assert_eq!(
            q.aggregation,
            Some(Aggregation {
                group_by: "author_id".into(),
                count_distinct: "title".into()
            })
        );
        assert_eq!(q.pagination, None);

        let bad = FindOptions {
            attributes: Some(vec!["isbn".into()]),
            ..FindOptions::default()
        };
        assert!(c.compose(book, &bad).is_err());
    }
}
