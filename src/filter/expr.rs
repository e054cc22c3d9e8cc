//! Filter expressions as received on the wire.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Supported filter operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
    In,
    Nin,
    Between,
    Overlap,
    Contains,
    Any,
    And,
    Or,
}

impl Operator {
    pub const ALL: [Operator; 15] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Lt,
        Operator::Gte,
        Operator::Lte,
        Operator::Like,
        Operator::In,
        Operator::Nin,
        Operator::Between,
        Operator::Overlap,
        Operator::Contains,
        Operator::Any,
        Operator::And,
        Operator::Or,
    ];

    /// Parse an operator token; a leading `$` is accepted.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.strip_prefix('$').unwrap_or(token);
        Operator::ALL.into_iter().find(|op| op.as_str() == token)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Lt => "lt",
            Operator::Gte => "gte",
            Operator::Lte => "lte",
            Operator::Like => "like",
            Operator::In => "in",
            Operator::Nin => "nin",
            Operator::Between => "between",
            Operator::Overlap => "overlap",
            Operator::Contains => "contains",
            Operator::Any => "any",
            Operator::And => "and",
            Operator::Or => "or",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combinator joining child expressions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    And,
    Or,
}

/// A filter tree. The operator of a condition is kept as given so that an
/// unsupported one is reported together with its field at translation time.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Condition {
        field: String,
        operator: String,
        value: Value,
    },
    Group {
        combinator: Combinator,
        children: Vec<Filter>,
    },
}

impl Filter {
    pub fn condition(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Filter::Condition {
            field: field.into(),
            operator: operator.as_str().to_string(),
            value,
        }
    }

    pub fn and(children: Vec<Filter>) -> Self {
        Filter::Group {
            combinator: Combinator::And,
            children,
        }
    }

    pub fn or(children: Vec<Filter>) -> Self {
        Filter::Group {
            combinator: Combinator::Or,
            children,
        }
    }

    pub fn from_value(v: Value) -> Result<Self, String> {
        let Value::Object(mut obj) = v else {
            return Err(format!("filter must be an object, got {}", v));
        };
        let operator = match obj.remove("operator") {
            Some(Value::String(s)) => s,
            Some(other) => return Err(format!("filter operator must be a string, got {}", other)),
            None => return Err("filter is missing 'operator'".into()),
        };
        if let Some(children) = obj.remove("children") {
            let combinator = match operator.trim_start_matches('$') {
                "and" => Combinator::And,
                "or" => Combinator::Or,
                other => {
                    return Err(format!(
                        "filter with children must use 'and' or 'or', got '{}'",
                        other
                    ))
                }
            };
            let Value::Array(items) = children else {
                return Err("filter 'children' must be an array".into());
            };
            let children = items
                .into_iter()
                .map(Filter::from_value)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Filter::Group {
                combinator,
                children,
            });
        }
        let field = match obj.remove("field") {
            Some(Value::String(s)) => s,
            _ => return Err(format!("filter condition '{}' is missing 'field'", operator)),
        };
        let value = obj.remove("value").unwrap_or(Value::Null);
        Ok(Filter::Condition {
            field,
            operator,
            value,
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            Filter::Condition {
                field,
                operator,
                value,
            } => serde_json::json!({ "field": field, "operator": operator, "value": value }),
            Filter::Group {
                combinator,
                children,
            } => serde_json::json!({
                "operator": combinator,
                "children": children.iter().map(Filter::to_value).collect::<Vec<_>>(),
            }),
        }
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        Filter::from_value(v).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Filter {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

/// One filter or a list of filters (implicit AND), as accepted by include `where` clauses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterInput {
    Many(Vec<Filter>),
    One(Filter),
}

impl FilterInput {
    pub fn into_filters(self) -> Vec<Filter> {
        match self {
            FilterInput::Many(v) => v,
            FilterInput::One(f) => vec![f],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_leaf_and_group() {
        let f: Filter = serde_json::from_value(json!({
            "operator": "or",
            "children": [
                { "field": "genre", "operator": "eq", "value": "poetry" },
                { "field": "year", "operator": "between", "value": [1900, 1950] }
            ]
        }))
        .unwrap();
        assert_eq!(
            f,
            Filter::or(vec![
                Filter::condition("genre", Operator::Eq, json!("poetry")),
                Filter::condition("year", Operator::Between, json!([1900, 1950])),
            ])
        );
    }

    #[test]
    fn keeps_unknown_operator_for_translation() {
        let f: Filter = serde_json::from_value(json!({ "field": "a", "operator": "regex", "value": "x" })).unwrap();
        assert!(matches!(f, Filter::Condition { ref operator, .. } if operator == "regex"));
    }

    #[test]
    fn rejects_group_with_leaf_operator() {
        let err = serde_json::from_value::<Filter>(json!({ "operator": "eq", "children": [] })).unwrap_err();
        assert!(err.to_string().contains("'and' or 'or'"));
    }

    #[test]
    fn operator_tokens() {
        assert_eq!(Operator::parse("$nin"), Some(Operator::Nin));
        assert_eq!(Operator::parse("ilike"), None);
    }
}
