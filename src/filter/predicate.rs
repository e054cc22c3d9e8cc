//! Translated, store-independent predicate tree.

use serde_json::Value;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
}

impl Comparison {
    pub fn sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "<>",
            Comparison::Gt => ">",
            Comparison::Lt => "<",
            Comparison::Gte => ">=",
            Comparison::Lte => "<=",
        }
    }
}

/// Native predicate. Field names are verified against the entity schema.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// Matches every row.
    True,
    /// `Eq`/`Ne` against `null` mean IS NULL / IS NOT NULL.
    Compare {
        field: String,
        op: Comparison,
        value: Value,
    },
    /// Case-insensitive substring match.
    Like { field: String, needle: String },
    In { field: String, values: Vec<Value> },
    NotIn { field: String, values: Vec<Value> },
    /// Inclusive on both bounds.
    Between {
        field: String,
        low: Value,
        high: Value,
    },
    /// Array column shares at least one element with `values`.
    Overlap { field: String, values: Vec<Value> },
    /// Array column holds every element of `value` (an array), or json column contains `value`.
    Contains { field: String, value: Value },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Predicate::Compare {
            field: field.into(),
            op: Comparison::Eq,
            value,
        }
    }

    pub fn ne(field: impl Into<String>, value: Value) -> Self {
        Predicate::Compare {
            field: field.into(),
            op: Comparison::Ne,
            value,
        }
    }

    /// Conjunction that drops `True` members and unwraps a single member.
    pub fn all(preds: Vec<Predicate>) -> Self {
        let mut preds: Vec<_> = preds
            .into_iter()
            .filter(|p| !matches!(p, Predicate::True))
            .collect();
        match preds.len() {
            0 => Predicate::True,
            1 => preds.remove(0),
            _ => Predicate::And(preds),
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Predicate::True)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::True => f.write_str("TRUE"),
            Predicate::Compare { field, op, value } => match (op, value) {
                (Comparison::Eq, Value::Null) => write!(f, "{} IS NULL", field),
                (Comparison::Ne, Value::Null) => write!(f, "{} IS NOT NULL", field),
                _ => write!(f, "{} {} {}", field, op.sql(), value),
            },
            Predicate::Like { field, needle } => write!(f, "{} ILIKE '%{}%'", field, needle),
            Predicate::In { field, values } => write!(f, "{} IN {}", field, Value::from(values.clone())),
            Predicate::NotIn { field, values } => {
                write!(f, "{} NOT IN {}", field, Value::from(values.clone()))
            }
            Predicate::Between { field, low, high } => {
                write!(f, "{} BETWEEN {} AND {}", field, low, high)
            }
            Predicate::Overlap { field, values } => {
                write!(f, "{} && {}", field, Value::from(values.clone()))
            }
            Predicate::Contains { field, value } => write!(f, "{} @> {}", field, value),
            Predicate::And(items) | Predicate::Or(items) => {
                let sep = if matches!(self, Predicate::And(_)) { " AND " } else { " OR " };
                f.write_str("(")?;
                for (i, p) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(sep)?;
                    }
                    write!(f, "{}", p)?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn all_collapses_trivial_members() {
        assert_eq!(Predicate::all(vec![]), Predicate::True);
        assert_eq!(
            Predicate::all(vec![Predicate::True, Predicate::eq("a", json!(1))]),
            Predicate::eq("a", json!(1))
        );
    }

    #[test]
    fn displays_readably() {
        let p = Predicate::Or(vec![
            Predicate::eq("deleted_at", Value::Null),
            Predicate::Between {
                field: "year".into(),
                low: json!(1990),
                high: json!(2000),
            },
        ]);
        assert_eq!(p.to_string(), "(deleted_at IS NULL OR year BETWEEN 1990 AND 2000)");
    }
}
