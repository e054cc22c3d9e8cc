//! Query descriptor: everything a storage adapter needs to run one read.

use crate::config::{EntitySchema, RelationDef, RelationKind};
use crate::filter::Predicate;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    /// The number `-1` and exactly `"DESC"` (any case, untrimmed) are descending;
    /// anything else is ascending.
    pub fn from_token(token: &Value) -> Self {
        match token {
            Value::Number(n) if n.as_f64() == Some(-1.0) => Direction::Desc,
            Value::String(s) if s.eq_ignore_ascii_case("desc") => Direction::Desc,
            _ => Direction::Asc,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        SortKey {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        SortKey {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}

/// Page window; both members are at least 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    page: u32,
    limit: u32,
}

impl Pagination {
    /// Zero page or limit is raised to 1.
    pub fn new(page: u32, limit: u32) -> Self {
        Pagination {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

/// Group-by with a distinct count; result rows are `{<group_by>: value, "count": n}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Aggregation {
    pub group_by: String,
    pub count_distinct: String,
}

pub const AGGREGATE_COUNT_KEY: &str = "count";

/// An include resolved through the registry. Related rows are those of `target`
/// whose `relation.foreign_key` equals the parent's primary key.
#[derive(Clone, Debug)]
pub struct ResolvedInclude {
    pub relation: RelationDef,
    pub target: Arc<EntitySchema>,
    pub predicate: Option<Predicate>,
    pub includes: Vec<ResolvedInclude>,
}

impl ResolvedInclude {
    /// A filtered include drops parent rows without a matching related row.
    pub fn required(&self) -> bool {
        self.predicate.is_some()
    }

    pub fn is_many(&self) -> bool {
        self.relation.kind == RelationKind::Many
    }
}

#[derive(Clone, Debug)]
pub struct QueryDescriptor {
    pub predicate: Predicate,
    pub sort: Vec<SortKey>,
    /// `None` returns the whole matching set.
    pub pagination: Option<Pagination>,
    pub includes: Vec<ResolvedInclude>,
    pub projection: Option<Vec<String>>,
    pub aggregation: Option<Aggregation>,
}

impl QueryDescriptor {
    pub fn new(predicate: Predicate) -> Self {
        QueryDescriptor {
            predicate,
            sort: Vec::new(),
            pagination: None,
            includes: Vec::new(),
            projection: None,
            aggregation: None,
        }
    }

    pub fn with_sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_pagination(mut self, page: u32, limit: u32) -> Self {
        self.pagination = Some(Pagination::new(page, limit));
        self
    }

    pub fn limit(&self) -> Option<u32> {
        self.pagination.map(|p| p.limit())
    }

    pub fn offset(&self) -> Option<u64> {
        self.pagination.map(|p| p.offset())
    }

    pub fn required_includes(&self) -> impl Iterator<Item = &ResolvedInclude> {
        self.includes.iter().filter(|i| i.required())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direction_tokens() {
        assert_eq!(Direction::from_token(&json!(-1)), Direction::Desc);
        assert_eq!(Direction::from_token(&json!("desc")), Direction::Desc);
        assert_eq!(Direction::from_token(&json!("DESC")), Direction::Desc);
        for asc in [json!(1), json!(0), json!("descending"), json!("ASC"), json!(null), json!(-2)] {
            assert_eq!(Direction::from_token(&asc), Direction::Asc, "{asc}");
        }
    }

    #[test]
    fn padded_or_numeric_text_sorts_ascending() {
        for asc in [json!(" desc "), json!("desc "), json!("-1")] {
            assert_eq!(Direction::from_token(&asc), Direction::Asc, "{asc}");
        }
    }

    #[test]
    fn zero_page_and_limit_are_clamped() {
        let p = Pagination::new(0, 0);
        assert_eq!((p.page(), p.limit()), (1, 1));
        assert_eq!(p.offset(), 0);
        let q = QueryDescriptor::new(Predicate::True).with_pagination(0, 10);
        assert_eq!(q.offset(), Some(0));
        assert_eq!(q.limit(), Some(10));
    }

    #[test]
    fn offset_from_page() {
        let q = QueryDescriptor::new(Predicate::True).with_pagination(3, 10);
        assert_eq!(q.offset(), Some(20));
        assert_eq!(q.limit(), Some(10));
        assert_eq!(QueryDescriptor::new(Predicate::True).offset(), None);
    }
}
