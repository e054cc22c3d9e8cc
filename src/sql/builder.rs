//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE and upsert statements
//! from an entity schema and a query descriptor.
//!
//! Identifiers come from the schema registry only; every value is a bound
//! parameter cast to the column type.

use crate::config::{EntitySchema, FieldDef, FieldType};
use crate::filter::{Comparison, Predicate};
use crate::query::{QueryDescriptor, ResolvedInclude, AGGREGATE_COUNT_KEY};
use serde_json::{Map, Value};

const MAIN_ALIAS: &str = "main";

/// Quote identifier for PostgreSQL (safe: only from the registry).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn qualified_table(entity: &EntitySchema) -> String {
    format!("{}.{}", quoted(&entity.schema_name), quoted(&entity.table_name))
}

fn column(alias: &str, name: &str) -> String {
    format!("{}.{}", alias, quoted(name))
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf::default()
    }

    fn push_param(&mut self, v: Value) -> u32 {
        self.params.push(v);
        self.params.len() as u32
    }

    fn bind(&mut self, v: Value, cast: Option<&str>) -> String {
        let n = self.push_param(v);
        match cast {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }

    /// `ARRAY[$1::t, ...]::t[]` for multi-valued columns.
    fn bind_array(&mut self, field: &FieldDef, values: &[Value]) -> String {
        let cast = field.cast().unwrap_or_else(|| "text".into());
        let items: Vec<String> = values
            .iter()
            .map(|v| self.bind(v.clone(), Some(&cast)))
            .collect();
        format!("ARRAY[{}]::{}[]", items.join(", "), cast)
    }

    /// Right-hand side for assigning or comparing a whole column value.
    fn bind_value(&mut self, field: &FieldDef, v: &Value) -> String {
        match v {
            Value::Array(items) if field.array => self.bind_array(field, items),
            _ => self.bind(v.clone(), scalar_cast(field, v).as_deref()),
        }
    }
}

/// Column cast for a scalar operand. A fractional number against an integer
/// column is compared as `numeric` so it is not rounded.
fn scalar_cast(field: &FieldDef, v: &Value) -> Option<String> {
    let fractional = !v.is_i64() && !v.is_u64() && v.as_f64().map_or(false, |f| f.fract() != 0.0);
    if fractional && field.field_type == FieldType::Integer {
        return Some("numeric".into());
    }
    field.cast()
}

/// Columns of an entity (or the projected subset) as `alias."c" AS "c"`.
fn select_column_list(entity: &EntitySchema, alias: &str, only: Option<&[String]>) -> Vec<String> {
    entity
        .fields
        .iter()
        .filter(|f| only.map_or(true, |o| o.iter().any(|n| *n == f.name)))
        .map(|f| format!("{} AS {}", column(alias, &f.name), quoted(&f.name)))
        .collect()
}

fn returning_list(entity: &EntitySchema) -> String {
    entity
        .fields
        .iter()
        .map(|f| quoted(&f.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a predicate against the columns of `alias`.
pub fn render_predicate(q: &mut QueryBuf, entity: &EntitySchema, alias: &str, pred: &Predicate) -> String {
    let field_of = |name: &str| entity.field(name);
    match pred {
        Predicate::True => "TRUE".into(),
        Predicate::Compare { field, op, value } => {
            let col = column(alias, field);
            match (op, value) {
                (Comparison::Eq, Value::Null) => format!("{} IS NULL", col),
                (Comparison::Ne, Value::Null) => format!("{} IS NOT NULL", col),
                _ => {
                    let rhs = match field_of(field) {
                        Some(def) => q.bind_value(def, value),
                        None => q.bind(value.clone(), None),
                    };
                    format!("{} {} {}", col, op.sql(), rhs)
                }
            }
        }
        Predicate::Like { field, needle } => {
            let ph = q.bind(Value::String(format!("%{}%", escape_like(needle))), Some("text"));
            format!("{}::text ILIKE {}", column(alias, field), ph)
        }
        Predicate::In { field, values } | Predicate::NotIn { field, values } => {
            let negated = matches!(pred, Predicate::NotIn { .. });
            if values.is_empty() {
                return if negated { "TRUE".into() } else { "FALSE".into() };
            }
            let phs: Vec<String> = values
                .iter()
                .map(|v| {
                    let cast = field_of(field).and_then(|f| scalar_cast(f, v));
                    q.bind(v.clone(), cast.as_deref())
                })
                .collect();
            format!(
                "{} {}IN ({})",
                column(alias, field),
                if negated { "NOT " } else { "" },
                phs.join(", ")
            )
        }
        Predicate::Between { field, low, high } => {
            let lo_cast = field_of(field).and_then(|f| scalar_cast(f, low));
            let hi_cast = field_of(field).and_then(|f| scalar_cast(f, high));
            let lo = q.bind(low.clone(), lo_cast.as_deref());
            let hi = q.bind(high.clone(), hi_cast.as_deref());
            format!("{} BETWEEN {} AND {}", column(alias, field), lo, hi)
        }
        Predicate::Overlap { field, values } => match field_of(field) {
            Some(def) => format!("{} && {}", column(alias, field), q.bind_array(def, values)),
            None => "FALSE".into(),
        },
        Predicate::Contains { field, value } => match (field_of(field), value) {
            (Some(def), Value::Array(items)) if def.array => {
                format!("{} @> {}", column(alias, field), q.bind_array(def, items))
            }
            _ => {
                let ph = q.bind(value.clone(), Some("jsonb"));
                format!("{}::jsonb @> {}", column(alias, field), ph)
            }
        },
        Predicate::And(items) | Predicate::Or(items) => {
            let and = matches!(pred, Predicate::And(_));
            if items.is_empty() {
                return if and { "TRUE".into() } else { "FALSE".into() };
            }
            let parts: Vec<String> = items
                .iter()
                .map(|p| render_predicate(q, entity, alias, p))
                .collect();
            format!("({})", parts.join(if and { " AND " } else { " OR " }))
        }
    }
}

/// Escape LIKE wildcards so the needle matches literally.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Alias generator for nested include subqueries.
struct Aliases(usize);

impl Aliases {
    fn next(&mut self) -> String {
        self.0 += 1;
        format!("i{}", self.0)
    }
}

/// WHERE clause of the main query or an include: predicate plus EXISTS for required includes.
fn where_clause(
    q: &mut QueryBuf,
    entity: &EntitySchema,
    alias: &str,
    pred: &Predicate,
    includes: &[ResolvedInclude],
    aliases: &mut Aliases,
    extra: Option<String>,
) -> String {
    let mut parts: Vec<String> = extra.into_iter().collect();
    if !pred.is_true() {
        parts.push(render_predicate(q, entity, alias, pred));
    }
    for inc in includes.iter().filter(|i| i.required()) {
        parts.push(exists_clause(q, entity, alias, inc, aliases));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

fn join_condition(parent: &EntitySchema, parent_alias: &str, inc: &ResolvedInclude, alias: &str) -> String {
    format!(
        "{} = {}",
        column(alias, &inc.relation.foreign_key),
        column(parent_alias, &parent.primary_key().name)
    )
}

fn exists_clause(
    q: &mut QueryBuf,
    parent: &EntitySchema,
    parent_alias: &str,
    inc: &ResolvedInclude,
    aliases: &mut Aliases,
) -> String {
    let alias = aliases.next();
    let join = join_condition(parent, parent_alias, inc, &alias);
    let pred = inc.predicate.clone().unwrap_or(Predicate::True);
    let where_sql = where_clause(q, &inc.target, &alias, &pred, &inc.includes, aliases, Some(join));
    format!(
        "EXISTS (SELECT 1 FROM {} {}{})",
        qualified_table(&inc.target),
        alias,
        where_sql
    )
}

/// Scalar subquery producing the related rows as JSON (array for many, object or null for one).
fn include_subquery(
    q: &mut QueryBuf,
    parent: &EntitySchema,
    parent_alias: &str,
    inc: &ResolvedInclude,
    aliases: &mut Aliases,
) -> String {
    let alias = aliases.next();
    let target = &inc.target;
    let mut cols = select_column_list(target, &alias, None);
    for nested in &inc.includes {
        let sub = include_subquery(q, target, &alias, nested, aliases);
        cols.push(format!("{} AS {}", sub, quoted(&nested.relation.name)));
    }
    let join = join_condition(parent, parent_alias, inc, &alias);
    let pred = inc.predicate.clone().unwrap_or(Predicate::True);
    let where_sql = where_clause(q, target, &alias, &pred, &inc.includes, aliases, Some(join));
    let inner = format!(
        "SELECT {} FROM {} {}{} ORDER BY {}",
        cols.join(", "),
        qualified_table(target),
        alias,
        where_sql,
        column(&alias, &target.primary_key().name)
    );
    if inc.is_many() {
        format!(
            "(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM ({}) sub)",
            inner
        )
    } else {
        format!("(SELECT row_to_json(sub) FROM ({} LIMIT 1) sub)", inner)
    }
}

fn window_clause(query: &QueryDescriptor) -> String {
    match query.pagination {
        Some(p) => format!(" LIMIT {} OFFSET {}", p.limit(), p.offset()),
        None => String::new(),
    }
}

/// SELECT for a query descriptor. Without pagination the statement has no LIMIT.
pub fn select(entity: &EntitySchema, query: &QueryDescriptor) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut aliases = Aliases(0);
    let table = qualified_table(entity);

    if let Some(agg) = &query.aggregation {
        let group = column(MAIN_ALIAS, &agg.group_by);
        let where_sql = where_clause(
            &mut q,
            entity,
            MAIN_ALIAS,
            &query.predicate,
            &query.includes,
            &mut aliases,
            None,
        );
        let direction = query
            .sort
            .iter()
            .find(|k| k.field == agg.group_by)
            .map(|k| k.direction.sql())
            .unwrap_or("ASC");
        q.sql = format!(
            "SELECT {} AS {}, COUNT(DISTINCT {}) AS {} FROM {} {}{} GROUP BY {} ORDER BY {} {}{}",
            group,
            quoted(&agg.group_by),
            column(MAIN_ALIAS, &agg.count_distinct),
            quoted(AGGREGATE_COUNT_KEY),
            table,
            MAIN_ALIAS,
            where_sql,
            group,
            group,
            direction,
            window_clause(query)
        );
        return q;
    }

    let mut select_parts = select_column_list(entity, MAIN_ALIAS, query.projection.as_deref());
    for inc in &query.includes {
        let sub = include_subquery(&mut q, entity, MAIN_ALIAS, inc, &mut aliases);
        select_parts.push(format!("{} AS {}", sub, quoted(&inc.relation.name)));
    }
    let where_sql = where_clause(
        &mut q,
        entity,
        MAIN_ALIAS,
        &query.predicate,
        &query.includes,
        &mut aliases,
        None,
    );
    let order_sql = if query.sort.is_empty() {
        String::new()
    } else {
        let keys: Vec<String> = query
            .sort
            .iter()
            .map(|k| format!("{} {}", column(MAIN_ALIAS, &k.field), k.direction.sql()))
            .collect();
        format!(" ORDER BY {}", keys.join(", "))
    };
    q.sql = format!(
        "SELECT {} FROM {} {}{}{}{}",
        select_parts.join(", "),
        table,
        MAIN_ALIAS,
        where_sql,
        order_sql,
        window_clause(query)
    );
    q
}

/// Distinct count of matching rows of the main entity (ignores sort and pagination).
pub fn count(entity: &EntitySchema, query: &QueryDescriptor) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut aliases = Aliases(0);
    let where_sql = where_clause(
        &mut q,
        entity,
        MAIN_ALIAS,
        &query.predicate,
        &query.includes,
        &mut aliases,
        None,
    );
    q.sql = match &query.aggregation {
        Some(agg) => format!(
            "SELECT COUNT(*) AS {} FROM (SELECT {} FROM {} {}{} GROUP BY {}) AS grouped",
            quoted(AGGREGATE_COUNT_KEY),
            column(MAIN_ALIAS, &agg.group_by),
            qualified_table(entity),
            MAIN_ALIAS,
            where_sql,
            column(MAIN_ALIAS, &agg.group_by)
        ),
        None => format!(
            "SELECT COUNT(DISTINCT {}) AS {} FROM {} {}{}",
            column(MAIN_ALIAS, &entity.primary_key().name),
            quoted(AGGREGATE_COUNT_KEY),
            qualified_table(entity),
            MAIN_ALIAS,
            where_sql
        ),
    };
    q
}

/// Columns of `record` that exist on the entity, in schema order.
fn present_fields<'e>(entity: &'e EntitySchema, record: &Map<String, Value>) -> Vec<&'e FieldDef> {
    entity
        .fields
        .iter()
        .filter(|f| record.contains_key(&f.name))
        .collect()
}

/// INSERT of the record's known columns; omitted columns take the database default.
pub fn insert(entity: &EntitySchema, record: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let fields = present_fields(entity, record);
    let table = qualified_table(entity);
    let returning = returning_list(entity);
    if fields.is_empty() {
        q.sql = format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, returning);
        return q;
    }
    let cols: Vec<String> = fields.iter().map(|f| quoted(&f.name)).collect();
    let values: Vec<String> = fields
        .iter()
        .map(|f| q.bind_value(f, &record[&f.name]))
        .collect();
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        table,
        cols.join(", "),
        values.join(", "),
        returning
    );
    q
}

/// INSERT ... ON CONFLICT (keys) DO UPDATE. Conflict keys are reassigned to themselves when
/// nothing else changes so the row is always returned.
pub fn upsert(entity: &EntitySchema, record: &Map<String, Value>, conflict: &[String]) -> QueryBuf {
    let mut q = insert(entity, record);
    let fields = present_fields(entity, record);
    let mut sets: Vec<String> = fields
        .iter()
        .filter(|f| !conflict.contains(&f.name))
        .map(|f| format!("{} = EXCLUDED.{}", quoted(&f.name), quoted(&f.name)))
        .collect();
    if sets.is_empty() {
        sets = conflict
            .iter()
            .map(|c| format!("{} = EXCLUDED.{}", quoted(c), quoted(c)))
            .collect();
    }
    let target: Vec<String> = conflict.iter().map(|c| quoted(c)).collect();
    let returning = format!(" RETURNING {}", returning_list(entity));
    let head = q.sql.trim_end_matches(&returning).to_string();
    q.sql = format!(
        "{} ON CONFLICT ({}) DO UPDATE SET {}{}",
        head,
        target.join(", "),
        sets.join(", "),
        returning
    );
    q
}

/// UPDATE every row matching the predicate, returning the rows after the change.
pub fn update_where(entity: &EntitySchema, pred: &Predicate, patch: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(entity);
    let pk = &entity.primary_key().name;
    let sets: Vec<String> = present_fields(entity, patch)
        .into_iter()
        .filter(|f| f.name != *pk)
        .map(|f| {
            let rhs = q.bind_value(f, &patch[&f.name]);
            format!("{} = {}", quoted(&f.name), rhs)
        })
        .collect();
    let where_sql = where_clause(&mut q, entity, MAIN_ALIAS, pred, &[], &mut Aliases(0), None);
    if sets.is_empty() {
        q.sql = format!(
            "SELECT {} FROM {} {}{}",
            select_column_list(entity, MAIN_ALIAS, None).join(", "),
            table,
            MAIN_ALIAS,
            where_sql
        );
        return q;
    }
    q.sql = format!(
        "UPDATE {} AS {} SET {}{} RETURNING {}",
        table,
        MAIN_ALIAS,
        sets.join(", "),
        where_sql,
        select_column_list(entity, MAIN_ALIAS, None).join(", ")
    );
    q
}

/// DELETE every row matching the predicate, returning the removed rows.
pub fn delete_where(entity: &EntitySchema, pred: &Predicate) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, entity, MAIN_ALIAS, pred, &[], &mut Aliases(0), None);
    q.sql = format!(
        "DELETE FROM {} AS {}{} RETURNING {}",
        qualified_table(entity),
        MAIN_ALIAS,
        where_sql,
        select_column_list(entity, MAIN_ALIAS, None).join(", ")
    );
    q
}
