//! In-memory adapter. Rows live per entity behind one lock and predicates are
//! evaluated directly, with SQL three-valued NULL logic.
//!
//! Primary keys and unique fields are enforced on every write, generated
//! integer keys come from a per-entity sequence, and NULLs sort after every
//! value (first when descending), matching PostgreSQL defaults.

use crate::config::{EntitySchema, FieldDef, FieldType};
use crate::error::StoreError;
use crate::filter::{Comparison, Predicate};
use crate::query::{Aggregation, Direction, QueryDescriptor, ResolvedInclude, SortKey, AGGREGATE_COUNT_KEY};
use crate::store::{Record, StorageAdapter};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Table {
    rows: Vec<Record>,
    next_id: i64,
}

type Tables = HashMap<String, Table>;

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }

    /// Whether `row` satisfies `predicate` (unknown counts as not satisfied).
    pub fn matches(entity: &EntitySchema, predicate: &Predicate, row: &Record) -> bool {
        eval(entity, predicate, row) == Some(true)
    }
}

#[async_trait]
impl StorageAdapter for MemoryStore {
    async fn insert(&self, entity: &EntitySchema, record: &Record) -> Result<Record, StoreError> {
        let mut tables = self.write()?;
        let table = tables.entry(entity.name.clone()).or_default();
        insert_row(table, entity, record)
    }

    async fn select(&self, entity: &EntitySchema, query: &QueryDescriptor) -> Result<Vec<Record>, StoreError> {
        let tables = self.read()?;
        let mut rows = visible_rows(&tables, entity, &query.predicate, &query.includes);

        if let Some(agg) = &query.aggregation {
            return Ok(aggregate(entity, agg, &query.sort, rows, query));
        }

        sort_rows(entity, &query.sort, &mut rows);
        Ok(window(rows, query)
            .into_iter()
            .map(|row| shape(&tables, entity, row, query.projection.as_deref(), &query.includes))
            .collect())
    }

    async fn count(&self, entity: &EntitySchema, query: &QueryDescriptor) -> Result<u64, StoreError> {
        let tables = self.read()?;
        let rows = visible_rows(&tables, entity, &query.predicate, &query.includes);
        Ok(match &query.aggregation {
            Some(agg) => group_rows(entity, agg, &rows).len() as u64,
            None => rows.len() as u64,
        })
    }

    async fn update(
        &self,
        entity: &EntitySchema,
        predicate: &Predicate,
        patch: &Record,
    ) -> Result<Vec<Record>, StoreError> {
        let mut tables = self.write()?;
        let table = tables.entry(entity.name.clone()).or_default();
        let hits: Vec<usize> = table
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| MemoryStore::matches(entity, predicate, row))
            .map(|(i, _)| i)
            .collect();
        let pk = &entity.primary_key().name;
        let mut staged = table.rows.clone();
        for &i in &hits {
            for f in entity.fields.iter().filter(|f| f.name != *pk) {
                if let Some(v) = patch.get(&f.name) {
                    staged[i].insert(f.name.clone(), v.clone());
                }
            }
        }
        for &i in &hits {
            check_row(entity, &staged, &staged[i], Some(i))?;
        }
        table.rows = staged;
        Ok(hits.iter().map(|&i| table.rows[i].clone()).collect())
    }

    async fn delete(&self, entity: &EntitySchema, predicate: &Predicate) -> Result<Vec<Record>, StoreError> {
        let mut tables = self.write()?;
        let table = tables.entry(entity.name.clone()).or_default();
        let (removed, kept): (Vec<Record>, Vec<Record>) = table
            .rows
            .drain(..)
            .partition(|row| MemoryStore::matches(entity, predicate, row));
        table.rows = kept;
        Ok(removed)
    }

    async fn upsert(
        &self,
        entity: &EntitySchema,
        record: &Record,
        conflict: &[String],
    ) -> Result<Record, StoreError> {
        let mut tables = self.write()?;
        let table = tables.entry(entity.name.clone()).or_default();
        let existing = table.rows.iter().position(|row| {
            conflict.iter().all(|c| {
                let def = entity.field(c);
                match (row.get(c), record.get(c)) {
                    (Some(a), Some(b)) if !a.is_null() && !b.is_null() => values_equal(def, a, b),
                    _ => false,
                }
            })
        });
        let Some(i) = existing else {
            return insert_row(table, entity, record);
        };
        let mut staged = table.rows.clone();
        for f in entity.fields.iter().filter(|f| !conflict.contains(&f.name)) {
            if let Some(v) = record.get(&f.name) {
                staged[i].insert(f.name.clone(), v.clone());
            }
        }
        check_row(entity, &staged, &staged[i], Some(i))?;
        table.rows = staged;
        Ok(table.rows[i].clone())
    }
}

fn insert_row(table: &mut Table, entity: &EntitySchema, record: &Record) -> Result<Record, StoreError> {
    let mut next_id = table.next_id;
    let mut row = Record::new();
    for f in &entity.fields {
        let value = match record.get(&f.name) {
            Some(v) => {
                if f.generated && f.field_type == FieldType::Integer {
                    if let Some(n) = v.as_i64() {
                        next_id = next_id.max(n);
                    }
                }
                v.clone()
            }
            None => default_value(&mut next_id, f),
        };
        row.insert(f.name.clone(), value);
    }
    check_row(entity, &table.rows, &row, None)?;
    table.next_id = next_id;
    table.rows.push(row.clone());
    Ok(row)
}

fn default_value(next_id: &mut i64, f: &FieldDef) -> Value {
    if let Some(v) = &f.default {
        return v.clone();
    }
    if !f.generated {
        return Value::Null;
    }
    match f.field_type {
        FieldType::Integer => {
            *next_id += 1;
            Value::from(*next_id)
        }
        FieldType::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
        FieldType::Date => Value::String(Utc::now().to_rfc3339()),
        _ => Value::Null,
    }
}

/// NOT NULL, primary key and unique checks of `row` against every other row.
fn check_row(entity: &EntitySchema, rows: &[Record], row: &Record, skip: Option<usize>) -> Result<(), StoreError> {
    for f in &entity.fields {
        let v = row.get(&f.name).unwrap_or(&Value::Null);
        if v.is_null() {
            if !f.nullable {
                return Err(StoreError::Backend(format!(
                    "null value in {}.{} violates not-null constraint",
                    entity.name, f.name
                )));
            }
            continue;
        }
        if !(f.unique || f.primary_key) {
            continue;
        }
        let clash = rows.iter().enumerate().any(|(i, other)| {
            Some(i) != skip
                && other
                    .get(&f.name)
                    .map_or(false, |o| !o.is_null() && values_equal(Some(f), o, v))
        });
        if clash {
            return Err(StoreError::Conflict(format!(
                "duplicate {}.{} = {}",
                entity.name, f.name, v
            )));
        }
    }
    Ok(())
}

fn visible_rows(tables: &Tables, entity: &EntitySchema, predicate: &Predicate, includes: &[ResolvedInclude]) -> Vec<Record> {
    tables
        .get(&entity.name)
        .map(|t| {
            t.rows
                .iter()
                .filter(|row| visible(tables, entity, predicate, includes, row))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// Predicate holds and every required include has at least one related row.
fn visible(tables: &Tables, entity: &EntitySchema, predicate: &Predicate, includes: &[ResolvedInclude], row: &Record) -> bool {
    MemoryStore::matches(entity, predicate, row)
        && includes
            .iter()
            .filter(|i| i.required())
            .all(|inc| !related(tables, entity, inc, row).is_empty())
}

/// Rows of the include target joined to `row`, ordered by the target's primary key.
fn related<'t>(tables: &'t Tables, parent: &EntitySchema, inc: &ResolvedInclude, row: &Record) -> Vec<&'t Record> {
    let key = match row.get(&parent.primary_key().name) {
        Some(v) if !v.is_null() => v,
        _ => return Vec::new(),
    };
    let target = &inc.target;
    let fk = target.field(&inc.relation.foreign_key);
    let predicate = inc.predicate.clone().unwrap_or(Predicate::True);
    let mut out: Vec<&Record> = tables
        .get(&target.name)
        .map(|t| {
            t.rows
                .iter()
                .filter(|r| {
                    r.get(&inc.relation.foreign_key)
                        .map_or(false, |v| !v.is_null() && values_equal(fk, v, key))
                })
                .filter(|r| visible(tables, target, &predicate, &inc.includes, r))
                .collect()
        })
        .unwrap_or_default();
    let pk = target.primary_key();
    out.sort_by(|a, b| order_values(Some(pk), cell(a, &pk.name), cell(b, &pk.name)));
    out
}

/// Project the row and attach its includes under their relation names.
fn shape(
    tables: &Tables,
    entity: &EntitySchema,
    row: Record,
    projection: Option<&[String]>,
    includes: &[ResolvedInclude],
) -> Record {
    let mut out = Record::new();
    for f in &entity.fields {
        if projection.map_or(true, |p| p.iter().any(|n| *n == f.name)) {
            out.insert(f.name.clone(), row.get(&f.name).cloned().unwrap_or(Value::Null));
        }
    }
    for inc in includes {
        let children: Vec<Value> = related(tables, entity, inc, &row)
            .into_iter()
            .map(|r| Value::Object(shape(tables, &inc.target, r.clone(), None, &inc.includes)))
            .collect();
        let attached = if inc.is_many() {
            Value::Array(children)
        } else {
            children.into_iter().next().unwrap_or(Value::Null)
        };
        out.insert(inc.relation.name.clone(), attached);
    }
    out
}

fn window(rows: Vec<Record>, query: &QueryDescriptor) -> Vec<Record> {
    match query.pagination {
        Some(p) => rows
            .into_iter()
            .skip(p.offset() as usize)
            .take(p.limit() as usize)
            .collect(),
        None => rows,
    }
}

fn aggregate(entity: &EntitySchema, agg: &Aggregation, sort: &[SortKey], rows: Vec<Record>, query: &QueryDescriptor) -> Vec<Record> {
    let group_def = entity.field(&agg.group_by);
    let mut groups = group_rows(entity, agg, &rows);
    let direction = sort
        .iter()
        .find(|k| k.field == agg.group_by)
        .map(|k| k.direction)
        .unwrap_or(Direction::Asc);
    groups.sort_by(|(a, _), (b, _)| directed(direction, order_values(group_def, a, b)));
    let out = groups
        .into_iter()
        .map(|(k, seen)| {
            let mut r = Record::new();
            r.insert(agg.group_by.clone(), k);
            r.insert(AGGREGATE_COUNT_KEY.to_string(), Value::from(seen.len() as u64));
            r
        })
        .collect();
    window(out, query)
}

/// Group key with the distinct non-null values of the counted field; NULL keys form one group.
fn group_rows(entity: &EntitySchema, agg: &Aggregation, rows: &[Record]) -> Vec<(Value, Vec<Value>)> {
    let group_def = entity.field(&agg.group_by);
    let count_def = entity.field(&agg.count_distinct);
    let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
    for row in rows {
        let g = cell(row, &agg.group_by).clone();
        let idx = match groups.iter().position(|(k, _)| same_group(group_def, k, &g)) {
            Some(i) => i,
            None => {
                groups.push((g, Vec::new()));
                groups.len() - 1
            }
        };
        let v = cell(row, &agg.count_distinct);
        let seen = &mut groups[idx].1;
        if !v.is_null() && !seen.iter().any(|s| values_equal(count_def, s, v)) {
            seen.push(v.clone());
        }
    }
    groups
}

fn same_group(def: Option<&FieldDef>, a: &Value, b: &Value) -> bool {
    match (a.is_null(), b.is_null()) {
        (true, true) => true,
        (false, false) => values_equal(def, a, b),
        _ => false,
    }
}

fn sort_rows(entity: &EntitySchema, keys: &[SortKey], rows: &mut [Record]) {
    rows.sort_by(|a, b| {
        for k in keys {
            let def = entity.field(&k.field);
            let ord = directed(k.direction, order_values(def, cell(a, &k.field), cell(b, &k.field)));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn directed(direction: Direction, ord: Ordering) -> Ordering {
    match direction {
        Direction::Asc => ord,
        Direction::Desc => ord.reverse(),
    }
}

/// Total order for sorting: NULL is greater than every value.
fn order_values(def: Option<&FieldDef>, a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => compare(def, a, b).unwrap_or_else(|| a.to_string().cmp(&b.to_string())),
    }
}

fn cell<'r>(row: &'r Record, field: &str) -> &'r Value {
    row.get(field).unwrap_or(&Value::Null)
}

fn eval(entity: &EntitySchema, pred: &Predicate, row: &Record) -> Option<bool> {
    match pred {
        Predicate::True => Some(true),
        Predicate::Compare { field, op, value } => {
            let v = cell(row, field);
            match (op, value) {
                (Comparison::Eq, Value::Null) => return Some(v.is_null()),
                (Comparison::Ne, Value::Null) => return Some(!v.is_null()),
                _ => {}
            }
            if v.is_null() {
                return None;
            }
            match compare(entity.field(field), v, value) {
                Some(ord) => Some(match op {
                    Comparison::Eq => ord == Ordering::Equal,
                    Comparison::Ne => ord != Ordering::Equal,
                    Comparison::Gt => ord == Ordering::Greater,
                    Comparison::Lt => ord == Ordering::Less,
                    Comparison::Gte => ord != Ordering::Less,
                    Comparison::Lte => ord != Ordering::Greater,
                }),
                None => match op {
                    Comparison::Eq => Some(v == value),
                    Comparison::Ne => Some(v != value),
                    _ => None,
                },
            }
        }
        Predicate::Like { field, needle } => {
            let v = cell(row, field);
            if v.is_null() {
                return None;
            }
            Some(text_of(v).to_lowercase().contains(&needle.to_lowercase()))
        }
        Predicate::In { field, values } | Predicate::NotIn { field, values } => {
            let negated = matches!(pred, Predicate::NotIn { .. });
            if values.is_empty() {
                return Some(negated);
            }
            let v = cell(row, field);
            if v.is_null() {
                return None;
            }
            let def = entity.field(field);
            if values.iter().any(|x| !x.is_null() && values_equal(def, v, x)) {
                return Some(!negated);
            }
            if values.iter().any(Value::is_null) {
                return None;
            }
            Some(negated)
        }
        Predicate::Between { field, low, high } => {
            let v = cell(row, field);
            if v.is_null() || low.is_null() || high.is_null() {
                return None;
            }
            let def = entity.field(field);
            let lo = compare(def, v, low)?;
            let hi = compare(def, v, high)?;
            Some(lo != Ordering::Less && hi != Ordering::Greater)
        }
        Predicate::Overlap { field, values } => {
            let items = cell(row, field).as_array()?;
            let def = entity.field(field);
            Some(items.iter().any(|i| {
                !i.is_null() && values.iter().any(|x| !x.is_null() && values_equal(def, i, x))
            }))
        }
        Predicate::Contains { field, value } => {
            let v = cell(row, field);
            if v.is_null() {
                return None;
            }
            let def = entity.field(field);
            match (def.map_or(false, |d| d.array), value) {
                (true, Value::Array(wanted)) => {
                    let items = v.as_array()?;
                    Some(wanted.iter().all(|w| {
                        !w.is_null() && items.iter().any(|i| !i.is_null() && values_equal(def, i, w))
                    }))
                }
                _ => Some(json_contains(v, value)),
            }
        }
        Predicate::And(items) => {
            let mut unknown = false;
            for p in items {
                match eval(entity, p, row) {
                    Some(false) => return Some(false),
                    None => unknown = true,
                    Some(true) => {}
                }
            }
            if unknown {
                None
            } else {
                Some(true)
            }
        }
        Predicate::Or(items) => {
            let mut unknown = false;
            for p in items {
                match eval(entity, p, row) {
                    Some(true) => return Some(true),
                    None => unknown = true,
                    Some(false) => {}
                }
            }
            if unknown {
                None
            } else {
                Some(false)
            }
        }
    }
}

/// jsonb `@>`: objects by key, arrays by element, scalars by equality.
fn json_contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Object(h), Value::Object(n)) => n
            .iter()
            .all(|(k, nv)| h.get(k).map_or(false, |hv| json_contains(hv, nv))),
        (Value::Array(h), Value::Array(n)) => n
            .iter()
            .all(|nv| h.iter().any(|hv| json_contains(hv, nv))),
        (Value::Array(h), scalar) if !scalar.is_object() => h.iter().any(|hv| hv == scalar),
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => haystack == needle,
    }
}

fn text_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn values_equal(def: Option<&FieldDef>, a: &Value, b: &Value) -> bool {
    match compare(def, a, b) {
        Some(ord) => ord == Ordering::Equal,
        None => a == b,
    }
}

/// Ordering of two non-null scalars as the column type sees them; `None` when incomparable.
fn compare(def: Option<&FieldDef>, a: &Value, b: &Value) -> Option<Ordering> {
    let field_type = def.map(|d| &d.field_type);
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => Some(i.cmp(&j)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::Number(x), Value::String(s)) => x.as_f64()?.partial_cmp(&s.trim().parse::<f64>().ok()?),
        (Value::String(s), Value::Number(y)) => s.trim().parse::<f64>().ok()?.partial_cmp(&y.as_f64()?),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => match field_type {
            Some(FieldType::Date) => match (parse_timestamp(x), parse_timestamp(y)) {
                (Some(p), Some(q)) => Some(p.cmp(&q)),
                _ => Some(x.cmp(y)),
            },
            Some(FieldType::Uuid) => Some(x.to_lowercase().cmp(&y.to_lowercase())),
            _ => Some(x.cmp(y)),
        },
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(d) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(d.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_str;
    use serde_json::json;

    fn entity() -> std::sync::Arc<EntitySchema> {
        let reg = load_from_str(
            r#"{ "entities": [ { "name": "Book", "fields": [
                { "name": "id", "type": "integer", "isPrimaryKey": true, "generated": true },
                { "name": "title", "type": "string", "nullable": false },
                { "name": "isbn", "type": "string", "unique": true },
                { "name": "year", "type": "integer" },
                { "name": "tags", "type": "string", "array": true },
                { "name": "meta", "type": "json" }
            ] } ] }"#,
        )
        .unwrap();
        reg.require("Book").unwrap().clone()
    }

    fn row(v: Value) -> Record {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn null_column_is_unknown_for_comparisons() {
        let book = entity();
        let r = row(json!({ "id": 1, "title": "x", "year": null }));
        assert!(!MemoryStore::matches(&book, &Predicate::ne("year", json!(2000)), &r));
        assert!(!MemoryStore::matches(
            &book,
            &Predicate::NotIn { field: "year".into(), values: vec![json!(1)] },
            &r
        ));
        assert!(MemoryStore::matches(&book, &Predicate::eq("year", Value::Null), &r));
        let either = Predicate::Or(vec![
            Predicate::Compare { field: "year".into(), op: Comparison::Gt, value: json!(1) },
            Predicate::eq("title", json!("x")),
        ]);
        assert!(MemoryStore::matches(&book, &either, &r));
    }

    #[test]
    fn array_and_json_operators() {
        let book = entity();
        let r = row(json!({ "id": 1, "title": "x", "tags": ["sea", "magic"], "meta": { "lang": "en", "n": [1, 2] } }));
        let overlap = Predicate::Overlap { field: "tags".into(), values: vec![json!("magic"), json!("war")] };
        assert!(MemoryStore::matches(&book, &overlap, &r));
        let all = Predicate::Contains { field: "tags".into(), value: json!(["sea", "war"]) };
        assert!(!MemoryStore::matches(&book, &all, &r));
        let meta = Predicate::Contains { field: "meta".into(), value: json!({ "n": [2] }) };
        assert!(MemoryStore::matches(&book, &meta, &r));
    }

    #[tokio::test]
    async fn enforces_unique_and_generates_keys() {
        let store = MemoryStore::new();
        let book = entity();
        let a = store
            .insert(&book, &row(json!({ "title": "A", "isbn": "1" })))
            .await
            .unwrap();
        assert_eq!(a["id"], json!(1));
        let err = store
            .insert(&book, &row(json!({ "title": "B", "isbn": "1" })))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let err = store.insert(&book, &row(json!({ "isbn": "2" }))).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        let b = store
            .insert(&book, &row(json!({ "title": "B", "isbn": "2" })))
            .await
            .unwrap();
        assert_eq!(b["id"], json!(2));
    }

    #[tokio::test]
    async fn update_is_all_or_nothing_on_conflict() {
        let store = MemoryStore::new();
        let book = entity();
        for (t, i) in [("A", "1"), ("B", "2")] {
            store.insert(&book, &row(json!({ "title": t, "isbn": i }))).await.unwrap();
        }
        let err = store
            .update(&book, &Predicate::True, &row(json!({ "isbn": "9" })))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let q = QueryDescriptor::new(Predicate::eq("isbn", json!("9")));
        assert_eq!(store.count(&book, &q).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sorts_nulls_last_ascending() {
        let store = MemoryStore::new();
        let book = entity();
        for (t, y) in [("A", json!(2001)), ("B", Value::Null), ("C", json!(1999))] {
            store.insert(&book, &row(json!({ "title": t, "year": y }))).await.unwrap();
        }
        let q = QueryDescriptor::new(Predicate::True).with_sort(vec![SortKey::asc("year")]);
        let titles: Vec<Value> = store
            .select(&book, &q)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r["title"].clone())
            .collect();
        assert_eq!(titles, vec![json!("C"), json!("A"), json!("B")]);
        let q = QueryDescriptor::new(Predicate::True).with_sort(vec![SortKey::desc("year")]);
        let first = store.select(&book, &q).await.unwrap();
        assert_eq!(first[0]["title"], json!("B"));
    }
}
