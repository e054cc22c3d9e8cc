//! Bind parameters: JSON cells to values sqlx can encode.

use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::Database;
use uuid::Uuid;

/// One bound parameter. Rendered statements cast every placeholder to the
/// column type, so a parameter only announces its own wire type.
#[derive(Clone, Debug, PartialEq)]
pub enum BindValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Jsonb(Value),
}

impl From<&Value> for BindValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => BindValue::Null,
            Value::Bool(b) => BindValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => BindValue::Int(i),
                None => n.as_f64().map_or(BindValue::Null, BindValue::Float),
            },
            Value::String(s) => Uuid::parse_str(s).map_or_else(|_| BindValue::Text(s.clone()), BindValue::Uuid),
            Value::Array(_) | Value::Object(_) => BindValue::Jsonb(v.clone()),
        }
    }
}

impl BindValue {
    fn wire_type(&self) -> &'static str {
        match self {
            BindValue::Null | BindValue::Text(_) => "TEXT",
            BindValue::Bool(_) => "BOOL",
            BindValue::Int(_) => "INT8",
            BindValue::Float(_) => "FLOAT8",
            BindValue::Uuid(_) => "UUID",
            BindValue::Jsonb(_) => "JSONB",
        }
    }
}

impl<'q> Encode<'q, Postgres> for BindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self {
            BindValue::Null => Ok(IsNull::Yes),
            BindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf),
            BindValue::Int(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf),
            BindValue::Float(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf),
            BindValue::Text(s) => <String as Encode<Postgres>>::encode_by_ref(s, buf),
            BindValue::Uuid(u) => <Uuid as Encode<Postgres>>::encode_by_ref(u, buf),
            BindValue::Jsonb(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf),
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(PgTypeInfo::with_name(self.wire_type()))
    }
}

impl sqlx::Type<Postgres> for BindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}
