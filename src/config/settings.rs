//! Engine settings from the environment (`.env` is honoured when present).

use std::str::FromStr;

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/schema_crud";
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 5;

#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub database_url: String,
    pub max_connections: u32,
    /// Path of the schema registry JSON document.
    pub schema_path: String,
    /// Deepest include chain the query composer accepts.
    pub max_include_depth: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            database_url: DEFAULT_DATABASE_URL.into(),
            max_connections: 5,
            schema_path: "schema.json".into(),
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
        }
    }
}

impl EngineSettings {
    /// Read `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`, `SCHEMA_PATH` and `MAX_INCLUDE_DEPTH`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = EngineSettings::default();
        EngineSettings {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: parse_or(lookup("DATABASE_MAX_CONNECTIONS"), defaults.max_connections),
            schema_path: lookup("SCHEMA_PATH").unwrap_or(defaults.schema_path),
            max_include_depth: parse_or(lookup("MAX_INCLUDE_DEPTH"), defaults.max_include_depth),
        }
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    match raw {
        Some(s) => s.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(value = %s, "ignoring unparsable setting");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn falls_back_to_defaults() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DATABASE_URL", "postgres://db/app"),
            ("MAX_INCLUDE_DEPTH", "three"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
        ]);
        let s = EngineSettings::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(s.database_url, "postgres://db/app");
        assert_eq!(s.max_connections, 12);
        assert_eq!(s.max_include_depth, DEFAULT_MAX_INCLUDE_DEPTH);
        assert_eq!(s.schema_path, "schema.json");
    }
}
