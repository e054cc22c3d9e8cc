//! Schema CRUD: schema-driven generic CRUD engine over PostgreSQL.

pub mod config;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod query;
pub mod response;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use config::{load_from_path, load_from_str, resolve, EngineSettings, EntitySchema, SchemaRegistry};
pub use error::{AppError, ConfigError, StoreError, ValidationError};
pub use filter::{Filter, Predicate};
pub use handlers::{EntityHandlers, HandlerFactory, HandlerOptions, ListRequest};
pub use query::{FindOptions, QueryComposer, QueryDescriptor};
pub use response::{Envelope, Paginator, Reply};
pub use service::{CrudService, FieldValidator, ValidationMode};
pub use state::AppState;
pub use store::{MemoryStore, PgStore, Record, StorageAdapter};
