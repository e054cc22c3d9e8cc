//! CRUD engine and schema-driven payload validation.

pub mod crud;
mod validation;
pub use crud::{CountedRows, CreateManyOptions, CrudService, FindAndCount, ResultFormat, DEFAULT_PER_PAGE};
pub use validation::{FieldValidator, ValidationMode};
