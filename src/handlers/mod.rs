//! Handler factory: request-shaped operations per entity.

pub mod entity;
pub use entity::*;
