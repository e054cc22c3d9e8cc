//! Filter expressions and their translation into predicates.

mod expr;
mod predicate;
mod translate;

pub use expr::*;
pub use predicate::*;
pub use translate::*;
