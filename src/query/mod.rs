//! Query descriptors and the composer that builds them.

mod composer;
mod descriptor;

pub use composer::*;
pub use descriptor::*;
