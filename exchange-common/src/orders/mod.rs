//! Order domain model: sides, transaction types, identifiers, and the
//! order/top-entry structs with submission validation.

mod order;
mod types;

pub use order::*;
pub use types::*;
