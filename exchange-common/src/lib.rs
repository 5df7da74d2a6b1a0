// exchange-common: Shared domain types for the matching platform
// Used by exchange-core (engine service) and any future front-end crates

pub mod error;
pub mod logging;
pub mod orders;
pub mod trades;
