//! Typed entities, schema, state machine, and validation — the storage
//! contract and domain vocabulary shared by every other module.

pub mod errors;
pub mod models;
pub mod schema;
pub mod state_machine;
pub mod validation;

pub use errors::{classify_sqlx_error, CoreError, CoreResult};
