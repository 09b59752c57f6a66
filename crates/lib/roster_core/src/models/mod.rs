//! Domain models.
//!
//! These are internal domain models, distinct from the request/response DTOs
//! in the API crate.

pub mod user;
