//! Business logic shared by the handlers.

pub mod auth;
pub mod cookies;
