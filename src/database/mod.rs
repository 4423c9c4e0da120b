//! Database Module
//!
//! Postgres connection management for the user store.

pub mod connection;

pub use connection::{DatabaseConfig, DatabasePool};
