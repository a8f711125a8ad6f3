//! SQLite persistence for origin locations and order tax state.
//!
//! This module provides:
//! - Database initialization and migrations
//! - The `Repository`, which implements the location catalog and order
//!   store collaborator traits

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::Repository;
