//! SQLite game database for the ROM library.
//!
//! The database is an index, not the source of truth: the files in the ROM
//! folders are. It records which digest lives where, for which system, and
//! the metadata looked up at import time. If the database is deleted, it can
//! be rebuilt by rescanning the ROM folders.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::Game;
pub use crate::repo::{Repository, Upserted};
