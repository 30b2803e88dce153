//! Persistence layer: projects, connections, sessions, and transcripts.

pub mod db;
pub mod models;
pub mod repository;

pub use db::Db;
pub use repository::{ConnectionUpdate, NewConnection, Store};
