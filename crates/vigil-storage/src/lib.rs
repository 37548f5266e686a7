pub mod db;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod store;

pub use db::Database;
pub use memory::MemoryStore;
pub use models::{Incident, IncidentKind};
pub use store::SessionStore;
