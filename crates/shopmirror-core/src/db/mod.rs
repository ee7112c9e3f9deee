//! Local persistent store for shopmirror

mod connection;
mod manager;
mod migrations;
mod schema;
mod store;

pub use connection::Database;
pub use manager::{StoreLocation, StoreManager};
pub use schema::{StoreDescriptor, StoreSet};
pub use store::{LocalStore, WriteBatch};
