//! Database schema, models and shared access helpers

pub mod init;
pub mod models;
pub mod registry;
pub mod retry;

pub use init::*;
pub use models::*;
pub use registry::*;
pub use retry::retry_on_lock;
