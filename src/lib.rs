// Core modules
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;
pub mod tasks;

// Re-export commonly used types
pub use config::Settings;
pub use error::{BrokerError, QueueError};
pub use models::*;
pub use queue::{TaskQueue, TaskRecord, TaskState};
pub use tasks::{Task, TaskArgs, TaskError, TaskResult};

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
