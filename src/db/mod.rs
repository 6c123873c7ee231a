// Postgres persistence module
pub mod postgres;

pub use postgres::{ExecutionOutcome, PostgresPersistence};
