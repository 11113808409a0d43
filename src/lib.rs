pub mod aggregate;
pub mod binder;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod fetch;
pub mod table;

pub use error::{DashError, DashResult};
