pub mod capabilities;
pub mod dispatch;
pub mod models;
pub mod monitor;
pub mod persistence;
pub mod queue;
pub mod runtime;
pub mod sqlite;
