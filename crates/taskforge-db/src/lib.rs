//! Embedded relational store for the task-orchestration engine: schema,
//! connection pool, and query functions. Every canonical piece of task,
//! dependency, agent, and audit state lives here; everything above this
//! crate talks to SQLite only through these functions.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;

pub use config::DbConfig;
pub use pool::create_pool;
pub use sqlx::SqlitePool;
