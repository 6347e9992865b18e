//! tablegate - per-table authorization gateway for relational databases
//!
//! Features:
//! - Catalog of registered databases, their live table sets, tokens and grants
//! - Admin and user tokens; user tokens read only the tables granted to them
//! - Every table a query references is authorized before the query runs
//! - MySQL, PostgreSQL and SQLite backends behind one driver interface

pub mod auth;
pub mod backend;
pub mod catalog;
pub mod gateway;
pub mod server;
pub mod sql;

pub use gateway::{Gateway, GatewayConfig, GatewayRequest, Response};
