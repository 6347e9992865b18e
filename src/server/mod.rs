//! Server module for tablegate

pub mod handler;
pub mod init;
pub mod listener;

pub use init::{load_database_file, maybe_initialize, InitConfig, InitError, InitResult};
pub use listener::{start_test_server, ServerError, ServerHandle, TablegateServer};
