//! SQL layer - parsing and relation extraction
//!
//! This module provides:
//! - `Parser`: parses exactly one statement in the dialect of a backend engine
//! - `extract_relations`: the set of tables a statement touches, and whether
//!   it is a plain read

pub mod error;
pub mod parser;
pub mod relations;

pub use error::{SqlError, SqlResult};
pub use parser::Parser;
pub use relations::{extract_relations, Relations};
