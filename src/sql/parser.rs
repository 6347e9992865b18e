//! SQL parser wrapper around sqlparser crate

use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::{Parser as SqlParser, ParserOptions};

use crate::backend::EngineType;
use crate::sql::error::{SqlError, SqlResult};

/// Nesting depth accepted before parsing is refused
pub const RECURSION_LIMIT: usize = 64;

/// SQL parser
pub struct Parser;

impl Parser {
    /// Dialect matching the backend engine's quoting and syntax rules
    pub fn dialect_for(engine: EngineType) -> Box<dyn Dialect> {
        match engine {
            EngineType::MySql => Box::new(MySqlDialect {}),
            EngineType::Postgres => Box::new(PostgreSqlDialect {}),
            EngineType::Sqlite => Box::new(SQLiteDialect {}),
        }
    }

    /// Parse a single SQL statement
    pub fn parse_one(sql: &str, dialect: &dyn Dialect) -> SqlResult<Statement> {
        let mut ast = SqlParser::new(dialect)
            .with_options(ParserOptions::new().with_trailing_commas(false))
            .with_recursion_limit(RECURSION_LIMIT)
            .try_with_sql(sql)?
            .parse_statements()?;

        match ast.len() {
            0 => Err(SqlError::Parse("Empty SQL statement".to_string())),
            1 => Ok(ast.remove(0)),
            _ => Err(SqlError::Parse(
                "Multiple statements not supported".to_string(),
            )),
        }
    }
}
