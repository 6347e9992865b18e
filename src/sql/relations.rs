//! Relation extraction
//!
//! Finds every table a statement reads or writes, without executing it.
//! The statement is walked with sqlparser's [`Visitor`], which reaches every
//! relation position: FROM and JOIN items, subqueries in any expression,
//! set operations, derived tables and DML targets. String literals and
//! comments never reach the AST, so they can't produce false positives.
//!
//! `TABLE name` commands inside set expressions carry a bare string instead
//! of an object name, so they are picked up from each query body directly.
//!
//! CTE names are resolved with SQL scoping. A reference that is not in scope
//! of a CTE with that name is reported as a table, so a table is never hidden
//! by a CTE that can't actually be seen from the reference.
//!
//! On MySQL a qualifier names a database on the same server. Only the
//! connection's own database may be named; any other qualifier is refused.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::ControlFlow;

use sqlparser::ast::{
    Ident, ObjectName, ObjectNamePart, ObjectType, Query, SetExpr, Statement, Table, TableObject,
    Visit, Visitor,
};

use crate::backend::EngineType;
use crate::sql::error::{SqlError, SqlResult};
use crate::sql::parser::Parser;

/// Tables referenced by one statement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relations {
    /// Referenced table names, canonicalized for the engine
    pub tables: BTreeSet<String>,
    /// True for a plain query with no locking clause and no data-modifying part
    pub read_only: bool,
}

/// Parse `sql` with the engine's dialect and collect its relations
///
/// `database` is the database the connection is bound to.
pub fn extract_relations(sql: &str, engine: EngineType, database: &str) -> SqlResult<Relations> {
    let dialect = Parser::dialect_for(engine);
    let statement = Parser::parse_one(sql, dialect.as_ref())?;
    collect_relations(&statement, engine, database)
}

/// Collect the relations of an already-parsed statement
pub fn collect_relations(
    statement: &Statement,
    engine: EngineType,
    database: &str,
) -> SqlResult<Relations> {
    let mut collector = RelationCollector::new(engine, database);
    if let ControlFlow::Break(err) = statement.visit(&mut collector) {
        return Err(err);
    }
    Ok(Relations {
        tables: collector.tables,
        read_only: collector.read_only,
    })
}

/// Canonical name of one identifier as the engine resolves it
pub fn normalize_ident(ident: &Ident, engine: EngineType) -> String {
    match engine {
        EngineType::Postgres if ident.quote_style.is_some() => ident.value.clone(),
        EngineType::Postgres | EngineType::Sqlite => ident.value.to_lowercase(),
        EngineType::MySql => ident.value.clone(),
    }
}

struct RelationCollector<'a> {
    engine: EngineType,
    database: &'a str,
    tables: BTreeSet<String>,
    read_only: bool,
    /// CTE names visible in each enclosing query, innermost last
    scopes: Vec<HashSet<String>>,
    /// Visibility of each CTE body, registered when its WITH is entered
    cte_scopes: HashMap<*const Query, HashSet<String>>,
}

impl<'a> RelationCollector<'a> {
    fn new(engine: EngineType, database: &'a str) -> Self {
        RelationCollector {
            engine,
            database,
            tables: BTreeSet::new(),
            read_only: true,
            scopes: Vec::new(),
            cte_scopes: HashMap::new(),
        }
    }

    fn in_scope(&self, name: &str) -> bool {
        self.scopes.last().is_some_and(|scope| scope.contains(name))
    }

    fn check_qualifiers(&self, qualifiers: &[&str], name: &str) -> ControlFlow<SqlError> {
        if self.engine != EngineType::MySql {
            return ControlFlow::Continue(());
        }
        match qualifiers {
            [] => ControlFlow::Continue(()),
            [database] if *database == self.database => ControlFlow::Continue(()),
            _ => ControlFlow::Break(SqlError::Unsupported(format!(
                "cross-database reference '{}'",
                name
            ))),
        }
    }

    fn record(&mut self, name: &ObjectName) -> ControlFlow<SqlError> {
        let mut parts = Vec::with_capacity(name.0.len());
        for part in &name.0 {
            match part {
                ObjectNamePart::Identifier(ident) => parts.push(ident),
                #[allow(unreachable_patterns)]
                _ => {
                    return ControlFlow::Break(SqlError::Unsupported(format!(
                        "relation name '{}'",
                        name
                    )))
                }
            }
        }
        let Some((ident, qualifiers)) = parts.split_last() else {
            return ControlFlow::Continue(());
        };
        let qualifiers: Vec<&str> = qualifiers.iter().map(|q| q.value.as_str()).collect();
        self.check_qualifiers(&qualifiers, &name.to_string())?;

        let table = normalize_ident(ident, self.engine);
        if qualifiers.is_empty() && self.in_scope(&table) {
            return ControlFlow::Continue(());
        }
        self.tables.insert(table);
        ControlFlow::Continue(())
    }

    /// Record a `TABLE name` command
    ///
    /// Its quoting is not kept, so on PostgreSQL both the verbatim and the
    /// folded spelling are reported and both must be granted.
    fn record_table_command(&mut self, table: &Table) -> ControlFlow<SqlError> {
        let Some(name) = &table.table_name else {
            return ControlFlow::Continue(());
        };
        let qualifiers: Vec<&str> = table.schema_name.iter().map(String::as_str).collect();
        self.check_qualifiers(&qualifiers, &table.to_string())?;

        let candidates: BTreeSet<String> = match self.engine {
            EngineType::Postgres => [name.clone(), name.to_lowercase()].into(),
            EngineType::Sqlite => [name.to_lowercase()].into(),
            EngineType::MySql => [name.clone()].into(),
        };
        if qualifiers.is_empty() && candidates.iter().all(|c| self.in_scope(c)) {
            return ControlFlow::Continue(());
        }
        self.tables.extend(candidates);
        ControlFlow::Continue(())
    }

    /// Walk set operations of one query body; nested queries are visited on their own
    fn record_set_expr(&mut self, body: &SetExpr) -> ControlFlow<SqlError> {
        match body {
            SetExpr::Table(table) => self.record_table_command(table),
            SetExpr::SetOperation { left, right, .. } => {
                self.record_set_expr(left)?;
                self.record_set_expr(right)
            }
            _ => ControlFlow::Continue(()),
        }
    }

    fn enter_query(&mut self, query: &Query) -> ControlFlow<SqlError> {
        let enclosing = self.scopes.last().cloned().unwrap_or_default();
        let key = query as *const Query;

        let mut scope = self.cte_scopes.remove(&key).unwrap_or(enclosing);

        if let Some(with) = &query.with {
            let names: Vec<String> = with
                .cte_tables
                .iter()
                .map(|cte| normalize_ident(&cte.alias.name, self.engine))
                .collect();

            // Non-recursive bodies see only the CTEs defined before them
            for (idx, cte) in with.cte_tables.iter().enumerate() {
                let mut visible = scope.clone();
                let defined = if with.recursive { &names[..] } else { &names[..idx] };
                visible.extend(defined.iter().cloned());
                self.cte_scopes.insert(&*cte.query as *const Query, visible);
            }
            scope.extend(names);
        }
        self.scopes.push(scope);

        if !query.locks.is_empty() {
            self.read_only = false;
        }
        if let SetExpr::Select(select) = query.body.as_ref() {
            if select.into.is_some() {
                self.read_only = false;
            }
        }
        self.record_set_expr(&query.body)
    }
}

impl Visitor for RelationCollector<'_> {
    type Break = SqlError;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        self.enter_query(query)
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.scopes.pop();
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        self.record(relation)
    }

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<Self::Break> {
        match statement {
            Statement::Query(_) => {}
            Statement::Insert(insert) => {
                self.read_only = false;
                if let TableObject::TableName(name) = &insert.table {
                    self.record(name)?;
                }
            }
            Statement::Drop {
                object_type: ObjectType::Table | ObjectType::View,
                names,
                ..
            } => {
                self.read_only = false;
                for name in names {
                    self.record(name)?;
                }
            }
            _ => self.read_only = false,
        }
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(sql: &str, engine: EngineType) -> Vec<String> {
        extract_relations(sql, engine, "shop")
            .unwrap()
            .tables
            .into_iter()
            .collect()
    }

    #[test]
    fn test_join_with_aliases() {
        assert_eq!(
            tables(
                "SELECT * FROM orders o JOIN \"Customers\" c ON o.cid = c.id",
                EngineType::Postgres
            ),
            ["Customers", "orders"]
        );
    }

    #[test]
    fn test_postgres_folds_unquoted() {
        assert_eq!(
            tables("SELECT * FROM Orders, \"Orders\"", EngineType::Postgres),
            ["Orders", "orders"]
        );
    }

    #[test]
    fn test_mysql_keeps_case() {
        assert_eq!(
            tables("SELECT * FROM `Orders` JOIN items USING (id)", EngineType::MySql),
            ["Orders", "items"]
        );
    }

    #[test]
    fn test_sqlite_is_case_insensitive() {
        assert_eq!(
            tables("SELECT * FROM \"Orders\" JOIN Items", EngineType::Sqlite),
            ["items", "orders"]
        );
    }

    #[test]
    fn test_schema_qualified_keeps_table_part() {
        assert_eq!(
            tables("SELECT * FROM public.accounts", EngineType::Postgres),
            ["accounts"]
        );
    }

    #[test]
    fn test_mysql_qualifier_must_name_own_database() {
        assert_eq!(
            tables("SELECT * FROM shop.orders JOIN `shop`.items USING (id)", EngineType::MySql),
            ["items", "orders"]
        );
        for sql in [
            "SELECT * FROM hr.orders",
            "SELECT * FROM orders WHERE id IN (SELECT id FROM mysql.user)",
            "SELECT * FROM Shop.orders",
        ] {
            assert!(
                matches!(
                    extract_relations(sql, EngineType::MySql, "shop"),
                    Err(SqlError::Unsupported(_))
                ),
                "{} should be refused",
                sql
            );
        }
    }

    #[test]
    fn test_table_command_is_recorded() {
        assert_eq!(
            tables("SELECT * FROM orders UNION TABLE payroll", EngineType::Postgres),
            ["orders", "payroll"]
        );
        assert_eq!(
            tables(
                "SELECT id FROM a EXCEPT SELECT id FROM b UNION TABLE c",
                EngineType::Postgres
            ),
            ["a", "b", "c"]
        );
        // Quoting is lost, so both spellings are reported
        assert_eq!(
            tables("SELECT * FROM a UNION TABLE Payroll", EngineType::Postgres),
            ["Payroll", "a", "payroll"]
        );
        assert_eq!(
            tables("SELECT * FROM a UNION TABLE Payroll", EngineType::MySql),
            ["Payroll", "a"]
        );
        assert!(matches!(
            extract_relations("SELECT * FROM a UNION TABLE hr.payroll", EngineType::MySql, "shop"),
            Err(SqlError::Unsupported(_))
        ));
    }

    #[test]
    fn test_table_command_respects_cte_scope() {
        assert_eq!(
            tables(
                "WITH recent AS (SELECT * FROM orders) SELECT * FROM archive UNION TABLE recent",
                EngineType::Postgres
            ),
            ["archive", "orders"]
        );
        assert_eq!(
            tables(
                "WITH recent AS (SELECT * FROM orders) TABLE public.recent",
                EngineType::Postgres
            ),
            ["orders", "recent"]
        );
    }

    #[test]
    fn test_read_only_query() {
        let relations = extract_relations("SELECT 1", EngineType::Postgres, "shop").unwrap();
        assert!(relations.tables.is_empty());
        assert!(relations.read_only);
    }

    #[test]
    fn test_write_statements_are_not_read_only() {
        for sql in [
            "INSERT INTO audit (id) VALUES (1)",
            "UPDATE accounts SET balance = 0",
            "DELETE FROM accounts WHERE id = 1",
            "DROP TABLE accounts",
            "SELECT * FROM accounts FOR UPDATE",
        ] {
            let relations = extract_relations(sql, EngineType::Postgres, "shop").unwrap();
            assert!(!relations.read_only, "{} should not be read-only", sql);
            assert!(!relations.tables.is_empty(), "{} should name a table", sql);
        }
    }

    #[test]
    fn test_insert_select_reports_both_sides() {
        assert_eq!(
            tables(
                "INSERT INTO archive SELECT * FROM orders WHERE id < 10",
                EngineType::MySql
            ),
            ["archive", "orders"]
        );
    }

    #[test]
    fn test_cte_out_of_scope_is_a_table() {
        // The first body can't see the second CTE, so `b` there is a real table
        assert_eq!(
            tables(
                "WITH a AS (SELECT * FROM b), b AS (SELECT * FROM c) SELECT * FROM a",
                EngineType::Postgres
            ),
            ["b", "c"]
        );
    }

    #[test]
    fn test_recursive_cte_sees_itself() {
        assert_eq!(
            tables(
                "WITH RECURSIVE tree AS (\
                    SELECT id, parent FROM nodes WHERE parent IS NULL \
                    UNION ALL \
                    SELECT n.id, n.parent FROM nodes n JOIN tree t ON n.parent = t.id\
                 ) SELECT * FROM tree",
                EngineType::Postgres
            ),
            ["nodes"]
        );
    }

    #[test]
    fn test_cte_not_visible_outside_its_query() {
        assert_eq!(
            tables(
                "SELECT * FROM (WITH recent AS (SELECT * FROM orders) SELECT * FROM recent) x \
                 JOIN recent r ON r.id = x.id",
                EngineType::Postgres
            ),
            ["orders", "recent"]
        );
    }

    #[test]
    fn test_qualified_name_is_never_a_cte() {
        assert_eq!(
            tables(
                "WITH accounts AS (SELECT 1 AS id) SELECT * FROM accounts JOIN public.accounts p ON true",
                EngineType::Postgres
            ),
            ["accounts"]
        );
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            extract_relations("SELECT FROM WHERE", EngineType::MySql, "shop"),
            Err(SqlError::Parse(_))
        ));
        assert!(matches!(
            extract_relations("SELECT 1; SELECT 2", EngineType::MySql, "shop"),
            Err(SqlError::Parse(_))
        ));
    }
}
