//! Common table expression tracking.
//!
//! [`CteRegistry`] records every name a statement defines in a `WITH` clause.
//! [`CteScope`] answers the narrower question walkers need: is this name a
//! CTE *at this point* of the tree? A CTE body does not see itself (unless
//! recursive) nor the siblings defined after it, and a query does not see the
//! CTEs of its sub-queries. A name that fails this check is a real table to
//! the database, so it must be treated as one here too.

use std::collections::{BTreeSet, HashMap};
use std::ops::ControlFlow;

use sqlparser::ast::{Ident, Query, Select, Statement, TableFactor, TableWithJoins, Visit, Visitor};

use crate::parser::object_name_idents;

/// Names defined by the statement's own `WITH` clauses, lowercased.
#[derive(Debug, Clone, Default)]
pub struct CteRegistry {
    names: BTreeSet<String>,
}

impl CteRegistry {
    /// Collect the CTE names defined anywhere in a statement.
    pub fn collect(statement: &Statement) -> Self {
        let mut collector = Collector::default();
        let _ = statement.visit(&mut collector);
        Self {
            names: collector.names,
        }
    }

    /// Check whether a name is defined as a CTE somewhere in the statement.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

#[derive(Default)]
struct Collector {
    names: BTreeSet<String>,
}

impl Visitor for Collector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.names.insert(cte.alias.name.value.to_lowercase());
            }
        }
        ControlFlow::Continue(())
    }
}

struct Frame {
    names: Vec<String>,
    /// A CTE body frame replaces the frame of the query that defines it.
    replaces_parent: bool,
}

/// CTE visibility while walking a statement.
///
/// Walkers call [`CteScope::enter`] from `pre_visit_query` and
/// [`CteScope::exit`] from `post_visit_query`.
pub struct CteScope<'a> {
    registry: &'a CteRegistry,
    frames: Vec<Frame>,
    cte_bodies: HashMap<*const Query, Vec<String>>,
}

impl<'a> CteScope<'a> {
    pub fn new(registry: &'a CteRegistry) -> Self {
        Self {
            registry,
            frames: Vec::new(),
            cte_bodies: HashMap::new(),
        }
    }

    pub fn enter(&mut self, query: &Query) {
        let defined: Vec<String> = query
            .with
            .iter()
            .flat_map(|with| with.cte_tables.iter())
            .map(|cte| cte.alias.name.value.to_lowercase())
            .collect();

        if let Some(with) = &query.with {
            for (idx, cte) in with.cte_tables.iter().enumerate() {
                let visible_upto = if with.recursive { idx + 1 } else { idx };
                self.cte_bodies.insert(
                    &*cte.query as *const Query,
                    defined[..visible_upto].to_vec(),
                );
            }
        }

        let frame = match self.cte_bodies.remove(&(query as *const Query)) {
            // The body of a CTE sees the earlier siblings plus whatever the
            // defining query itself can see.
            Some(siblings) => {
                self.frames.push(Frame {
                    names: siblings,
                    replaces_parent: true,
                });
                Frame {
                    names: defined,
                    replaces_parent: false,
                }
            }
            None => Frame {
                names: defined,
                replaces_parent: false,
            },
        };
        self.frames.push(frame);
    }

    pub fn exit(&mut self) {
        self.frames.pop();
        if self
            .frames
            .last()
            .is_some_and(|frame| frame.replaces_parent)
        {
            self.frames.pop();
        }
    }

    /// Check whether an unqualified name refers to a visible CTE.
    pub fn contains(&self, name: &str) -> bool {
        if !self.registry.contains(name) {
            return false;
        }

        let name = name.to_lowercase();
        let mut skip_next = false;
        for frame in self.frames.iter().rev() {
            if skip_next {
                skip_next = false;
                if !frame.replaces_parent {
                    continue;
                }
            }
            if frame.names.contains(&name) {
                return true;
            }
            if frame.replaces_parent {
                skip_next = true;
            }
        }
        false
    }

    /// Real (non-CTE) tables read directly by a `SELECT`, in `FROM` order.
    pub fn real_tables(&self, select: &Select) -> Vec<TableRef> {
        let mut tables = Vec::new();
        for table_with_joins in &select.from {
            self.collect_tables(table_with_joins, &mut tables);
        }
        tables
    }

    fn collect_tables(&self, table_with_joins: &TableWithJoins, out: &mut Vec<TableRef>) {
        self.collect_factor(&table_with_joins.relation, out);
        for join in &table_with_joins.joins {
            self.collect_factor(&join.relation, out);
        }
    }

    fn collect_factor(&self, factor: &TableFactor, out: &mut Vec<TableRef>) {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let parts = object_name_idents(name).unwrap_or_default();
                if parts.len() == 1 && self.contains(&parts[0].value) {
                    return;
                }
                let name = parts
                    .iter()
                    .map(|part| part.value.as_str())
                    .collect::<Vec<_>>()
                    .join(".");
                out.push(TableRef {
                    name,
                    parts,
                    alias: alias.as_ref().map(|alias| alias.name.clone()),
                });
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.collect_tables(table_with_joins, out),
            _ => {}
        }
    }
}

/// A real table read by a `SELECT`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    /// Dotted, unquoted table name as it currently appears in the tree.
    pub name: String,
    pub parts: Vec<Ident>,
    pub alias: Option<Ident>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::StatementParser;

    fn parse(sql: &str) -> Statement {
        StatementParser::new().parse(sql).unwrap()
    }

    /// Records, for each visited query, whether `name` is a visible CTE.
    struct Visibility<'a> {
        scope: CteScope<'a>,
        name: &'static str,
        seen: Vec<bool>,
    }

    impl Visitor for Visibility<'_> {
        type Break = ();

        fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
            self.scope.enter(query);
            self.seen.push(self.scope.contains(self.name));
            ControlFlow::Continue(())
        }

        fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<()> {
            self.scope.exit();
            ControlFlow::Continue(())
        }
    }

    fn visible(sql: &str, name: &'static str) -> Vec<bool> {
        let statement = parse(sql);
        let registry = CteRegistry::collect(&statement);
        let mut visibility = Visibility {
            scope: CteScope::new(&registry),
            name,
            seen: Vec::new(),
        };
        let _ = statement.visit(&mut visibility);
        visibility.seen
    }

    #[test]
    fn test_collect_names_case_insensitive() {
        let statement = parse(
            "WITH Recent AS (SELECT * FROM default.events), other AS (SELECT * FROM recent) \
             SELECT * FROM other",
        );
        let registry = CteRegistry::collect(&statement);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("RECENT"));
        assert!(registry.contains("other"));
        assert!(!registry.contains("events"));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["other", "recent"]);
    }

    #[test]
    fn test_no_ctes() {
        let registry = CteRegistry::collect(&parse("SELECT * FROM default.events"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cte_visible_in_main_body() {
        // outer query, then the CTE body
        let seen = visible("WITH a AS (SELECT * FROM default.events) SELECT * FROM a", "a");
        assert_eq!(seen, vec![true, false]);
    }

    #[test]
    fn test_cte_body_sees_earlier_siblings_only() {
        let sql = "WITH a AS (SELECT * FROM default.x), b AS (SELECT * FROM a) SELECT * FROM b";
        // outer, body of a, body of b
        assert_eq!(visible(sql, "a"), vec![true, false, true]);
        assert_eq!(visible(sql, "b"), vec![true, false, false]);
    }

    #[test]
    fn test_recursive_cte_sees_itself() {
        let sql = "WITH RECURSIVE a AS (SELECT * FROM default.x) SELECT * FROM a";
        assert_eq!(visible(sql, "a"), vec![true, true]);
    }

    #[test]
    fn test_nested_cte_not_visible_outside() {
        let sql = "SELECT * FROM (WITH a AS (SELECT * FROM default.x) SELECT * FROM a) AS sub";
        // outer, derived table, body of a
        assert_eq!(visible(sql, "a"), vec![false, true, false]);
    }

    #[test]
    fn test_real_tables_skip_ctes_and_use_aliases() {
        let statement = parse(
            "WITH a AS (SELECT * FROM default.x) \
             SELECT * FROM a JOIN default.y AS y ON a.id = y.id JOIN default.z ON a.id = z.id",
        );
        let registry = CteRegistry::collect(&statement);
        let mut scope = CteScope::new(&registry);
        let Statement::Query(query) = &statement else {
            panic!("expected query");
        };
        scope.enter(query);

        let selects = crate::parser::body_selects(&query.body);
        let tables = scope.real_tables(selects[0]);
        assert_eq!(
            tables,
            vec![
                TableRef {
                    name: "default.y".to_string(),
                    parts: vec![Ident::new("default"), Ident::new("y")],
                    alias: Some(Ident::new("y")),
                },
                TableRef {
                    name: "default.z".to_string(),
                    parts: vec![Ident::new("default"), Ident::new("z")],
                    alias: None,
                },
            ]
        );
    }
}
