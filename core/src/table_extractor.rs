//! Extracts the table names a raw SQL statement touches.
//!
//! The live-query engine needs to know which tables a query depends on so
//! it can decide whether an engine-level change invalidates a cached
//! result. Rather than parsing SQL properly, this walks the statement with
//! a handful of case-insensitive regexes looking for identifiers following
//! `FROM`, `JOIN`, `UPDATE`, `INTO` and `DELETE FROM`. This is a deliberate
//! over-approximation: a statement that joins against a CTE or subquery
//! alias may be credited with a dependency it doesn't really have, which
//! only costs an extra, harmless requery. Under-approximating would miss a
//! real invalidation and silently serve stale data, so every path here
//! errs toward including more tables rather than fewer.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

const IDENT: &str = r#"["'`\[]?([A-Za-z_][A-Za-z0-9_]*)["'`\]]?"#;

static FROM_JOIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b(?:FROM|JOIN|INTO|UPDATE)\s+{IDENT}")).unwrap()
});

static DELETE_FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)\bDELETE\s+FROM\s+{IDENT}")).unwrap());

/// A small set of SQL keywords that are sometimes followed by an
/// identifier-shaped token but never name a table, so the raw regex match
/// needs a denylist to avoid false positives (e.g. `SELECT ... FROM (SELECT
/// 1) AS derived JOIN other`).
const NON_TABLE_KEYWORDS: &[&str] = &[
    "select", "where", "on", "as", "values", "set",
];

/// Returns the set of lowercased table names referenced by `sql`.
///
/// The result is an over-approximation: every table the statement actually
/// touches is guaranteed to be present, but the set may also contain names
/// that aren't real tables (CTE names, subquery aliases). Callers use this
/// purely to decide whether to requery a live query, where an unnecessary
/// requery is harmless and a missed invalidation is not.
pub fn extract_tables(sql: &str) -> BTreeSet<String> {
    let mut tables = BTreeSet::new();

    for captures in FROM_JOIN_RE.captures_iter(sql) {
        if let Some(name) = captures.get(1) {
            push_if_table(&mut tables, name.as_str());
        }
    }
    for captures in DELETE_FROM_RE.captures_iter(sql) {
        if let Some(name) = captures.get(1) {
            push_if_table(&mut tables, name.as_str());
        }
    }

    tables
}

fn push_if_table(tables: &mut BTreeSet<String>, raw: &str) {
    let lower = raw.to_ascii_lowercase();
    if !NON_TABLE_KEYWORDS.contains(&lower.as_str()) {
        tables.insert(lower);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_select() {
        let tables = extract_tables("SELECT * FROM users WHERE id = ?");
        assert_eq!(tables, BTreeSet::from(["users".to_string()]));
    }

    #[test]
    fn join_collects_both_tables() {
        let tables =
            extract_tables("select u.id from users u join orders o on o.user_id = u.id");
        assert_eq!(
            tables,
            BTreeSet::from(["users".to_string(), "orders".to_string()])
        );
    }

    #[test]
    fn case_insensitive_and_quoted_identifiers() {
        let tables = extract_tables(r#"SELECT * FROM "Users" WHERE 1"#);
        assert_eq!(tables, BTreeSet::from(["users".to_string()]));
    }

    #[test]
    fn insert_into_and_update() {
        assert_eq!(
            extract_tables("INSERT INTO todos (title) VALUES (?)"),
            BTreeSet::from(["todos".to_string()])
        );
        assert_eq!(
            extract_tables("UPDATE todos SET done = 1 WHERE id = ?"),
            BTreeSet::from(["todos".to_string()])
        );
    }

    #[test]
    fn delete_from() {
        assert_eq!(
            extract_tables("DELETE FROM todos WHERE id = ?"),
            BTreeSet::from(["todos".to_string()])
        );
    }

    #[test]
    fn over_approximates_rather_than_missing_a_table() {
        let tables = extract_tables(
            "SELECT * FROM (SELECT * FROM inner_table) AS derived JOIN real_table ON 1",
        );
        assert!(tables.contains("inner_table"));
        assert!(tables.contains("real_table"));
    }
}
