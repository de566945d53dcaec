//! Parameterized, schema-validated SQL template builder (C7, §4.7).
//!
//! Produces the six queries and four commands every [`super::BackendStore`]
//! needs, minified (comments and redundant whitespace stripped) and with
//! only pre-validated schema/table identifiers ever concatenated into the
//! string -- every *value* is a bind parameter. This replaces the source's
//! string-formatted SQL with identifier concatenation (spec.md §9).

use regex::Regex;

use kvlite_core::{KvLiteError, KvLiteResult};

/// Number of parent-key columns (`parent_key_0` .. `parent_key_{N-1}`).
const PARENT_KEY_COLUMNS: usize = kvlite_core::MAX_PARENT_KEYS;

/// Which SQL dialect a [`SqlTemplates`] set was built for.
///
/// Drives placeholder syntax (`?` vs. `$n`) and upsert syntax, the only
/// two axes on which the two backends' generated SQL actually differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Sqlite,
    Postgres,
}

fn identifier_regex() -> Regex {
    Regex::new("^[A-Za-z0-9_]+$").expect("static regex is valid")
}

/// Validates a schema or table identifier against `^[A-Za-z0-9_]*$`
/// (schema may be empty; table may not).
fn validate_identifier(name: &str, field: &str, allow_empty: bool) -> KvLiteResult<()> {
    if name.is_empty() {
        return if allow_empty {
            Ok(())
        } else {
            Err(KvLiteError::InvalidArgument(format!(
                "{field} must not be empty"
            )))
        };
    }
    if !identifier_regex().is_match(name) {
        return Err(KvLiteError::InvalidArgument(format!(
            "{field} {name:?} must match ^[A-Za-z0-9_]*$"
        )));
    }
    Ok(())
}

fn minify(sql: &str) -> String {
    sql.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("--"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// All columns in primary-key-then-data order, parent keys last.
fn column_list() -> Vec<String> {
    let mut cols = vec![
        "partition".to_string(),
        "key".to_string(),
        "hash".to_string(),
        "utc_expiry".to_string(),
        "interval".to_string(),
        "value".to_string(),
        "compressed".to_string(),
        "utc_creation".to_string(),
    ];
    for i in 0..PARENT_KEY_COLUMNS {
        cols.push(format!("parent_key_{i}"));
    }
    cols
}

/// The cached, minified command/query strings for one backend instance.
///
/// Built once at configuration time from a validated schema + table name;
/// every instance of the same `(dialect, schema, table)` produces
/// byte-identical templates.
#[derive(Debug, Clone)]
pub struct SqlTemplates {
    pub insert_or_update_entry: String,
    pub delete_entry_children: String,
    pub delete_entry: String,
    pub delete_entries_select: String,
    pub delete_entries_delete: String,
    pub update_entry_expiry: String,
    pub contains_entry: String,
    pub count_entries: String,
    pub peek_entries: String,
    pub peek_entry: String,
    pub peek_value: String,
    pub get_cache_size_in_bytes: String,
}

impl SqlTemplates {
    /// Builds the templates for `dialect` against `schema.table` (or just
    /// `table` when `schema` is empty). Fails fast on invalid identifiers.
    pub fn build(dialect: SqlDialect, schema: &str, table: &str) -> KvLiteResult<Self> {
        validate_identifier(schema, "cache_schema_name", true)?;
        validate_identifier(table, "cache_entries_table_name", false)?;

        let quote = |ident: &str| format!("\"{ident}\"");
        let table_ident = if schema.is_empty() {
            quote(table)
        } else {
            format!("{}.{}", quote(schema), quote(table))
        };

        let ph = Placeholders::new(dialect);
        let cols = column_list();
        let parent_cols: Vec<String> = (0..PARENT_KEY_COLUMNS)
            .map(|i| format!("parent_key_{i}"))
            .collect();

        let insert_or_update_entry = build_upsert(dialect, &table_ident, &cols, &ph);
        let delete_entry_children =
            minify(&format!(
                "SELECT key FROM {table_ident} WHERE partition = {p1} AND ({conds})",
                p1 = ph.next(),
                conds = parent_cols
                    .iter()
                    .map(|c| format!("{c} = {}", ph.next()))
                    .collect::<Vec<_>>()
                    .join(" OR "),
            ));
        let ph = Placeholders::new(dialect);
        let delete_entry = minify(&format!(
            "DELETE FROM {table_ident} WHERE partition = {p1} AND (key = {p2} OR {conds})",
            p1 = ph.next(),
            p2 = ph.next(),
            conds = parent_cols
                .iter()
                .map(|c| format!("{c} = {}", ph.next()))
                .collect::<Vec<_>>()
                .join(" OR "),
        ));

        let ph = Placeholders::new(dialect);
        let delete_entries_select = minify(&format!(
            "SELECT partition, key FROM {table_ident} \
             WHERE ({p1} IS NULL OR partition = {p1}) \
             AND (({p2} = 0 AND utc_expiry < {p3}) OR {p2} = 1)",
            p1 = ph.next_reusable(1),
            p2 = ph.next_reusable(2),
            p3 = ph.next_reusable(3),
        ));
        let ph = Placeholders::new(dialect);
        let delete_entries_delete = minify(&format!(
            "DELETE FROM {table_ident} \
             WHERE ({p1} IS NULL OR partition = {p1}) \
             AND (({p2} = 0 AND utc_expiry < {p3}) OR {p2} = 1)",
            p1 = ph.next_reusable(1),
            p2 = ph.next_reusable(2),
            p3 = ph.next_reusable(3),
        ));

        let ph = Placeholders::new(dialect);
        let update_entry_expiry = minify(&format!(
            "UPDATE {table_ident} SET utc_expiry = {p1} WHERE partition = {p2} AND key = {p3}",
            p1 = ph.next(),
            p2 = ph.next(),
            p3 = ph.next(),
        ));

        let ph = Placeholders::new(dialect);
        let contains_entry = minify(&format!(
            "SELECT 1 FROM {table_ident} WHERE partition = {p1} AND key = {p2}",
            p1 = ph.next(),
            p2 = ph.next(),
        ));

        let ph = Placeholders::new(dialect);
        let count_entries = minify(&format!(
            "SELECT COUNT(*) AS n FROM {table_ident} \
             WHERE ({p1} IS NULL OR partition = {p1}) \
             AND (({p2} = 0 AND utc_expiry >= {p3}) OR {p2} = 1)",
            p1 = ph.next_reusable(1),
            p2 = ph.next_reusable(2),
            p3 = ph.next_reusable(3),
        ));

        let ph = Placeholders::new(dialect);
        let peek_entries = minify(&format!(
            "SELECT {cols} FROM {table_ident} WHERE ({p1} IS NULL OR partition = {p1})",
            cols = cols.join(", "),
            p1 = ph.next(),
        ));

        let ph = Placeholders::new(dialect);
        let peek_entry = minify(&format!(
            "SELECT {cols} FROM {table_ident} WHERE partition = {p1} AND key = {p2}",
            cols = cols.join(", "),
            p1 = ph.next(),
            p2 = ph.next(),
        ));

        let ph = Placeholders::new(dialect);
        let peek_value = minify(&format!(
            "SELECT value, compressed, utc_expiry, interval, utc_creation \
             FROM {table_ident} WHERE partition = {p1} AND key = {p2}",
            p1 = ph.next(),
            p2 = ph.next(),
        ));

        let get_cache_size_in_bytes = minify(&format!(
            "SELECT COALESCE(SUM(LENGTH(partition) + LENGTH(key) + LENGTH(value)), 0) \
             + 24 * COUNT(*) AS size FROM {table_ident}"
        ));

        Ok(Self {
            insert_or_update_entry,
            delete_entry_children,
            delete_entry,
            delete_entries_select,
            delete_entries_delete,
            update_entry_expiry,
            contains_entry,
            count_entries,
            peek_entries,
            peek_entry,
            peek_value,
            get_cache_size_in_bytes,
        })
    }
}

fn build_upsert(dialect: SqlDialect, table_ident: &str, cols: &[String], ph: &Placeholders) -> String {
    let placeholders: Vec<String> = (0..cols.len()).map(|_| ph.next()).collect();
    let update_cols: Vec<&String> = cols
        .iter()
        .filter(|c| c.as_str() != "partition" && c.as_str() != "key")
        .collect();
    let set_clause = match dialect {
        SqlDialect::Sqlite => update_cols
            .iter()
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", "),
        SqlDialect::Postgres => update_cols
            .iter()
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect::<Vec<_>>()
            .join(", "),
    };
    minify(&format!(
        "INSERT INTO {table_ident} ({cols}) VALUES ({vals}) \
         ON CONFLICT (partition, key) DO UPDATE SET {set_clause}",
        cols = cols.join(", "),
        vals = placeholders.join(", "),
    ))
}

/// Generates dialect-appropriate bind placeholders (`?` for SQLite,
/// incrementing `$n` for Postgres) while building a template.
struct Placeholders {
    dialect: SqlDialect,
    counter: std::cell::Cell<u32>,
}

impl Placeholders {
    fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            counter: std::cell::Cell::new(0),
        }
    }

    /// Next placeholder, advancing the counter.
    fn next(&self) -> String {
        let n = self.counter.get() + 1;
        self.counter.set(n);
        self.render(n)
    }

    /// Returns the placeholder for a specific, possibly-repeated logical
    /// parameter index (used where the same bind value appears more than
    /// once in a template, e.g. the `partition` filter).
    fn next_reusable(&self, logical_index: u32) -> String {
        self.render(logical_index)
    }

    fn render(&self, n: u32) -> String {
        match self.dialect {
            SqlDialect::Sqlite => "?".to_string(),
            SqlDialect::Postgres => format!("${n}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_table_name() {
        let err = SqlTemplates::build(SqlDialect::Sqlite, "", "bad; table").unwrap_err();
        assert!(matches!(err, KvLiteError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_invalid_schema_name() {
        let err = SqlTemplates::build(SqlDialect::Sqlite, "bad-schema", "t").unwrap_err();
        assert!(matches!(err, KvLiteError::InvalidArgument(_)));
    }

    #[test]
    fn empty_schema_is_allowed() {
        assert!(SqlTemplates::build(SqlDialect::Sqlite, "", "kvl_cache_entries").is_ok());
    }

    #[test]
    fn empty_table_is_rejected() {
        assert!(SqlTemplates::build(SqlDialect::Sqlite, "kvlite", "").is_err());
    }

    #[test]
    fn sqlite_templates_use_question_mark_placeholders() {
        let t = SqlTemplates::build(SqlDialect::Sqlite, "", "entries").unwrap();
        assert!(t.contains_entry.contains('?'));
        assert!(!t.contains_entry.contains('$'));
    }

    #[test]
    fn postgres_templates_use_dollar_placeholders() {
        let t = SqlTemplates::build(SqlDialect::Postgres, "", "entries").unwrap();
        assert!(t.contains_entry.contains("$1"));
        assert!(t.contains_entry.contains("$2"));
    }

    #[test]
    fn templates_are_minified_single_line() {
        let t = SqlTemplates::build(SqlDialect::Sqlite, "kvlite", "entries").unwrap();
        assert!(!t.peek_entries.contains('\n'));
        assert!(!t.insert_or_update_entry.contains("--"));
    }

    #[test]
    fn templates_carry_schema_qualified_table_name() {
        let t = SqlTemplates::build(SqlDialect::Sqlite, "kvlite", "entries").unwrap();
        assert!(t.peek_entries.contains("\"kvlite\".\"entries\""));
    }

    #[test]
    fn upsert_lists_all_parent_key_columns() {
        let t = SqlTemplates::build(SqlDialect::Sqlite, "", "entries").unwrap();
        for i in 0..PARENT_KEY_COLUMNS {
            assert!(t.insert_or_update_entry.contains(&format!("parent_key_{i}")));
        }
    }

    #[test]
    fn delete_entry_references_every_parent_column() {
        let t = SqlTemplates::build(SqlDialect::Sqlite, "", "entries").unwrap();
        for i in 0..PARENT_KEY_COLUMNS {
            assert!(t.delete_entry.contains(&format!("parent_key_{i} = ?")));
        }
    }

    #[test]
    fn same_inputs_produce_identical_templates() {
        let a = SqlTemplates::build(SqlDialect::Sqlite, "kvlite", "entries").unwrap();
        let b = SqlTemplates::build(SqlDialect::Sqlite, "kvlite", "entries").unwrap();
        assert_eq!(a.peek_entries, b.peek_entries);
        assert_eq!(a.insert_or_update_entry, b.insert_or_update_entry);
    }
}
