//! DDL statement builders for the PostgreSQL dialect
//!
//! Identifiers are always double-quoted so mixed-case table names survive.

use regex::{NoExpand, RegexBuilder};

use crate::error::{MigrateError, MigrateResult};
use crate::models::{ColumnDescriptor, TableDescriptor};

/// Constraint names attached to a table
pub(crate) const TABLE_CONSTRAINTS_SQL: &str = "SELECT c.conname::text \
    FROM pg_constraint c \
    JOIN pg_class tbl ON tbl.oid = c.conrelid \
    WHERE tbl.relname = $1 \
    GROUP BY c.conname \
    ORDER BY c.conname";

/// Index names attached to a table
pub(crate) const TABLE_INDEXES_SQL: &str =
    "SELECT indexname::text FROM pg_indexes WHERE tablename = $1 ORDER BY indexname";

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_definition(column: &ColumnDescriptor) -> String {
    let mut def = format!("{} {}", quote_ident(&column.name), column.data_type);
    if !column.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        def.push_str(" DEFAULT ");
        def.push_str(default);
    }
    def
}

pub fn create_table(table: &TableDescriptor) -> MigrateResult<String> {
    if table.name.is_empty() {
        return Err(MigrateError::InvalidOperation(
            "create table requires a table name".to_string(),
        ));
    }
    for key in &table.primary_key {
        if table.get_column(key).is_none() {
            return Err(MigrateError::InvalidOperation(format!(
                "primary key column \"{}\" is not a column of \"{}\"",
                key, table.name
            )));
        }
    }

    let mut parts: Vec<String> = table.columns.iter().map(column_definition).collect();
    if !table.primary_key.is_empty() {
        parts.push(format!("PRIMARY KEY ({})", quote_list(&table.primary_key)));
    }
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&table.name),
        parts.join(", ")
    ))
}

pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

pub fn add_primary_key(table: &str, columns: &[String]) -> MigrateResult<String> {
    if columns.is_empty() {
        return Err(MigrateError::InvalidOperation(format!(
            "add primary key on \"{}\" requires at least one column",
            table
        )));
    }
    Ok(format!(
        "ALTER TABLE {} ADD PRIMARY KEY ({})",
        quote_ident(table),
        quote_list(columns)
    ))
}

pub fn add_column(table: &str, column: &ColumnDescriptor) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote_ident(table),
        column_definition(column)
    )
}

pub fn drop_column(table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {} CASCADE",
        quote_ident(table),
        quote_ident(column)
    )
}

pub fn rename_column(table: &str, old: &str, new: &str) -> String {
    format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        quote_ident(table),
        quote_ident(old),
        quote_ident(new)
    )
}

/// Default index name: table followed by the indexed columns
pub fn index_name(table: &str, columns: &[String]) -> String {
    format!("{}_{}", table, columns.join("_"))
}

pub fn add_index(
    table: &str,
    columns: &[String],
    unique: bool,
    name: Option<&str>,
) -> MigrateResult<String> {
    if columns.is_empty() {
        return Err(MigrateError::InvalidOperation(format!(
            "index on \"{}\" requires at least one column",
            table
        )));
    }
    let name = name
        .map(str::to_string)
        .unwrap_or_else(|| index_name(table, columns));
    Ok(format!(
        "CREATE {}INDEX {} ON {} ({})",
        if unique { "UNIQUE " } else { "" },
        quote_ident(&name),
        quote_ident(table),
        quote_list(columns)
    ))
}

pub fn drop_index(name: &str) -> String {
    format!("DROP INDEX IF EXISTS {}", quote_ident(name))
}

/// Statements renaming a table together with its constraints, indexes and
/// `seq` sequence. Constraint names are rewritten case-sensitively; index
/// names case-insensitively to the lowercased new name, since generated
/// index names are lowercase.
pub fn rename_table(
    old: &str,
    new: &str,
    constraints: &[String],
    indexes: &[String],
) -> MigrateResult<Vec<String>> {
    if old.is_empty() || new.is_empty() {
        return Err(MigrateError::InvalidOperation(
            "rename table requires both an old and a new name".to_string(),
        ));
    }

    let old_ident = quote_ident(old);
    let mut queries = Vec::new();

    for constraint in constraints {
        queries.push(format!(
            "ALTER TABLE IF EXISTS {} RENAME CONSTRAINT {} TO {}",
            old_ident,
            quote_ident(constraint),
            quote_ident(&constraint.replace(old, new))
        ));
    }

    let old_pattern = RegexBuilder::new(&regex::escape(old))
        .case_insensitive(true)
        .build()
        .map_err(|e| MigrateError::InvalidOperation(e.to_string()))?;
    let new_lower = new.to_lowercase();
    for index in indexes {
        let renamed = old_pattern.replace_all(index, NoExpand(&new_lower));
        if renamed != index.as_str() {
            queries.push(format!(
                "ALTER INDEX IF EXISTS {} RENAME TO {}",
                quote_ident(index),
                quote_ident(&renamed)
            ));
        }
    }

    let new_sequence = format!("{}_seq_seq", new);
    queries.push(format!(
        "ALTER SEQUENCE IF EXISTS {} RENAME TO {}",
        quote_ident(&format!("{}_seq_seq", old)),
        quote_ident(&new_sequence)
    ));
    queries.push(format!(
        "ALTER TABLE IF EXISTS {} ALTER COLUMN seq SET DEFAULT nextval('{}'::regclass)",
        old_ident,
        quote_ident(&new_sequence).replace('\'', "''")
    ));
    queries.push(format!(
        "ALTER TABLE IF EXISTS {} RENAME TO {}",
        old_ident,
        quote_ident(new)
    ));

    Ok(queries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("Users"), "\"Users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_create_table_sql() {
        let table = TableDescriptor::new("Users")
            .column(ColumnDescriptor::new("id", "SERIAL"))
            .column(ColumnDescriptor::new("email", "VARCHAR(255)").nullable())
            .column(ColumnDescriptor::new("active", "BOOLEAN").default_value("true"))
            .primary_key(["id"]);

        assert_eq!(
            create_table(&table).unwrap(),
            "CREATE TABLE IF NOT EXISTS \"Users\" (\"id\" SERIAL NOT NULL, \
             \"email\" VARCHAR(255), \"active\" BOOLEAN NOT NULL DEFAULT true, \
             PRIMARY KEY (\"id\"))"
        );
    }

    #[test]
    fn test_create_table_rejects_unknown_primary_key() {
        let table = TableDescriptor::new("Users")
            .column(ColumnDescriptor::new("id", "SERIAL"))
            .primary_key(["uuid"]);
        assert!(matches!(
            create_table(&table),
            Err(MigrateError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_add_primary_key_sql() {
        assert_eq!(
            add_primary_key("OrderItem", &cols(&["order_id", "item_id"])).unwrap(),
            "ALTER TABLE \"OrderItem\" ADD PRIMARY KEY (\"order_id\", \"item_id\")"
        );
        assert!(add_primary_key("OrderItem", &[]).is_err());
    }

    #[test]
    fn test_column_statements() {
        let column = ColumnDescriptor::new("age", "INTEGER").nullable();
        assert_eq!(
            add_column("Users", &column),
            "ALTER TABLE \"Users\" ADD COLUMN \"age\" INTEGER"
        );
        assert_eq!(
            drop_column("Users", "age"),
            "ALTER TABLE \"Users\" DROP COLUMN \"age\" CASCADE"
        );
        assert_eq!(
            rename_column("Users", "age", "years"),
            "ALTER TABLE \"Users\" RENAME COLUMN \"age\" TO \"years\""
        );
    }

    #[test]
    fn test_index_statements() {
        assert_eq!(
            add_index("Users", &cols(&["email"]), true, None).unwrap(),
            "CREATE UNIQUE INDEX \"Users_email\" ON \"Users\" (\"email\")"
        );
        assert_eq!(
            add_index("Users", &cols(&["a", "b"]), false, Some("users_ab")).unwrap(),
            "CREATE INDEX \"users_ab\" ON \"Users\" (\"a\", \"b\")"
        );
        assert_eq!(drop_index("users_ab"), "DROP INDEX IF EXISTS \"users_ab\"");
    }

    #[test]
    fn test_rename_table_statements() {
        let queries = rename_table(
            "UserAccount",
            "Member",
            &cols(&["UserAccount_pkey", "UserAccount_email_key"]),
            &cols(&["useraccount_pkey", "UserAccount_Email_idx", "unrelated_idx"]),
        )
        .unwrap();

        assert_eq!(
            queries,
            vec![
                "ALTER TABLE IF EXISTS \"UserAccount\" RENAME CONSTRAINT \"UserAccount_pkey\" TO \"Member_pkey\"",
                "ALTER TABLE IF EXISTS \"UserAccount\" RENAME CONSTRAINT \"UserAccount_email_key\" TO \"Member_email_key\"",
                "ALTER INDEX IF EXISTS \"useraccount_pkey\" RENAME TO \"member_pkey\"",
                "ALTER INDEX IF EXISTS \"UserAccount_Email_idx\" RENAME TO \"member_Email_idx\"",
                "ALTER SEQUENCE IF EXISTS \"UserAccount_seq_seq\" RENAME TO \"Member_seq_seq\"",
                "ALTER TABLE IF EXISTS \"UserAccount\" ALTER COLUMN seq SET DEFAULT nextval('\"Member_seq_seq\"'::regclass)",
                "ALTER TABLE IF EXISTS \"UserAccount\" RENAME TO \"Member\"",
            ]
        );
    }

    #[test]
    fn test_rename_table_treats_names_literally() {
        let queries = rename_table("a.b", "c", &[], &cols(&["axb_idx"])).unwrap();
        assert!(!queries.iter().any(|q| q.starts_with("ALTER INDEX")));
    }
}
