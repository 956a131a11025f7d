//! SQL text for the PostgreSQL backend.
//!
//! Everything here is pure string building so it can be unit tested without
//! a server. Identifiers are always double-quoted.

use crate::models::{Column, RowWrite, TableDescriptor};

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Fully qualify a relation name.
pub fn qualify(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

fn column_list(names: &[&str]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Strip the schema part (and quotes) from `pg_get_serial_sequence` output.
pub fn bare_sequence_name(qualified: &str) -> String {
    let last = qualified.rsplit('.').next().unwrap_or(qualified);
    last.trim_matches('"').replace("\"\"", "\"")
}

/// The declared type of a column as DDL text.
pub fn column_type(col: &Column) -> String {
    match col.data_type.as_str() {
        "character varying" => match col.max_length {
            Some(n) => format!("varchar({n})"),
            None => "varchar".into(),
        },
        "character" => match col.max_length {
            Some(n) => format!("char({n})"),
            None => "char".into(),
        },
        "bit" | "bit varying" => match col.max_length {
            Some(n) => format!("{}({n})", col.data_type),
            None => col.data_type.clone(),
        },
        "numeric" => match (col.numeric_precision, col.numeric_scale) {
            (Some(p), Some(s)) => format!("numeric({p},{s})"),
            (Some(p), None) => format!("numeric({p})"),
            _ => "numeric".into(),
        },
        "ARRAY" => {
            let element = col.udt_name.strip_prefix('_').unwrap_or(&col.udt_name);
            format!("{}[]", element)
        }
        "USER-DEFINED" => quote_ident(&col.udt_name),
        other => other.to_string(),
    }
}

/// Statements that create `table` in `schema`, to run in one transaction.
///
/// Column names, types and nullability are replicated along with the
/// primary key. A detected sequence is recreated, wired in as the key
/// default and owned by the key column. Other defaults are copied verbatim
/// unless they call `nextval`.
pub fn create_table_statements(schema: &str, table: &TableDescriptor) -> Vec<String> {
    let mut statements = Vec::new();
    let table_name = qualify(schema, &table.name);
    let key_column = table.single_key();
    let sequence = table.sequence.as_deref().filter(|_| key_column.is_some());

    if let Some(seq) = sequence {
        statements.push(format!(
            "CREATE SEQUENCE IF NOT EXISTS {}",
            qualify(schema, seq)
        ));
    }

    let mut defs: Vec<String> = table
        .columns
        .iter()
        .map(|col| {
            let mut def = format!("{} {}", quote_ident(&col.name), column_type(col));
            if !col.nullable {
                def.push_str(" NOT NULL");
            }
            match (sequence, Some(col.name.as_str()) == key_column) {
                (Some(seq), true) => {
                    def.push_str(&format!(
                        " DEFAULT nextval({}::regclass)",
                        quote_literal(&qualify(schema, seq))
                    ));
                }
                _ => {
                    if let Some(ref default) = col.default {
                        if !default.contains("nextval(") {
                            def.push_str(&format!(" DEFAULT {default}"));
                        }
                    }
                }
            }
            def
        })
        .collect();

    if table.has_primary_key() {
        let keys: Vec<&str> = table.primary_key.iter().map(String::as_str).collect();
        defs.push(format!("PRIMARY KEY ({})", column_list(&keys)));
    }

    statements.push(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        table_name,
        defs.join(",\n    ")
    ));

    if let (Some(seq), Some(key)) = (sequence, key_column) {
        statements.push(format!(
            "ALTER SEQUENCE {} OWNED BY {}.{}",
            qualify(schema, seq),
            table_name,
            quote_ident(key)
        ));
    }

    statements
}

/// Full-table read as one JSON object per row.
///
/// `src.*` inside the call is a whole-row reference, so a column that
/// happens to be named `src` cannot shadow it.
pub fn select_rows(schema: &str, table: &TableDescriptor) -> String {
    let mut sql = format!(
        "SELECT row_to_json(src.*)::text FROM {} AS src",
        qualify(schema, &table.name)
    );
    if table.has_primary_key() {
        let keys: Vec<&str> = table.primary_key.iter().map(String::as_str).collect();
        sql.push_str(&format!(" ORDER BY {}", column_list(&keys)));
    }
    sql
}

/// Every stored key as a JSON array.
pub fn select_keys(schema: &str, table: &str, key_columns: &[String]) -> String {
    let keys: Vec<&str> = key_columns.iter().map(String::as_str).collect();
    format!(
        "SELECT json_build_array({})::text FROM {}",
        column_list(&keys),
        qualify(schema, table)
    )
}

/// Single-row write taking the row as a JSON text parameter `$1`.
///
/// `json_populate_record` against the destination row type does the value
/// coercion, so a value the destination cannot hold is rejected rather than
/// narrowed.
pub fn write_row(schema: &str, table: &TableDescriptor, write: RowWrite) -> String {
    let table_name = qualify(schema, &table.name);
    let columns = column_list(&table.column_names());
    let mut sql = format!(
        "INSERT INTO {table_name} ({columns}) SELECT {columns} FROM json_populate_record(NULL::{table_name}, $1::text::json)"
    );

    if !table.has_primary_key() || write == RowWrite::Append {
        return sql;
    }

    let keys: Vec<&str> = table.primary_key.iter().map(String::as_str).collect();
    let non_key = table.non_key_columns();
    let conflict = format!(" ON CONFLICT ({})", column_list(&keys));
    sql.push_str(&conflict);

    if write == RowWrite::InsertIfAbsent || non_key.is_empty() {
        sql.push_str(" DO NOTHING");
    } else {
        let assignments = non_key
            .iter()
            .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" DO UPDATE SET {assignments}"));
    }
    sql
}

/// Move `sequence` up to the highest key in `table`, never down.
pub fn align_sequence(schema: &str, table: &str, key: &str, sequence: &str) -> String {
    let seq = qualify(schema, sequence);
    format!(
        "SELECT setval({lit}::regclass, m.max_key) \
         FROM (SELECT MAX({key})::bigint AS max_key FROM {table}) m \
         WHERE m.max_key IS NOT NULL AND m.max_key >= 1 \
         AND m.max_key >= (SELECT last_value FROM {seq})",
        lit = quote_literal(&seq),
        key = quote_ident(key),
        table = qualify(schema, table),
        seq = seq,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> TableDescriptor {
        TableDescriptor {
            name: "tags".into(),
            columns: vec![
                Column::new("id", "integer")
                    .not_null()
                    .default_expr("nextval('tags_id_seq'::regclass)"),
                Column::new("name", "character varying").max_length(20),
                Column::new("created", "timestamp with time zone").default_expr("now()"),
            ],
            primary_key: vec!["id".into()],
            sequence: Some("tags_id_seq".into()),
        }
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualify("public", "tags"), "\"public\".\"tags\"");
        assert_eq!(quote_literal("o'neil"), "'o''neil'");
    }

    #[test]
    fn test_column_types() {
        let mut arr = Column::new("labels", "ARRAY");
        arr.udt_name = "_text".into();
        assert_eq!(column_type(&arr), "text[]");

        let mut num = Column::new("price", "numeric");
        num.numeric_precision = Some(12);
        num.numeric_scale = Some(4);
        assert_eq!(column_type(&num), "numeric(12,4)");

        assert_eq!(column_type(&Column::new("n", "character varying")), "varchar");
        assert_eq!(column_type(&Column::new("b", "boolean")), "boolean");
    }

    #[test]
    fn test_create_table_with_sequence() {
        let stmts = create_table_statements("public", &tags());
        assert_eq!(stmts.len(), 3);
        assert_eq!(stmts[0], "CREATE SEQUENCE IF NOT EXISTS \"public\".\"tags_id_seq\"");
        assert!(stmts[1].starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"tags\""));
        assert!(stmts[1].contains(
            "\"id\" integer NOT NULL DEFAULT nextval('\"public\".\"tags_id_seq\"'::regclass)"
        ));
        assert!(stmts[1].contains("\"name\" varchar(20),"));
        assert!(stmts[1].contains("\"created\" timestamp with time zone DEFAULT now()"));
        assert!(stmts[1].contains("PRIMARY KEY (\"id\")"));
        assert_eq!(
            stmts[2],
            "ALTER SEQUENCE \"public\".\"tags_id_seq\" OWNED BY \"public\".\"tags\".\"id\""
        );
    }

    #[test]
    fn test_create_table_without_key() {
        let table = TableDescriptor {
            name: "events".into(),
            columns: vec![
                Column::new("kind", "text").not_null(),
                Column::new("n", "bigint").default_expr("nextval('other_seq'::regclass)"),
            ],
            primary_key: vec![],
            sequence: None,
        };
        let stmts = create_table_statements("public", &table);
        assert_eq!(stmts.len(), 1);
        assert!(!stmts[0].contains("PRIMARY KEY"));
        assert!(!stmts[0].contains("nextval"));
    }

    #[test]
    fn test_upsert_statement() {
        let sql = write_row("public", &tags(), RowWrite::Upsert);
        assert!(sql.starts_with(
            "INSERT INTO \"public\".\"tags\" (\"id\", \"name\", \"created\") SELECT \"id\", \"name\", \"created\" FROM json_populate_record(NULL::\"public\".\"tags\", $1::text::json)"
        ));
        assert!(sql.ends_with(
            "ON CONFLICT (\"id\") DO UPDATE SET \"name\" = EXCLUDED.\"name\", \"created\" = EXCLUDED.\"created\""
        ));
    }

    #[test]
    fn test_insert_if_absent_and_append() {
        let sql = write_row("public", &tags(), RowWrite::InsertIfAbsent);
        assert!(sql.ends_with("ON CONFLICT (\"id\") DO NOTHING"));

        let mut keyless = tags();
        keyless.primary_key.clear();
        let sql = write_row("public", &keyless, RowWrite::Upsert);
        assert!(!sql.contains("ON CONFLICT"));
    }

    #[test]
    fn test_all_key_columns_do_nothing() {
        let link = TableDescriptor {
            name: "tag_links".into(),
            columns: vec![Column::new("a", "integer"), Column::new("b", "integer")],
            primary_key: vec!["a".into(), "b".into()],
            sequence: None,
        };
        let sql = write_row("public", &link, RowWrite::Upsert);
        assert!(sql.ends_with("ON CONFLICT (\"a\", \"b\") DO NOTHING"));
    }

    #[test]
    fn test_select_statements() {
        assert_eq!(
            select_rows("public", &tags()),
            "SELECT row_to_json(src.*)::text FROM \"public\".\"tags\" AS src ORDER BY \"id\""
        );
        assert_eq!(
            select_keys("public", "tags", &["id".to_string()]),
            "SELECT json_build_array(\"id\")::text FROM \"public\".\"tags\""
        );
    }

    #[test]
    fn test_bare_sequence_name() {
        assert_eq!(bare_sequence_name("public.tags_id_seq"), "tags_id_seq");
        assert_eq!(bare_sequence_name("\"My Schema\".\"odd seq\""), "odd seq");
        assert_eq!(bare_sequence_name("plain_seq"), "plain_seq");
    }
}
