//! Identifier quoting and deterministic object names
//!
//! Generated constraint and index names follow the
//! `<table>_<columns>_<digest><suffix>` convention used by common migration
//! frameworks, so names computed here match objects they already created.

/// PostgreSQL NAMEDATALEN - 1
pub const MAX_NAME_LENGTH: usize = 63;

pub const UNIQUE_SUFFIX: &str = "_uniq";
pub const PRIMARY_KEY_SUFFIX: &str = "_pk";
pub const CHECK_SUFFIX: &str = "_check";
pub const NOT_NULL_SUFFIX: &str = "_notnull";
pub const PATTERN_OPS_SUFFIX: &str = "_like";
pub const TOGETHER_INDEX_SUFFIX: &str = "_idx";

/// Quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded single quotes
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `"a", "b"`
pub fn quote_columns<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// First 8 hex digits of md5 over the concatenated parts
fn names_digest(parts: &[&str]) -> String {
    let mut context = md5::Context::new();
    for part in parts {
        context.consume(part.as_bytes());
    }
    let hex = format!("{:x}", context.compute());
    hex[..8].to_string()
}

fn truncate(value: &str, length: usize) -> String {
    value.chars().take(length).collect()
}

/// Deterministic name for an index or constraint on `columns` of `table`
pub fn object_name<S: AsRef<str>>(table: &str, columns: &[S], suffix: &str) -> String {
    let columns: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();
    let mut digest_parts = Vec::with_capacity(columns.len() + 1);
    digest_parts.push(table);
    digest_parts.extend(columns.iter().copied());

    let mut hash_suffix = format!("{}{}", names_digest(&digest_parts), suffix);
    let joined = columns.join("_");

    let name = format!("{}_{}_{}", table, joined, hash_suffix);
    if name.chars().count() <= MAX_NAME_LENGTH {
        return name;
    }

    if hash_suffix.chars().count() > MAX_NAME_LENGTH / 3 {
        hash_suffix = truncate(&hash_suffix, MAX_NAME_LENGTH / 3);
    }
    let other_length = (MAX_NAME_LENGTH - hash_suffix.chars().count()) / 2 - 1;
    let name = format!(
        "{}_{}_{}",
        truncate(table, other_length),
        truncate(&joined, other_length),
        hash_suffix
    );

    // Unquoted identifiers cannot start with an underscore or a digit
    match name.chars().next() {
        Some(first) if first == '_' || first.is_ascii_digit() => {
            let kept = name.chars().count() - 1;
            format!("D{}", truncate(&name, kept))
        }
        _ => name,
    }
}

/// Default name of a foreign key constraint
pub fn foreign_key_name<S: AsRef<str>>(
    table: &str,
    columns: &[S],
    to_table: &str,
    to_column: &str,
) -> String {
    object_name(table, columns, &format!("_fk_{}_{}", to_table, to_column))
}

/// Default name of a plain single-purpose index (no suffix)
pub fn index_name<S: AsRef<str>>(table: &str, columns: &[S]) -> String {
    object_name(table, columns, "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("field"), "\"field\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_columns(&["field1", "field2"]), "\"field1\", \"field2\"");
    }

    #[test]
    fn test_object_names_match_framework_convention() {
        assert_eq!(index_name("tests_model", &["field"]), "tests_model_field_0a53d95f");
        assert_eq!(
            object_name("tests_model", &["field"], PRIMARY_KEY_SUFFIX),
            "tests_model_field_0a53d95f_pk"
        );
        assert_eq!(
            object_name("tests_model", &["field"], NOT_NULL_SUFFIX),
            "tests_model_field_0a53d95f_notnull"
        );
        assert_eq!(
            object_name("tests_model", &["field1", "field2"], UNIQUE_SUFFIX),
            "tests_model_field1_field2_51878e08_uniq"
        );
        assert_eq!(
            foreign_key_name("tests_model", &["field_id"], "tests_model2", "id"),
            "tests_model_field_id_0166400c_fk_tests_model2_id"
        );
    }

    #[test]
    fn test_long_names_are_truncated() {
        let name = object_name(
            "a_really_long_table_name_for_order_history_entries",
            &["customer_reference_number"],
            PATTERN_OPS_SUFFIX,
        );
        assert_eq!(name, "a_really_long_table_name_customer_reference_numbe_27e43980_like");
        assert!(name.len() <= MAX_NAME_LENGTH);
    }

    #[test]
    fn test_truncated_names_never_start_with_digit() {
        let name = object_name(
            "2fa_tokens_with_a_long_name_that_needs_truncation",
            &["secret_value_column"],
            "",
        );
        assert_eq!(name, "D2fa_tokens_with_a_long_nam_secret_value_column_4385c94");
    }
}
