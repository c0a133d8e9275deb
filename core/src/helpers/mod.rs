/// Reserved SQL keywords that need quoting.
pub const RESERVED_KEYWORDS: &[&str] =
    &["group", "user", "order", "table", "index", "primary", "key"];

/// Quotes an identifier if it's a reserved keyword or contains characters
/// outside the plain `[a-z0-9_]` set. Column names here come from caller
/// JSON, not from a generated schema, so anything unusual gets quoted.
pub fn quote_identifier(name: &str) -> String {
    let plain = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if plain && !RESERVED_KEYWORDS.contains(&name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Formats a table name, handling schema.table format.
pub fn format_table_name(table_name: &str) -> String {
    if table_name.contains('.') {
        let parts: Vec<&str> = table_name.split('.').collect();
        if parts.len() == 2 {
            let schema = parts[0].trim_matches('"');
            let table = parts[1].trim_matches('"');
            format!("{}.{}", quote_identifier(schema), quote_identifier(table))
        } else {
            table_name.to_string()
        }
    } else {
        quote_identifier(table_name)
    }
}

/// Table names feed generated CTE names (`values_<t>`, `cte_<t>`, ...); a
/// dotted `schema.table` would otherwise need quoting in every reference.
pub fn table_ident(table_name: &str) -> String {
    table_name.replace('.', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("text"), "text");
        assert_eq!(quote_identifier("created_time"), "created_time");
        assert_eq!(quote_identifier("table"), "\"table\"");
        assert_eq!(quote_identifier("order"), "\"order\"");
        assert_eq!(quote_identifier("CamelCase"), "\"CamelCase\"");
        assert_eq!(quote_identifier("with space"), "\"with space\"");
        assert_eq!(quote_identifier("2fa"), "\"2fa\"");
        assert_eq!(quote_identifier("has\"quote"), "\"has\"\"quote\"");
    }

    #[test]
    fn test_format_table_name() {
        assert_eq!(format_table_name("accounts"), "accounts");
        assert_eq!(format_table_name("public.accounts"), "public.accounts");
        assert_eq!(format_table_name("public.order"), "public.\"order\"");
        assert_eq!(format_table_name("\"public\".\"accounts\""), "public.accounts");
    }

    #[test]
    fn test_table_ident() {
        assert_eq!(table_ident("accounts"), "accounts");
        assert_eq!(table_ident("public.accounts"), "public_accounts");
    }
}
