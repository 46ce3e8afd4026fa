//! Identifier and literal quoting for generated DDL/DCL.
//!
//! Redshift does not accept bind parameters in DDL, so every statement the
//! provider issues is built as text. All user-supplied names go through
//! [`quote_ident`] and all string values through [`quote_literal`].

use crate::acl::Privilege;

/// Quote an identifier, doubling embedded double quotes.
///
/// ```
/// use redshift_provider::sql::quote_ident;
///
/// assert_eq!(quote_ident("analysts"), "\"analysts\"");
/// assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
/// ```
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal, doubling single quotes.
///
/// Values containing backslashes use the `E''` form with the backslashes
/// escaped, so they reach the server unchanged.
pub fn quote_literal(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    if escaped.contains('\\') {
        format!("E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{}'", escaped)
    }
}

/// Quote each identifier and join with `, `.
pub fn quote_ident_list<I, S>(idents: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    idents
        .into_iter()
        .map(|i| quote_ident(i.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render privileges for a GRANT/REVOKE statement, e.g. `SELECT, INSERT`.
pub fn format_privileges(privileges: &[Privilege]) -> String {
    privileges
        .iter()
        .map(|p| p.as_sql())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Qualify an object name with its schema.
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("public"), "\"public\"");
        assert_eq!(quote_ident("Mixed Case"), "\"Mixed Case\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_ident(""), "\"\"");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("secret"), "'secret'");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal("a\\b"), "E'a\\\\b'");
        assert_eq!(quote_literal("it's\\"), "E'it''s\\\\'");
    }

    #[test]
    fn test_quote_ident_list() {
        assert_eq!(quote_ident_list(["a", "b"]), "\"a\", \"b\"");
        assert_eq!(quote_ident_list(Vec::<String>::new()), "");
    }

    #[test]
    fn test_format_privileges() {
        assert_eq!(
            format_privileges(&[Privilege::Select, Privilege::Insert]),
            "SELECT, INSERT"
        );
        assert_eq!(format_privileges(&[Privilege::Temporary]), "TEMPORARY");
    }

    #[test]
    fn test_qualified() {
        assert_eq!(qualified("public", "events"), "\"public\".\"events\"");
    }
}
