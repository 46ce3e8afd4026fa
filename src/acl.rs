//! Privileges, grantees and ACL parsing.
//!
//! Redshift keeps object privileges in Postgres-style `aclitem` arrays
//! (`relacl`, `nspacl`, `datacl`, `proacl`, `lanacl`, `defaclacl`). Each item
//! reads `grantee=privs/grantor`, where `grantee` is a user name,
//! `group <name>`, or empty for PUBLIC, and `privs` is a string of one-letter
//! privilege codes.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::ProviderError;
use crate::sql::quote_ident;

/// A grantable privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Privilege {
    /// `SELECT` (`r`)
    Select,
    /// `INSERT` (`a`)
    Insert,
    /// `UPDATE` (`w`)
    Update,
    /// `DELETE` (`d`)
    Delete,
    /// `DROP` (`D`)
    Drop,
    /// `REFERENCES` (`x`)
    References,
    /// `RULE` (`R`)
    Rule,
    /// `TRIGGER` (`t`)
    Trigger,
    /// `ALTER` (`A`)
    Alter,
    /// `TRUNCATE` (`P`)
    Truncate,
    /// `USAGE` (`U`)
    Usage,
    /// `CREATE` (`C`)
    Create,
    /// `TEMPORARY` (`T`)
    Temporary,
    /// `EXECUTE` (`X`)
    Execute,
}

impl Privilege {
    /// Keyword used in GRANT/REVOKE.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Drop => "DROP",
            Self::References => "REFERENCES",
            Self::Rule => "RULE",
            Self::Trigger => "TRIGGER",
            Self::Alter => "ALTER",
            Self::Truncate => "TRUNCATE",
            Self::Usage => "USAGE",
            Self::Create => "CREATE",
            Self::Temporary => "TEMPORARY",
            Self::Execute => "EXECUTE",
        }
    }

    /// Lower-case name used in resource state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Drop => "drop",
            Self::References => "references",
            Self::Rule => "rule",
            Self::Trigger => "trigger",
            Self::Alter => "alter",
            Self::Truncate => "truncate",
            Self::Usage => "usage",
            Self::Create => "create",
            Self::Temporary => "temporary",
            Self::Execute => "execute",
        }
    }

    /// Parse a privilege name, case-insensitively. `temp` is accepted for `temporary`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "select" => Some(Self::Select),
            "insert" => Some(Self::Insert),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "drop" => Some(Self::Drop),
            "references" => Some(Self::References),
            "rule" => Some(Self::Rule),
            "trigger" => Some(Self::Trigger),
            "alter" => Some(Self::Alter),
            "truncate" => Some(Self::Truncate),
            "usage" => Some(Self::Usage),
            "create" => Some(Self::Create),
            "temporary" | "temp" => Some(Self::Temporary),
            "execute" => Some(Self::Execute),
            _ => None,
        }
    }

    /// The code letter in an `aclitem`.
    pub fn acl_char(&self) -> char {
        match self {
            Self::Select => 'r',
            Self::Insert => 'a',
            Self::Update => 'w',
            Self::Delete => 'd',
            Self::Drop => 'D',
            Self::References => 'x',
            Self::Rule => 'R',
            Self::Trigger => 't',
            Self::Alter => 'A',
            Self::Truncate => 'P',
            Self::Usage => 'U',
            Self::Create => 'C',
            Self::Temporary => 'T',
            Self::Execute => 'X',
        }
    }

    /// Decode an `aclitem` code letter.
    pub fn from_acl_char(c: char) -> Option<Self> {
        match c {
            'r' => Some(Self::Select),
            'a' => Some(Self::Insert),
            'w' => Some(Self::Update),
            'd' => Some(Self::Delete),
            'D' => Some(Self::Drop),
            'x' => Some(Self::References),
            'R' => Some(Self::Rule),
            't' => Some(Self::Trigger),
            'A' => Some(Self::Alter),
            'P' => Some(Self::Truncate),
            'U' => Some(Self::Usage),
            'C' => Some(Self::Create),
            'T' => Some(Self::Temporary),
            'X' => Some(Self::Execute),
            _ => None,
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kinds of object privileges can be granted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// A database.
    Database,
    /// A schema.
    Schema,
    /// Tables and views in a schema.
    Table,
    /// User-defined functions in a schema.
    Function,
    /// Stored procedures in a schema.
    Procedure,
    /// A procedural language.
    Language,
}

const DATABASE_PRIVILEGES: &[Privilege] =
    &[Privilege::Create, Privilege::Temporary, Privilege::Alter];
const SCHEMA_PRIVILEGES: &[Privilege] = &[Privilege::Create, Privilege::Usage, Privilege::Alter];
const TABLE_PRIVILEGES: &[Privilege] = &[
    Privilege::Select,
    Privilege::Insert,
    Privilege::Update,
    Privilege::Delete,
    Privilege::Drop,
    Privilege::References,
    Privilege::Rule,
    Privilege::Trigger,
    Privilege::Alter,
    Privilege::Truncate,
];
const ROUTINE_PRIVILEGES: &[Privilege] = &[Privilege::Execute];
const LANGUAGE_PRIVILEGES: &[Privilege] = &[Privilege::Usage];

impl ObjectType {
    /// Every object type, in the order they are documented.
    pub const ALL: [ObjectType; 6] = [
        Self::Database,
        Self::Schema,
        Self::Table,
        Self::Function,
        Self::Procedure,
        Self::Language,
    ];

    /// Keyword used in GRANT/REVOKE.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Database => "DATABASE",
            Self::Schema => "SCHEMA",
            Self::Table => "TABLE",
            Self::Function => "FUNCTION",
            Self::Procedure => "PROCEDURE",
            Self::Language => "LANGUAGE",
        }
    }

    /// Lower-case name used in resource state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Schema => "schema",
            Self::Table => "table",
            Self::Function => "function",
            Self::Procedure => "procedure",
            Self::Language => "language",
        }
    }

    /// Parse an object type name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "database" => Some(Self::Database),
            "schema" => Some(Self::Schema),
            "table" => Some(Self::Table),
            "function" => Some(Self::Function),
            "procedure" => Some(Self::Procedure),
            "language" => Some(Self::Language),
            _ => None,
        }
    }

    /// Privileges that can be granted on this object type.
    pub fn allowed_privileges(&self) -> &'static [Privilege] {
        match self {
            Self::Database => DATABASE_PRIVILEGES,
            Self::Schema => SCHEMA_PRIVILEGES,
            Self::Table => TABLE_PRIVILEGES,
            Self::Function | Self::Procedure => ROUTINE_PRIVILEGES,
            Self::Language => LANGUAGE_PRIVILEGES,
        }
    }

    /// Whether a grant on this type names a schema.
    pub fn requires_schema(&self) -> bool {
        !matches!(self, Self::Database | Self::Language)
    }

    /// Plural keyword used in `GRANT … ON ALL <TYPES> IN SCHEMA` and in
    /// `ALTER DEFAULT PRIVILEGES`.
    pub fn as_sql_plural(&self) -> Option<&'static str> {
        match self {
            Self::Table => Some("TABLES"),
            Self::Function => Some("FUNCTIONS"),
            Self::Procedure => Some("PROCEDURES"),
            _ => None,
        }
    }

    /// `pg_default_acl.defaclobjtype` code for types that support default privileges.
    pub fn default_acl_code(&self) -> Option<char> {
        match self {
            Self::Table => Some('r'),
            Self::Function => Some('f'),
            Self::Procedure => Some('p'),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The receiver of a privilege.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Grantee {
    /// A database user.
    User(String),
    /// A user group.
    Group(String),
    /// A role.
    Role(String),
    /// Every user.
    Public,
}

impl Grantee {
    /// Build a grantee from the mutually exclusive `user`/`group`/`role`
    /// attributes. A group named `public` is PUBLIC.
    pub fn from_attributes(
        user: Option<&str>,
        group: Option<&str>,
        role: Option<&str>,
    ) -> Result<Self, ProviderError> {
        let set = |v: Option<&str>| v.filter(|s| !s.is_empty()).map(str::to_string);
        match (set(user), set(group), set(role)) {
            (Some(user), None, None) => Ok(Self::User(user)),
            (None, Some(group), None) if group.eq_ignore_ascii_case("public") => Ok(Self::Public),
            (None, Some(group), None) => Ok(Self::Group(group)),
            (None, None, Some(role)) => Ok(Self::Role(role)),
            _ => Err(ProviderError::Validation(
                "exactly one of `user`, `group` or `role` must be set".to_string(),
            )),
        }
    }

    /// The grantee as written after `TO`/`FROM`.
    pub fn to_sql(&self) -> String {
        match self {
            Self::User(name) => quote_ident(name),
            Self::Group(name) => format!("GROUP {}", quote_ident(name)),
            Self::Role(name) => format!("ROLE {}", quote_ident(name)),
            Self::Public => "PUBLIC".to_string(),
        }
    }

    /// The grantee as it appears on the left of `=` in an `aclitem`, unquoted.
    pub fn acl_key(&self) -> String {
        match self {
            Self::User(name) => name.clone(),
            Self::Group(name) => format!("group {}", name),
            Self::Role(name) => format!("role {}", name),
            Self::Public => String::new(),
        }
    }

    /// `user`, `group` or `role`; PUBLIC reports as `group`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Group(_) | Self::Public => "group",
            Self::Role(_) => "role",
        }
    }

    /// The grantee's name; `public` for PUBLIC.
    pub fn name(&self) -> &str {
        match self {
            Self::User(name) | Self::Group(name) | Self::Role(name) => name,
            Self::Public => "public",
        }
    }
}

/// One entry of an ACL array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclItem {
    /// Who holds the privileges.
    pub grantee: Grantee,
    /// Privileges held; grant-option markers are dropped.
    pub privileges: BTreeSet<Privilege>,
    /// Who granted them.
    pub grantor: String,
}

/// Parse a serialized ACL.
///
/// Accepts the array literal form (`{alice=arw/admin,"group g=r/admin"}`) and
/// the `|`-joined form produced by `array_to_string(acl, '|')`. Items that do
/// not parse are skipped.
pub fn parse_acl(text: &str) -> Vec<AclItem> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let elements: Vec<String> = match text.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
        Some(inner) => split_outside_quotes(inner, ',', true)
            .into_iter()
            .map(|e| unquote_array_element(&e))
            .collect(),
        None => split_outside_quotes(text, '|', false),
    };

    elements
        .iter()
        .filter_map(|element| parse_acl_item(element.trim()))
        .collect()
}

/// Privileges `grantee` holds according to `items`, restricted to those valid
/// for `object_type`.
pub fn privileges_for(
    items: &[AclItem],
    grantee: &Grantee,
    object_type: ObjectType,
) -> BTreeSet<Privilege> {
    let allowed = object_type.allowed_privileges();
    items
        .iter()
        .filter(|item| &item.grantee == grantee)
        .flat_map(|item| item.privileges.iter().copied())
        .filter(|p| allowed.contains(p))
        .collect()
}

/// Check privilege names against `object_type`. `all` expands to every
/// privilege the type allows.
pub fn validate_privileges<S: AsRef<str>>(
    object_type: ObjectType,
    names: &[S],
) -> Result<BTreeSet<Privilege>, ProviderError> {
    let allowed = object_type.allowed_privileges();
    let mut privileges = BTreeSet::new();
    for name in names {
        let name = name.as_ref();
        if name.trim().eq_ignore_ascii_case("all") {
            privileges.extend(allowed.iter().copied());
            continue;
        }
        match Privilege::parse(name) {
            Some(p) if allowed.contains(&p) => {
                privileges.insert(p);
            },
            _ => {
                return Err(ProviderError::Validation(format!(
                    "invalid privilege `{}` for object type {}; expected one of: {}",
                    name,
                    object_type,
                    allowed.iter().map(Privilege::name).collect::<Vec<_>>().join(", ")
                )));
            },
        }
    }
    Ok(privileges)
}

/// The configured privilege names if they describe exactly `actual`,
/// otherwise the canonical names of `actual`. Keeps `all` and `temp` stable
/// across reads.
pub fn reconcile_privileges(
    object_type: ObjectType,
    configured: &BTreeSet<String>,
    actual: &BTreeSet<Privilege>,
) -> BTreeSet<String> {
    let names: Vec<&String> = configured.iter().collect();
    match validate_privileges(object_type, &names) {
        Ok(expected) if &expected == actual => configured.clone(),
        _ => actual.iter().map(|p| p.name().to_string()).collect(),
    }
}

/// Privileges held on every one of `sets`; `None` when there are no sets.
pub fn common_privileges<'a, I>(sets: I) -> Option<BTreeSet<Privilege>>
where
    I: IntoIterator<Item = &'a BTreeSet<Privilege>>,
{
    sets.into_iter().fold(None, |acc, set| match acc {
        None => Some(set.clone()),
        Some(acc) => Some(acc.intersection(set).copied().collect()),
    })
}

fn parse_acl_item(item: &str) -> Option<AclItem> {
    let eq = find_outside_quotes(item, '=')?;
    let (raw_grantee, rest) = (&item[..eq], &item[eq + 1..]);
    let (privs, grantor) = match rest.find('/') {
        Some(slash) => (&rest[..slash], unquote_name(&rest[slash + 1..])),
        None => (rest, String::new()),
    };

    let grantee = if raw_grantee.is_empty() {
        Grantee::Public
    } else if let Some(name) = raw_grantee.strip_prefix("group ") {
        Grantee::Group(unquote_name(name))
    } else if let Some(name) = raw_grantee.strip_prefix("role ") {
        Grantee::Role(unquote_name(name))
    } else {
        Grantee::User(unquote_name(raw_grantee))
    };

    let privileges = privs.chars().filter_map(Privilege::from_acl_char).collect();
    Some(AclItem {
        grantee,
        privileges,
        grantor,
    })
}

/// Split on `sep` outside double quotes. With `escapes`, a backslash protects
/// the next character.
fn split_outside_quotes(text: &str, sep: char, escapes: bool) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' if escapes => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            },
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            },
            c if c == sep && !in_quotes => parts.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn find_outside_quotes(text: &str, target: char) -> Option<usize> {
    let mut in_quotes = false;
    for (i, c) in text.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c == target && !in_quotes => return Some(i),
            _ => {},
        }
    }
    None
}

/// Remove array-literal quoting: `"group g=r/o"` becomes `group g=r/o`.
fn unquote_array_element(element: &str) -> String {
    let element = element.trim();
    let Some(inner) = element
        .strip_prefix('"')
        .and_then(|e| e.strip_suffix('"'))
    else {
        return element.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Remove `aclitem` name quoting: `"a""b"` becomes `a"b`.
fn unquote_name(name: &str) -> String {
    match name.strip_prefix('"').and_then(|n| n.strip_suffix('"')) {
        Some(inner) => inner.replace("\"\"", "\""),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(privileges: &[Privilege]) -> BTreeSet<Privilege> {
        privileges.iter().copied().collect()
    }

    #[test]
    fn test_privilege_codes_round_trip() {
        for c in "rawdDxRtAPUCTX".chars() {
            let p = Privilege::from_acl_char(c).unwrap();
            assert_eq!(p.acl_char(), c);
        }
        assert_eq!(Privilege::from_acl_char('*'), None);
    }

    #[test]
    fn test_privilege_parse() {
        assert_eq!(Privilege::parse("SELECT"), Some(Privilege::Select));
        assert_eq!(Privilege::parse("temp"), Some(Privilege::Temporary));
        assert_eq!(Privilege::parse("all"), None);
    }

    #[test]
    fn test_parse_array_form() {
        let items = parse_acl(r#"{rdsdb=arwdRxtDAP/rdsdb,alice=r/rdsdb,"group analysts=arw/rdsdb",=r/rdsdb}"#);
        assert_eq!(items.len(), 4);

        assert_eq!(items[0].grantee, Grantee::User("rdsdb".into()));
        assert_eq!(items[0].privileges.len(), 10);

        assert_eq!(items[1].grantee, Grantee::User("alice".into()));
        assert_eq!(items[1].privileges, set(&[Privilege::Select]));
        assert_eq!(items[1].grantor, "rdsdb");

        assert_eq!(items[2].grantee, Grantee::Group("analysts".into()));
        assert_eq!(
            items[2].privileges,
            set(&[Privilege::Select, Privilege::Insert, Privilege::Update])
        );

        assert_eq!(items[3].grantee, Grantee::Public);
    }

    #[test]
    fn test_parse_pipe_joined_form() {
        let items = parse_acl("bob=UC/admin|group etl=U/admin|=U/admin");
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].grantee, Grantee::User("bob".into()));
        assert_eq!(items[0].privileges, set(&[Privilege::Usage, Privilege::Create]));
        assert_eq!(items[1].grantee, Grantee::Group("etl".into()));
        assert_eq!(items[2].grantee, Grantee::Public);
    }

    #[test]
    fn test_parse_quoted_names() {
        let items = parse_acl(r#"{"\"my user\"=r/rdsdb","group \"odd\"\"g\"=w/rdsdb"}"#);
        assert_eq!(items[0].grantee, Grantee::User("my user".into()));
        assert_eq!(items[1].grantee, Grantee::Group("odd\"g".into()));

        let items = parse_acl(r#""x|y"=r/rdsdb|z=a/rdsdb"#);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].grantee, Grantee::User("x|y".into()));
    }

    #[test]
    fn test_parse_skips_grant_option_markers() {
        let items = parse_acl("{alice=r*a*/rdsdb}");
        assert_eq!(items[0].privileges, set(&[Privilege::Select, Privilege::Insert]));
    }

    #[test]
    fn test_parse_empty_and_garbage() {
        assert!(parse_acl("").is_empty());
        assert!(parse_acl("{}").is_empty());
        assert!(parse_acl("{no-equals-sign}").is_empty());
    }

    #[test]
    fn test_privileges_for_filters_by_grantee_and_type() {
        let items = parse_acl("{alice=rU/rdsdb,alice=a/bob,bob=r/rdsdb}");
        let alice = Grantee::User("alice".into());

        assert_eq!(
            privileges_for(&items, &alice, ObjectType::Table),
            set(&[Privilege::Select, Privilege::Insert])
        );
        assert_eq!(
            privileges_for(&items, &alice, ObjectType::Schema),
            set(&[Privilege::Usage])
        );
        assert!(privileges_for(&items, &Grantee::Public, ObjectType::Table).is_empty());
    }

    #[test]
    fn test_validate_privileges() {
        let privileges = validate_privileges(ObjectType::Database, &["ALL"]).unwrap();
        assert_eq!(
            privileges,
            set(&[Privilege::Create, Privilege::Temporary, Privilege::Alter])
        );

        let privileges = validate_privileges(ObjectType::Table, &["select", "Select"]).unwrap();
        assert_eq!(privileges, set(&[Privilege::Select]));

        let err = validate_privileges(ObjectType::Schema, &["select"]).unwrap_err();
        assert!(err.to_string().contains("select"));
    }

    #[test]
    fn test_grantee_sql_and_keys() {
        assert_eq!(Grantee::User("a".into()).to_sql(), "\"a\"");
        assert_eq!(Grantee::Group("g".into()).to_sql(), "GROUP \"g\"");
        assert_eq!(Grantee::Role("r".into()).to_sql(), "ROLE \"r\"");
        assert_eq!(Grantee::Public.to_sql(), "PUBLIC");

        assert_eq!(Grantee::Group("g".into()).acl_key(), "group g");
        assert_eq!(Grantee::Public.acl_key(), "");
    }

    #[test]
    fn test_grantee_from_attributes() {
        assert_eq!(
            Grantee::from_attributes(None, Some("PUBLIC"), None).unwrap(),
            Grantee::Public
        );
        assert_eq!(
            Grantee::from_attributes(Some("alice"), Some(""), None).unwrap(),
            Grantee::User("alice".into())
        );
        assert!(Grantee::from_attributes(Some("a"), Some("g"), None).is_err());
        assert!(Grantee::from_attributes(None, None, None).is_err());
    }

    #[test]
    fn test_object_type_helpers() {
        assert!(!ObjectType::Database.requires_schema());
        assert!(ObjectType::Schema.requires_schema());
        assert_eq!(ObjectType::Function.as_sql_plural(), Some("FUNCTIONS"));
        assert_eq!(ObjectType::Procedure.default_acl_code(), Some('p'));
        assert_eq!(ObjectType::parse("TABLE"), Some(ObjectType::Table));
    }

    #[test]
    fn test_reconcile_privileges() {
        let configured: BTreeSet<String> = ["ALL".to_string()].into();
        let all: BTreeSet<Privilege> = ObjectType::Schema.allowed_privileges().iter().copied().collect();
        assert_eq!(
            reconcile_privileges(ObjectType::Schema, &configured, &all),
            configured
        );

        let usage: BTreeSet<Privilege> = [Privilege::Usage].into();
        let expected: BTreeSet<String> = ["usage".to_string()].into();
        assert_eq!(
            reconcile_privileges(ObjectType::Schema, &configured, &usage),
            expected
        );

        let temp: BTreeSet<String> = ["temp".to_string()].into();
        assert_eq!(
            reconcile_privileges(ObjectType::Database, &temp, &[Privilege::Temporary].into()),
            temp
        );
    }

    #[test]
    fn test_common_privileges() {
        let a: BTreeSet<Privilege> = [Privilege::Select, Privilege::Insert].into();
        let b: BTreeSet<Privilege> = [Privilege::Select].into();
        assert_eq!(common_privileges([&a, &b]), Some(b.clone()));
        assert_eq!(common_privileges([&a]), Some(a.clone()));
        assert_eq!(common_privileges(std::iter::empty()), None);
    }
}
