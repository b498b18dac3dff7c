//! Composite cache key for prepared statements

use std::fmt;

/// Identifies one preparation: the same statement text prepared against a
/// different host or keyspace is a different entry.
///
/// Equality and hashing are field-wise, so two triples whose plain
/// concatenations happen to be equal (`"ab" + "c"` vs `"a" + "bc"`) stay
/// distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementKey {
    address: String,
    keyspace: String,
    statement: String,
}

impl StatementKey {
    /// Build a key from its three parts
    pub fn new(
        address: impl Into<String>,
        keyspace: impl Into<String>,
        statement: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            keyspace: keyspace.into(),
            statement: statement.into(),
        }
    }

    /// Server address the statement is prepared on
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Keyspace the statement is prepared in
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// Statement text
    pub fn statement(&self) -> &str {
        &self.statement
    }

    /// The three parts joined with no separator.
    ///
    /// This flat form is ambiguous across field boundaries and must not be
    /// used as an identity; it is only meant for display and logs.
    pub fn concatenated(&self) -> String {
        let mut out =
            String::with_capacity(self.address.len() + self.keyspace.len() + self.statement.len());
        out.push_str(&self.address);
        out.push_str(&self.keyspace);
        out.push_str(&self.statement);
        out
    }
}

impl fmt::Display for StatementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.address, self.keyspace, self.statement)
    }
}

/// Derive the cache key for a statement prepared on `address` in `keyspace`
pub fn derive_key(address: &str, keyspace: &str, statement: &str) -> StatementKey {
    StatementKey::new(address, keyspace, statement)
}
