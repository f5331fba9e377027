//! Client identifiers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identity of a logical client.
///
/// A client either supplies its own id when subscribing or is assigned one
/// from the server's counter. The two forms are distinct identities: the
/// supplied name `"1"` and the assigned number `1` are different clients,
/// and presence lists both of them as `[1,"1"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientId {
    /// Server-assigned id.
    Assigned(u64),
    /// Id supplied by the client.
    Named(String),
}

impl ClientId {
    /// The id as a JSON value: a number for assigned ids, a string otherwise.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            ClientId::Assigned(n) => Value::from(*n),
            ClientId::Named(name) => Value::String(name.clone()),
        }
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientId::Assigned(n) => write!(f, "{n}"),
            ClientId::Named(name) => f.write_str(name),
        }
    }
}

impl From<u64> for ClientId {
    fn from(n: u64) -> Self {
        ClientId::Assigned(n)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        ClientId::Named(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        ClientId::Named(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_json() {
        assert_eq!(ClientId::from(7).to_json(), Value::from(7));
        assert_eq!(ClientId::from("u1").to_json(), Value::from("u1"));
    }

    #[test]
    fn test_named_and_assigned_are_distinct() {
        assert_ne!(ClientId::from("1"), ClientId::from(1));
        assert_eq!(ClientId::from("1").to_string(), ClientId::from(1).to_string());
    }

    #[test]
    fn test_assigned_sorts_before_named() {
        let mut ids = vec![ClientId::from("b"), ClientId::from(2), ClientId::from("a")];
        ids.sort();
        assert_eq!(
            ids,
            vec![ClientId::from(2), ClientId::from("a"), ClientId::from("b")]
        );
    }
}
