//! Branded ID newtypes.
//!
//! [`ConnectionId`] identifies one physical connection (fresh UUID v7 per
//! accept); [`ClientKey`] identifies the logical client that owns a registry
//! slot, usually the authenticated principal id.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    // Server-minted: random constructor and `Default`
    (generated $(#[$meta:meta])* $name:ident) => {
        branded_id!($(#[$meta])* $name);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
    // Caller-supplied: only built from an existing value
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id!(
    generated
    /// Identifier of one accepted connection.
    ConnectionId
);

branded_id!(
    /// Logical client identity owning at most one live connection.
    ///
    /// Always derived from the caller (typically the authenticated subject),
    /// never generated.
    ClientKey
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::marker::PhantomData;

    // Inherent const wins when `T: Default`, otherwise the blanket trait's
    trait NoDefault {
        const HAS_DEFAULT: bool = false;
    }
    impl<T> NoDefault for T {}
    struct DefaultCheck<T>(PhantomData<T>);
    #[allow(dead_code)]
    impl<T: Default> DefaultCheck<T> {
        const HAS_DEFAULT: bool = true;
    }

    #[test]
    fn connection_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn only_connection_ids_are_generated() {
        assert!(DefaultCheck::<ConnectionId>::HAS_DEFAULT);
        assert!(!DefaultCheck::<ClientKey>::HAS_DEFAULT);
    }

    #[test]
    fn client_key_from_str() {
        let key = ClientKey::from("user-42");
        assert_eq!(key.as_str(), "user-42");
        assert_eq!(key.to_string(), "user-42");
        assert_eq!(String::from(key), "user-42");
    }

    #[test]
    fn client_key_lookup_by_str() {
        let mut table = HashMap::new();
        let _ = table.insert(ClientKey::from("k"), 1);
        assert_eq!(table.get("k"), Some(&1));
    }

    #[test]
    fn serde_is_transparent() {
        let key = ClientKey::from("abc");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"abc\"");
        let back: ClientKey = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(back, key);
    }
}
