//! Strongly-typed chat and user identifiers.
//!
//! WhatsApp addresses are suffix-tagged JIDs: groups end in `@g.us`,
//! individual accounts in `@s.whatsapp.net`. Wrapping them prevents
//! accidental mixups between the two, and `Arc<str>` internals make
//! cloning an atomic increment instead of a heap allocation.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// JID suffix identifying a group chat.
pub const GROUP_SUFFIX: &str = "@g.us";

/// JID suffix identifying an individual account (private chat peer).
pub const USER_SUFFIX: &str = "@s.whatsapp.net";

macro_rules! id_type {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Create a new identifier from any string-like value.
            pub fn new(id: impl Into<Arc<str>>) -> Self {
                Self(id.into())
            }

            /// Borrow as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.as_str() == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.as_str() == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok($name::new(s))
            }
        }
    };
}

id_type!(
    ChatId,
    "An addressable conversation: a group (`*@g.us`) or a private chat."
);
id_type!(UserId, "An individual account JID (`*@s.whatsapp.net`).");

impl ChatId {
    /// Whether this chat is a WhatsApp group.
    pub fn is_group(&self) -> bool {
        self.0.ends_with(GROUP_SUFFIX)
    }

    /// Whether this chat is a private (one-to-one) conversation.
    pub fn is_private(&self) -> bool {
        !self.is_group()
    }
}

impl UserId {
    /// Whether the identifier carries the individual-account suffix.
    pub fn is_valid(&self) -> bool {
        self.0.ends_with(USER_SUFFIX)
    }
}
