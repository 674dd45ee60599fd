//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings so the manifest stays
//! readable by tools that know nothing about them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Directory prefix every image entry inside a container must live under.
pub const IMAGES_DIR: &str = "images/";

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
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

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
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
    };
}

string_newtype!(
    /// Lowercase hex SHA-384 digest of the compressed bytes of an image entry.
    Sha384Hash
);

string_newtype!(
    /// Path of an entry inside the container archive, e.g. `images/root.raw.zst`.
    ImagePath
);

impl ImagePath {
    /// Whether the path lives under [`IMAGES_DIR`] and names a file inside it.
    pub fn is_under_images_dir(&self) -> bool {
        self.0
            .strip_prefix(IMAGES_DIR)
            .is_some_and(|rest| !rest.is_empty() && !rest.split('/').any(|c| c == ".."))
    }
}

impl Sha384Hash {
    /// Hex-encode a raw 48-byte digest.
    pub fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }
}
