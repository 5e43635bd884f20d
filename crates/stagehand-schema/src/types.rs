//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

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
    /// Opaque identifier minted when a stage is created. Presented by later
    /// requests to resume operations on that stage.
    StageToken
);

string_newtype!(
    /// Identity (user, session, or process) that holds the exclusive right to
    /// mutate the one existing stage.
    OwnerId
);

string_newtype!(
    /// Stable identifier of the site whose code base is being staged.
    SiteId
);

const TOKEN_LEN: usize = 32;

static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(0);

impl StageToken {
    /// Mint a fresh token. Uniqueness comes from the wall clock, the process id,
    /// and a per-process counter, hashed together with the site and owner.
    pub fn generate(site: &SiteId, owner: &OwnerId) -> Self {
        let seq = TOKEN_COUNTER.fetch_add(1, Ordering::SeqCst);
        let now = chrono::Utc::now();
        let seed = format!(
            "{site}\0{owner}\0{}\0{}\0{seq}",
            now.timestamp_nanos_opt().unwrap_or_default(),
            std::process::id()
        );
        let hex = blake3::hash(seed.as_bytes()).to_hex();
        Self(hex[..TOKEN_LEN].to_owned())
    }

    /// Parse a token supplied by a caller. Tokens name directories, so only
    /// lowercase hex of the minted length is accepted.
    pub fn parse(input: &str) -> Result<Self, SchemaError> {
        let trimmed = input.trim();
        if trimmed.len() != TOKEN_LEN
            || !trimmed
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(SchemaError::InvalidToken(input.to_owned()));
        }
        Ok(Self(trimmed.to_owned()))
    }
}

impl SiteId {
    /// Short digest used to derive per-site directory names.
    pub fn digest(&self) -> String {
        blake3::hash(self.0.as_bytes()).to_hex()[..12].to_owned()
    }
}
