//! Domain types for the chat gateway
//!
//! This module defines strongly-typed domain values to prevent primitive obsession
//! and improve type safety throughout the codebase, following the same pattern
//! the rest of this crate uses for validated configuration and identifiers.

use nutype::nutype;
use serde::{Deserialize, Serialize};

/// Opaque, client-declared identifier for a chat client.
///
/// Client identity is self-declared (no authentication, per spec Non-goals):
/// any non-empty string the client sends at handshake is accepted.
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        AsRef,
        TryFrom,
        Into
    )
)]
pub struct ClientId(String);

/// IANA timezone name declared by a client, e.g. `"America/Chicago"`.
///
/// Validity against the IANA database is checked lazily at the point of use
/// (parsing with `chrono_tz`) rather than at construction, since the set of
/// valid names is large and fixed; constructing a `ClientTimezone` only
/// enforces that the string is non-empty.
#[nutype(
    validate(len_char_min = 1, len_char_max = 128),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        AsRef,
        TryFrom,
        Into
    )
)]
pub struct ClientTimezone(String);

impl ClientTimezone {
    /// The fallback timezone used when a client does not declare one.
    #[must_use]
    pub fn utc() -> Self {
        Self::try_new("UTC").expect("UTC is a valid timezone string")
    }

    /// Parses this timezone into a `chrono_tz::Tz`.
    ///
    /// # Errors
    ///
    /// Returns an error if the declared name is not a recognized IANA zone.
    pub fn parse(&self) -> Result<chrono_tz::Tz, String> {
        self.as_ref()
            .parse::<chrono_tz::Tz>()
            .map_err(|_| format!("unrecognized timezone: {}", self.as_ref()))
    }
}

/// Auto-assigned identifier for a persisted `Message` row. `SQLite`
/// `AUTOINCREMENT` row ids start at 1, so this rejects non-positive values.
#[nutype(
    validate(greater_or_equal = 1),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct MessageId(i64);

/// Auto-assigned identifier for a persisted `Reply` row.
#[nutype(
    validate(greater_or_equal = 1),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct ReplyId(i64);

/// Client-supplied filename for a media attachment, sanitized to its base
/// name so a malicious client cannot traverse outside the media directory.
#[nutype(
    sanitize(with = |raw: String| {
        std::path::Path::new(&raw)
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or(raw)
    }),
    validate(len_char_min = 1, len_char_max = 255),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRef, TryFrom, Into)
)]
pub struct Filename(String);

/// Upper bound on clients simultaneously mid-intake (spec constant: 50).
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 100_000),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, Default, TryFrom, Into),
    default = 50
)]
pub struct MaxSending(usize);

impl MaxSending {
    /// Returns the value as a plain `usize`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Upper bound on fleet-wide concurrent message processing (spec constant: 500).
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, Default, TryFrom, Into),
    default = 500
)]
pub struct MaxProcessing(usize);

impl MaxProcessing {
    /// Returns the value as a plain `usize`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Connection pool size for the `SQLite` connection pool.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1000),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, Default, TryFrom, Into),
    default = 10
)]
pub struct ConnectionPoolSize(usize);

impl ConnectionPoolSize {
    /// Returns the value as a plain `usize`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_rejects_empty() {
        assert!(ClientId::try_new(String::new()).is_err());
    }

    #[test]
    fn client_id_accepts_arbitrary_nonempty_string() {
        assert!(ClientId::try_new("device-42".to_string()).is_ok());
    }

    #[test]
    fn filename_sanitizes_path_traversal() {
        let name = Filename::try_new("../../etc/passwd".to_string()).unwrap();
        assert_eq!(name.as_ref(), "passwd");
    }

    #[test]
    fn timezone_parses_valid_iana_name() {
        let tz = ClientTimezone::try_new("America/Chicago".to_string()).unwrap();
        assert!(tz.parse().is_ok());
    }

    #[test]
    fn timezone_rejects_unrecognized_name() {
        let tz = ClientTimezone::try_new("Not/AZone".to_string()).unwrap();
        assert!(tz.parse().is_err());
    }

    #[test]
    fn max_sending_default_matches_spec_constant() {
        assert_eq!(MaxSending::default().as_usize(), 50);
    }

    #[test]
    fn max_processing_default_matches_spec_constant() {
        assert_eq!(MaxProcessing::default().as_usize(), 500);
    }
}
