//! IMAP message flags
//!
//! Provides a strongly-typed enum for IMAP flags instead of raw
//! strings, plus the `FlagSet` collection used throughout the fetch
//! and store paths. Standard system flags have dedicated variants;
//! arbitrary keyword flags use the `Keyword` variant.

use std::collections::BTreeSet;
use std::fmt;

/// An IMAP message flag.
///
/// System flags (prefixed with `\` in the IMAP protocol) have
/// dedicated variants. Server-defined `\Name` flags that are not part
/// of RFC 3501 are preserved literally in [`Flag::Extension`];
/// user-defined keyword flags use [`Flag::Keyword`].
///
/// # Examples
///
/// ```
/// use imap_store::Flag;
///
/// let seen = Flag::Seen;
/// assert_eq!(seen.as_imap_str(), "\\Seen");
///
/// let kw = Flag::Keyword("$Important".to_string());
/// assert_eq!(kw.as_imap_str(), "$Important");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Flag {
    /// Message has been read (`\Seen`).
    Seen,
    /// Message has been answered (`\Answered`).
    Answered,
    /// Message is flagged for attention (`\Flagged`).
    Flagged,
    /// Message is marked for deletion (`\Deleted`).
    Deleted,
    /// Message is a draft (`\Draft`).
    Draft,
    /// Message arrived since the mailbox was last selected (`\Recent`).
    /// Session-only; servers reject attempts to store it.
    Recent,
    /// The mailbox permits arbitrary user keywords (`\*`). Only ever
    /// seen in PERMANENTFLAGS lists.
    UserFlagsAllowed,
    /// A server-defined system flag outside RFC 3501, kept with its
    /// leading backslash stripped (e.g. `Forwarded` for `\Forwarded`).
    Extension(String),
    /// A user-defined keyword flag (no `\` prefix).
    Keyword(String),
}

impl Flag {
    /// The IMAP wire representation of this flag.
    ///
    /// System flags include the leading backslash (e.g. `\Seen`).
    /// Keyword flags are returned as-is.
    #[must_use]
    pub fn as_imap_string(&self) -> String {
        match self {
            Self::Extension(name) => format!("\\{name}"),
            other => other.as_imap_str().to_string(),
        }
    }

    /// Like [`Flag::as_imap_string`] but borrowing where possible.
    /// Extension flags cannot be borrowed with their backslash, so
    /// this returns the bare name for them.
    #[must_use]
    pub fn as_imap_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
            Self::UserFlagsAllowed => "\\*",
            Self::Extension(name) => name,
            Self::Keyword(kw) => kw,
        }
    }

    /// Map a backslash-prefixed atom (without the backslash) to a flag.
    ///
    /// The RFC 3501 system flag names compare case-insensitively; any
    /// other name becomes an [`Flag::Extension`].
    #[must_use]
    pub fn from_system_name(name: &str) -> Self {
        if name == "*" {
            return Self::UserFlagsAllowed;
        }
        match name.to_ascii_lowercase().as_str() {
            "seen" => Self::Seen,
            "answered" => Self::Answered,
            "flagged" => Self::Flagged,
            "deleted" => Self::Deleted,
            "draft" => Self::Draft,
            "recent" => Self::Recent,
            _ => Self::Extension(name.to_string()),
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extension(name) => write!(f, "\\{name}"),
            other => f.write_str(other.as_imap_str()),
        }
    }
}

/// An ordered set of message flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet {
    flags: BTreeSet<Flag>,
}

impl FlagSet {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            flags: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn contains(&self, flag: &Flag) -> bool {
        self.flags.contains(flag)
    }

    pub fn insert(&mut self, flag: Flag) -> bool {
        self.flags.insert(flag)
    }

    pub fn remove(&mut self, flag: &Flag) -> bool {
        self.flags.remove(flag)
    }

    /// Add every flag of `other` to this set.
    pub fn union_with(&mut self, other: &Self) {
        for flag in &other.flags {
            self.flags.insert(flag.clone());
        }
    }

    /// Remove every flag of `other` from this set.
    pub fn remove_all(&mut self, other: &Self) {
        for flag in &other.flags {
            self.flags.remove(flag);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flag> {
        self.flags.iter()
    }
}

impl FromIterator<Flag> for FlagSet {
    fn from_iter<I: IntoIterator<Item = Flag>>(iter: I) -> Self {
        Self {
            flags: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        f.write_str("(")?;
        for flag in &self.flags {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{flag}")?;
            first = false;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_flags() {
        assert_eq!(Flag::Seen.as_imap_str(), "\\Seen");
        assert_eq!(Flag::Answered.as_imap_str(), "\\Answered");
        assert_eq!(Flag::Flagged.as_imap_str(), "\\Flagged");
        assert_eq!(Flag::Deleted.as_imap_str(), "\\Deleted");
        assert_eq!(Flag::Draft.as_imap_str(), "\\Draft");
        assert_eq!(Flag::Recent.as_imap_str(), "\\Recent");
    }

    #[test]
    fn keyword_flag() {
        let kw = Flag::Keyword("$Important".to_string());
        assert_eq!(kw.as_imap_str(), "$Important");
    }

    #[test]
    fn extension_flag_keeps_backslash_on_display() {
        let ext = Flag::from_system_name("Forwarded");
        assert_eq!(ext, Flag::Extension("Forwarded".to_string()));
        assert_eq!(format!("{ext}"), "\\Forwarded");
    }

    #[test]
    fn system_names_are_case_insensitive() {
        assert_eq!(Flag::from_system_name("SEEN"), Flag::Seen);
        assert_eq!(Flag::from_system_name("seen"), Flag::Seen);
        assert_eq!(Flag::from_system_name("*"), Flag::UserFlagsAllowed);
    }

    #[test]
    fn set_union_and_remove() {
        let mut set: FlagSet = [Flag::Seen, Flag::Draft].into_iter().collect();
        let other: FlagSet = [Flag::Draft, Flag::Deleted].into_iter().collect();
        set.union_with(&other);
        assert_eq!(set.len(), 3);
        set.remove_all(&other);
        assert_eq!(set.len(), 1);
        assert!(set.contains(&Flag::Seen));
    }

    #[test]
    fn display_is_parenthesized_list() {
        let set: FlagSet = [Flag::Seen, Flag::Keyword("$Junk".into())]
            .into_iter()
            .collect();
        assert_eq!(format!("{set}"), "(\\Seen $Junk)");
    }
}
