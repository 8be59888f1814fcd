//! crates/school_sync_core/src/conversation.rs
//!
//! Derivation of the key both participants of a chat use to address it.

use std::fmt;

use crate::ports::{PortError, PortResult};

/// Identifies the conversation between two email addresses.
///
/// Both sides compute the same key without coordinating: the addresses are
/// normalized (trimmed, ASCII-lowercased), sorted, and joined with `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Derives the key for the pair `(a, b)`. The argument order does not matter.
    pub fn between(a: &str, b: &str) -> Self {
        let mut pair = [normalize_email(a), normalize_email(b)];
        pair.sort();
        ConversationKey(pair.join("_"))
    }

    /// Like [`ConversationKey::between`], but rejects blank addresses.
    pub fn try_between(a: &str, b: &str) -> PortResult<Self> {
        if normalize_email(a).is_empty() || normalize_email(b).is_empty() {
            return Err(PortError::Invalid(
                "both participants need an email address".to_string(),
            ));
        }
        Ok(Self::between(a, b))
    }

    /// Wraps a key read back from storage.
    pub fn from_stored(raw: impl Into<String>) -> Self {
        ConversationKey(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `email` is one of the two participants.
    pub fn involves(&self, email: &str) -> bool {
        let email = normalize_email(email);
        !email.is_empty()
            && (self.0.starts_with(&format!("{}_", email))
                || self.0.ends_with(&format!("_{}", email)))
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical form of an address used for keys and sender comparisons.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_commutative() {
        let pairs = [
            ("prof@ecole.ma", "parent@gmail.com"),
            ("a@x.com", "b@x.com"),
            ("same@x.com", "same@x.com"),
        ];
        for (a, b) in pairs {
            assert_eq!(ConversationKey::between(a, b), ConversationKey::between(b, a));
        }
    }

    #[test]
    fn test_key_sorts_and_joins() {
        let key = ConversationKey::between("zoe@x.com", "adam@x.com");
        assert_eq!(key.as_str(), "adam@x.com_zoe@x.com");
    }

    #[test]
    fn test_key_normalizes_case_and_whitespace() {
        let a = ConversationKey::between(" Prof@Ecole.ma ", "parent@gmail.com");
        let b = ConversationKey::between("parent@GMAIL.com", "prof@ecole.ma");
        assert_eq!(a, b);
    }

    #[test]
    fn test_try_between_rejects_blank_email() {
        let err = ConversationKey::try_between("   ", "parent@gmail.com").unwrap_err();
        assert!(matches!(err, PortError::Invalid(_)));
    }

    #[test]
    fn test_involves() {
        let key = ConversationKey::between("prof@ecole.ma", "parent@gmail.com");
        assert!(key.involves("PROF@ecole.ma"));
        assert!(!key.involves("other@ecole.ma"));

        let underscored = ConversationKey::between("jean_dupont@ecole.ma", "parent@gmail.com");
        assert!(underscored.involves("jean_dupont@ecole.ma"));
        assert!(!underscored.involves("dupont@ecole.ma"));
    }
}
