//! Transaction metadata handed to participants.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::id::TransactionId;

/// Caller-facing description of a transaction.
///
/// Participants receive this on every protocol call. It has no effect on
/// the protocol itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMeta {
    pub id: TransactionId,
    pub user: String,
    pub description: String,
    pub extension: BTreeMap<String, String>,
}

impl TransactionMeta {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            user: String::new(),
            description: String::new(),
            extension: BTreeMap::new(),
        }
    }

    /// Appends a line to the description.
    pub fn note(&mut self, text: &str) {
        let text = text.trim();
        if self.description.is_empty() {
            self.description = text.to_string();
        } else {
            self.description.push('\n');
            self.description.push_str(text);
        }
    }

    /// Records the user as `"{path} {user_name}"`.
    pub fn set_user(&mut self, user_name: &str, path: &str) {
        self.user = format!("{} {}", path, user_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_joins_lines() {
        let mut meta = TransactionMeta::new(TransactionId::new(1));
        meta.note("  first  ");
        meta.note("second\n");
        assert_eq!(meta.description, "first\nsecond");
    }

    #[test]
    fn test_set_user() {
        let mut meta = TransactionMeta::new(TransactionId::new(1));
        meta.set_user("alice", "/");
        assert_eq!(meta.user, "/ alice");
        meta.set_user("bob", "/site");
        assert_eq!(meta.user, "/site bob");
    }

    #[test]
    fn test_meta_serializes() {
        let mut meta = TransactionMeta::new(TransactionId::new(4));
        meta.extension.insert("request".to_string(), "42".to_string());
        let json = serde_json::to_string(&meta).unwrap();
        let back: TransactionMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
