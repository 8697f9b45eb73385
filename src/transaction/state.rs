//! Transaction and participant state tracking.

use serde::{Deserialize, Serialize};

/// The status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Initial state; accepts joins, savepoints, commit and abort.
    Active,
    /// Held only while `commit()` runs the two-phase protocol.
    Committing,
    /// All participants finished successfully.
    Committed,
    /// Marked by `doom()`; commit is refused but abort still works.
    Doomed,
    /// A commit or savepoint operation failed. Further work is refused.
    CommitFailed,
}

impl TransactionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_doomed(&self) -> bool {
        matches!(self, Self::Doomed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::CommitFailed)
    }

    /// Returns true if resources may still join.
    pub fn accepts_work(&self) -> bool {
        matches!(self, Self::Active | Self::Doomed)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Committing => write!(f, "Committing"),
            Self::Committed => write!(f, "Committed"),
            Self::Doomed => write!(f, "Doomed"),
            Self::CommitFailed => write!(f, "Commit failed"),
        }
    }
}

/// How far one participant got through the two-phase protocol.
///
/// Phases only move forward, and cleanup after a failure is decided from
/// the recorded phase alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParticipantPhase {
    NotStarted,
    Begun,
    Committed,
    Voted,
    Finished,
}

impl ParticipantPhase {
    /// Participants that began but never voted must discard staged changes.
    pub fn needs_abort(&self) -> bool {
        matches!(self, Self::Begun | Self::Committed)
    }

    /// Every participant that reached `tpc_begin` is told the commit is over.
    pub fn needs_tpc_abort(&self) -> bool {
        matches!(self, Self::Begun | Self::Committed | Self::Voted)
    }
}
