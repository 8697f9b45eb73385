//! Transaction coordination module.
//!
//! This module provides the two-phase commit coordinator, including:
//! - Transaction status tracking (active, doomed, committed, commit failed)
//! - The commit protocol across participants with partial-failure cleanup
//! - Before/after-commit hooks
//! - The transaction manager that hands out transactions

pub mod coordinator;
pub mod error;
pub mod hooks;
pub mod id;
pub mod manager;
pub mod meta;
pub mod state;

pub use coordinator::Transaction;
pub use error::{Result, TransactionError};
pub use hooks::{AfterCommitHook, BeforeCommitHook};
pub use id::{TransactionId, TransactionIdGenerator};
pub use manager::{TransactionManager, TransactionOwner};
pub use meta::TransactionMeta;
pub use state::{ParticipantPhase, TransactionStatus};
