//! Transaction participants.
//!
//! This module defines what the coordinator expects from the resources it
//! commits:
//! - **ResourceManager**: the two-phase commit contract
//! - **MultiObjectResourceAdapter**: one participant for many objects that share a manager
//! - **LegacyAdapter**: lifts single-phase `prepare`/`commit`/`abort` managers
//! - **MemoryStore**: an in-memory key/value participant

pub mod adapter;
pub mod legacy;
pub mod manager;
pub mod memory;

pub use adapter::MultiObjectResourceAdapter;
pub use legacy::LegacyAdapter;
pub use manager::{
    shared, Capability, LegacyDataManager, ObjectManager, Persistent, ResourceManager,
    ResourceSavepoint, SharedLegacyManager, SharedObject, SharedObjectManager, SharedResource,
};
pub use memory::{Call, MemoryStore};
