pub mod resource;
pub mod savepoint;
pub mod synchronizer;
pub mod transaction;
