//! Persistence layer: libSQL-backed Message Store.

pub mod messages;

pub use messages::MessageStore;
