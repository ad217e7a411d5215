//! inbox-rules: mirror a mailbox into a local store and file it with
//! declarative rules.

pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod provider;
pub mod store;
