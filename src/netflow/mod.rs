//! Network flow extraction and reverse-DNS resolution
//!
//! Network-category log records carry free-form `resource`/`data` strings;
//! this module derives structured flow attributes from them by keyword
//! matching, caches the result per pid, and resolves remote IPs to domain
//! names in one permit-bounded concurrent batch at session end.

pub mod cache;
pub mod resolver;

pub use cache::{NetworkCache, NetworkEvent, NetworkReport};
pub use resolver::{DomainResolver, ReverseLookup, SystemLookup};
