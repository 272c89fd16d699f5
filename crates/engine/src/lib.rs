//! NotiCat dispatch engine.
//!
//! Periodically fans fetch tasks out to executors, deduplicates and filters
//! the notices they list, and delivers the survivors by mail with graceful
//! degradation when detail pages or attachments are unavailable.

pub mod clock;
pub mod dedup;
pub mod delivery;
pub mod executor;
pub mod filter;
pub mod lock;
pub mod scheduler;
pub mod store;
