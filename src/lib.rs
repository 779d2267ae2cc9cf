//! Scheduled, encrypted database backups.
//!
//! The scheduler keeps live cron timers converged with persisted backup
//! configurations; each fire runs a dump → archive → encrypt → cleanup
//! pipeline and books the outcome on an audit record. The HTTP layer,
//! authentication, and dashboard are external collaborators that call into
//! these modules.

pub mod backup;
pub mod config;
pub mod errors;
pub mod scheduler;
pub mod store;
