//! Background Tasks Module
//!
//! Contains background tasks that run periodically while the scrape core is up.
//!
//! # Tasks
//! - Cache sweep: Removes expired entries from the in-process store

mod sweep;

pub use sweep::spawn_sweep_task;
