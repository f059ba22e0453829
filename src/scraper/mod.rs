//! Scraper Module
//!
//! Outbound HTTP to the source site.

mod client;
mod headers;

pub use client::{classify_status, ScraperClient, ScraperSettings};
pub use headers::{jitter, random_referer, random_user_agent, REFERERS, USER_AGENTS};
