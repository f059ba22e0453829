//! Cache Keys Module
//!
//! Resource prefixes, default TTLs and deterministic key construction.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between the prefix and each parameter.
pub const KEY_DELIMITER: char = ':';

// == Cache Resource ==
/// Kind of scraped resource; fixes the key prefix and the default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheResource {
    Home,
    Anime,
    Episodes,
    Servers,
    Stream,
    Search,
    Genres,
    Schedule,
    Browse,
    Batch,
    Suggest,
}

impl CacheResource {
    pub const ALL: [CacheResource; 11] = [
        CacheResource::Home,
        CacheResource::Anime,
        CacheResource::Episodes,
        CacheResource::Servers,
        CacheResource::Stream,
        CacheResource::Search,
        CacheResource::Genres,
        CacheResource::Schedule,
        CacheResource::Browse,
        CacheResource::Batch,
        CacheResource::Suggest,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CacheResource::Home => "home",
            CacheResource::Anime => "anime",
            CacheResource::Episodes => "episodes",
            CacheResource::Servers => "servers",
            CacheResource::Stream => "stream",
            CacheResource::Search => "search",
            CacheResource::Genres => "genres",
            CacheResource::Schedule => "schedule",
            CacheResource::Browse => "browse",
            CacheResource::Batch => "batch",
            CacheResource::Suggest => "suggest",
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            CacheResource::Home => "otaku:home",
            CacheResource::Anime => "otaku:anime",
            CacheResource::Episodes => "otaku:episodes",
            CacheResource::Servers => "otaku:servers",
            CacheResource::Stream => "otaku:stream",
            CacheResource::Search => "otaku:search",
            CacheResource::Genres => "otaku:genres",
            CacheResource::Schedule => "otaku:schedule",
            CacheResource::Browse => "otaku:browse",
            CacheResource::Batch => "otaku:batch",
            CacheResource::Suggest => "otaku:suggest",
        }
    }

    /// Default lifetime in seconds, tuned to how often the page changes.
    pub fn default_ttl(&self) -> u64 {
        match self {
            CacheResource::Home => 300,
            CacheResource::Anime => 3600,
            CacheResource::Episodes => 1800,
            CacheResource::Servers => 900,
            // stream links expire upstream
            CacheResource::Stream => 300,
            CacheResource::Search => 600,
            CacheResource::Genres => 86400,
            CacheResource::Schedule => 3600,
            CacheResource::Browse => 1800,
            CacheResource::Batch => 3600,
            CacheResource::Suggest => 1800,
        }
    }

    /// Builds the key for this resource and `params`, in order.
    pub fn key<S: AsRef<str>>(&self, params: &[S]) -> CacheKey {
        CacheKey::new(self.prefix(), params)
    }

    /// Glob matching every key of this resource, for invalidation.
    pub fn pattern(&self) -> String {
        format!("{}*", self.prefix())
    }
}

impl fmt::Display for CacheResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// == Cache Key ==
/// `<prefix>` or `<prefix>:<p1>:<p2>...`.
///
/// `%`, `:` and `*` inside a parameter are percent-escaped so a parameter can
/// neither introduce a delimiter nor act as a wildcard during invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new<S: AsRef<str>>(prefix: &str, params: &[S]) -> Self {
        let mut key = prefix.to_string();
        for param in params {
            key.push(KEY_DELIMITER);
            push_escaped(&mut key, param.as_ref());
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn push_escaped(out: &mut String, param: &str) {
    for c in param.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '*' => out.push_str("%2A"),
            other => out.push(other),
        }
    }
}

// == Cache TTLs ==
/// Per-resource TTLs, defaulting to [`CacheResource::default_ttl`].
#[derive(Debug, Clone, Default)]
pub struct CacheTtls {
    overrides: HashMap<CacheResource, u64>,
}

impl CacheTtls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, resource: CacheResource, ttl_secs: u64) -> Self {
        self.overrides.insert(resource, ttl_secs);
        self
    }

    pub fn set(&mut self, resource: CacheResource, ttl_secs: u64) {
        self.overrides.insert(resource, ttl_secs);
    }

    pub fn get(&self, resource: CacheResource) -> u64 {
        self.overrides
            .get(&resource)
            .copied()
            .unwrap_or_else(|| resource.default_ttl())
    }
}
