//! Per-module caching policy.
//!
//! The first segment of a storage key names the module the data belongs to
//! (a recommendations feed, a rules document, ...). Each module carries a
//! TTL and an enabled flag; modules marked disabled hold real-time data
//! classes that must never be served stale.

use std::collections::HashMap;
use std::time::Duration;

use super::keys::CachePrefix;

/// Default TTL applied to modules without an explicit policy entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Caching policy for one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModulePolicy {
    pub ttl: Duration,
    pub enabled: bool,
}

impl ModulePolicy {
    /// The "standard" policy used when a module has no explicit entry.
    pub fn standard() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            enabled: true,
        }
    }
}

impl Default for ModulePolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Immutable module → policy table, loaded once at process start.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    modules: HashMap<String, ModulePolicy>,
    fallback: ModulePolicy,
}

impl PolicyTable {
    pub fn new(modules: HashMap<String, ModulePolicy>) -> Self {
        Self::with_fallback(modules, ModulePolicy::standard())
    }

    /// Build a table with an explicit fallback policy for unconfigured
    /// modules.
    pub fn with_fallback(modules: HashMap<String, ModulePolicy>, fallback: ModulePolicy) -> Self {
        Self { modules, fallback }
    }

    pub fn fallback(&self) -> ModulePolicy {
        self.fallback
    }

    /// Resolve the policy governing a cache prefix.
    pub fn resolve(&self, prefix: &CachePrefix) -> ModulePolicy {
        self.resolve_module(prefix.module())
    }

    /// Resolve the policy for a bare module name, falling back to the
    /// standard policy for unknown modules.
    pub fn resolve_module(&self, module: &str) -> ModulePolicy {
        self.modules.get(module).copied().unwrap_or(self.fallback)
    }
}
