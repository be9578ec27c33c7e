pub mod config;

pub use config::{ConfigError, InsightConfig};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError, RwLock, Weak};
use tracing::debug;

/// Flag gating insight execution on the HogQL backend.
pub const HOGQL_INSIGHTS: &str = "hogql-insights";

/// Released features whose flags have not been removed yet. They are always
/// reported as enabled.
pub const PERSISTED_FEATURE_FLAGS: &[&str] = &[
    "simplify-actions",
    "historical-exports-v2",
    "ingestion-warnings-enabled",
    "hogql-in-insight-serialization",
    "hogql-insights-preview",
    "persons-hogql-query",
    "datanode-concurrency-limit",
    "session-table-property-filters",
    "query-async",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagChange {
    pub names: Vec<String>,
}

impl FlagChange {
    pub fn touches(&self, name: &str) -> bool {
        self.names.iter().any(|candidate| candidate == name)
    }
}

pub trait FlagListener: Send + Sync {
    fn flags_changed(&self, change: &FlagChange);
}

/// Boolean feature flags with synchronous change notification.
///
/// Listeners are held weakly; a listener that has been dropped is pruned on
/// the next notification.
pub struct FlagStore {
    flags: RwLock<BTreeMap<String, bool>>,
    persisted: BTreeSet<String>,
    listeners: Mutex<Vec<Weak<dyn FlagListener>>>,
}

impl Default for FlagStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FlagStore {
    pub fn new() -> Self {
        Self::with_persisted(PERSISTED_FEATURE_FLAGS.iter().copied())
    }

    pub fn with_persisted<I, S>(persisted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            flags: RwLock::new(BTreeMap::new()),
            persisted: persisted.into_iter().map(Into::into).collect(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Builds a store from configuration: built-in persisted flags, the
    /// configured persisted flags and the initial flag values.
    pub fn from_config(config: &InsightConfig) -> Self {
        let persisted = PERSISTED_FEATURE_FLAGS
            .iter()
            .map(|name| name.to_string())
            .chain(config.persisted_flags.iter().cloned());
        let store = Self::with_persisted(persisted);
        *store.flags.write().unwrap_or_else(PoisonError::into_inner) = config.flags.clone();
        store
    }

    /// Unset flags read as disabled.
    pub fn get(&self, name: &str) -> bool {
        if self.persisted.contains(name) {
            return true;
        }
        self.flags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> BTreeMap<String, bool> {
        let mut flags = self
            .flags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for name in &self.persisted {
            flags.insert(name.clone(), true);
        }
        flags
    }

    /// Writes every flag in `names`, taking its value from `values` (missing
    /// entries disable the flag), then notifies listeners.
    pub fn set_flags<S: AsRef<str>>(&self, names: &[S], values: &BTreeMap<String, bool>) {
        let names: Vec<String> = names.iter().map(|name| name.as_ref().to_string()).collect();
        {
            let mut flags = self.flags.write().unwrap_or_else(PoisonError::into_inner);
            for name in &names {
                let enabled = values.get(name).copied().unwrap_or(false);
                flags.insert(name.clone(), enabled);
            }
        }
        debug!(event = "flags_set", count = names.len());
        self.notify(&FlagChange { names });
    }

    pub fn subscribe(&self, listener: Weak<dyn FlagListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn notify(&self, change: &FlagChange) {
        let live: Vec<_> = {
            let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners.retain(|listener| listener.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            listener.flags_changed(change);
        }
    }
}
