//! Per-method call counters.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one method.
#[derive(Debug, Default)]
pub struct MethodCounters {
    pub requests: AtomicU64,
    pub successes: AtomicU64,
    pub failures: AtomicU64,
}

/// Point-in-time copy of [`MethodCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
}

/// Call counters keyed by method name.
#[derive(Debug, Default)]
pub struct MethodStats {
    methods: DashMap<String, MethodCounters>,
    unknown_methods: AtomicU64,
}

impl MethodStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self, method: &str, pick: impl Fn(&MethodCounters) -> &AtomicU64) {
        if let Some(counters) = self.methods.get(method) {
            pick(counters.value()).fetch_add(1, Ordering::Relaxed);
            return;
        }
        let counters = self.methods.entry(method.to_string()).or_default();
        pick(counters.value()).fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request(&self, method: &str) {
        self.bump(method, |c| &c.requests);
    }

    pub fn record_success(&self, method: &str) {
        self.bump(method, |c| &c.successes);
    }

    pub fn record_failure(&self, method: &str) {
        self.bump(method, |c| &c.failures);
    }

    pub fn record_unknown_method(&self) {
        self.unknown_methods.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the counters for `method`, if it has been called.
    pub fn get(&self, method: &str) -> Option<MethodSnapshot> {
        self.methods.get(method).map(|c| MethodSnapshot {
            requests: c.requests.load(Ordering::Relaxed),
            successes: c.successes.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
        })
    }

    /// Returns all counters sorted by method name.
    pub fn snapshot(&self) -> Vec<(String, MethodSnapshot)> {
        let mut all: Vec<_> = self
            .methods
            .iter()
            .map(|entry| {
                let c = entry.value();
                (
                    entry.key().clone(),
                    MethodSnapshot {
                        requests: c.requests.load(Ordering::Relaxed),
                        successes: c.successes.load(Ordering::Relaxed),
                        failures: c.failures.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Returns how many calls named a method that is not registered.
    pub fn unknown_methods(&self) -> u64 {
        self.unknown_methods.load(Ordering::Relaxed)
    }
}
