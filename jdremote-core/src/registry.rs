//! Direct-connection registry: known `ip:port` endpoints of one device, most recently
//! successful first, with per-endpoint cooldowns and a registry-wide linear back-off.
//!
//! Host-driven: callers pass the current time as unix seconds.

use crate::protocol::DirectEndpoint;

/// How long a failed endpoint is skipped.
pub const ENDPOINT_COOLDOWN_SECS: u64 = 60;

/// Registry-wide cooldown per consecutive round in which every endpoint failed.
pub const BACKOFF_STEP_SECS: u64 = 60;

/// One known endpoint and when it may be tried again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectEntry {
    pub endpoint: DirectEndpoint,
    pub cooldown_until: u64,
}

impl DirectEntry {
    pub fn new(endpoint: DirectEndpoint) -> Self {
        Self {
            endpoint,
            cooldown_until: 0,
        }
    }

    pub fn is_eligible(&self, now: u64) -> bool {
        now >= self.cooldown_until
    }
}

#[derive(Debug, Clone, Default)]
pub struct DirectConnectionRegistry {
    entries: Vec<DirectEntry>,
    consecutive_failures: u32,
    cooldown_until: u64,
}

impl DirectConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[DirectEntry] {
        &self.entries
    }

    pub fn endpoints(&self) -> Vec<DirectEndpoint> {
        self.entries.iter().map(|e| e.endpoint.clone()).collect()
    }

    /// Replace all entries, e.g. with a list persisted by the caller. Cooldowns start cleared.
    pub fn set_endpoints(&mut self, endpoints: Vec<DirectEndpoint>) {
        self.entries = endpoints.into_iter().map(DirectEntry::new).collect();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn cooldown_until(&self) -> u64 {
        self.cooldown_until
    }

    /// True while the registry-wide back-off is running.
    pub fn is_cooling_down(&self, now: u64) -> bool {
        now < self.cooldown_until
    }

    /// Merge the device's current endpoint list: retained entries keep their order and
    /// cooldowns, vanished ones are dropped, new ones are appended.
    pub fn merge(&mut self, reported: &[DirectEndpoint]) {
        self.entries.retain(|e| reported.contains(&e.endpoint));
        for endpoint in reported {
            if !self.entries.iter().any(|e| &e.endpoint == endpoint) {
                self.entries.push(DirectEntry::new(endpoint.clone()));
            }
        }
    }

    /// Endpoints whose own cooldown has elapsed, in registry order.
    pub fn eligible(&self, now: u64) -> Vec<DirectEndpoint> {
        self.entries
            .iter()
            .filter(|e| e.is_eligible(now))
            .map(|e| e.endpoint.clone())
            .collect()
    }

    /// Skip `endpoint` for [`ENDPOINT_COOLDOWN_SECS`].
    pub fn mark_failed(&mut self, endpoint: &DirectEndpoint, now: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| &e.endpoint == endpoint) {
            entry.cooldown_until = now + ENDPOINT_COOLDOWN_SECS;
        }
    }

    /// Move `endpoint` to the front and reset the failure counter.
    pub fn mark_succeeded(&mut self, endpoint: &DirectEndpoint) {
        if let Some(pos) = self.entries.iter().position(|e| &e.endpoint == endpoint) {
            let entry = self.entries.remove(pos);
            self.entries.insert(0, entry);
        }
        self.consecutive_failures = 0;
    }

    /// Every endpoint was skipped or failed: back off for `60 * consecutive_failures` seconds.
    pub fn mark_exhausted(&mut self, now: u64) -> u64 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.cooldown_until = now + BACKOFF_STEP_SECS * u64::from(self.consecutive_failures);
        self.cooldown_until
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
