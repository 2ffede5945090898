//! Proxy rotation and health tracking utilities.
//!
//! Tracks proxy performance, parks failing endpoints for a cooldown, and
//! selects the next candidate based on the chosen rotation strategy.

mod descriptor;

pub use descriptor::{ProxyDescriptor, ProxyParseError, ProxyScheme, redact_entry};

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::modules::scheduler::deadline_after;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RotationStrategy {
    #[default]
    RoundRobin,
    Random,
}

#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    pub rotation_strategy: RotationStrategy,
    pub cooldown: Duration,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            rotation_strategy: RotationStrategy::RoundRobin,
            cooldown: Duration::from_secs(300),
        }
    }
}

/// Serializable summary of the pool, published in bot snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyHealthReport {
    pub total_proxies: usize,
    pub healthy_proxies: usize,
    pub unhealthy_proxies: usize,
    pub details: Vec<ProxyHealth>,
}

impl ProxyHealthReport {
    pub fn get(&self, proxy: &str) -> Option<&ProxyHealth> {
        self.details.iter().find(|health| health.proxy == proxy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyHealth {
    /// Rendered without the password.
    pub proxy: String,
    pub healthy: bool,
    #[serde(flatten)]
    pub stats: ProxyStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyStats {
    pub successes: u64,
    pub failures: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct ProxyEntry {
    descriptor: ProxyDescriptor,
    stats: ProxyStats,
    unhealthy_until: Option<Instant>,
}

impl ProxyEntry {
    fn is_healthy(&self) -> bool {
        self.unhealthy_until.is_none()
    }
}

/// Proxy pool with round-robin or random rotation and cooldown-based health.
///
/// Selection never hands out the immediately previous proxy while another
/// healthy candidate exists. With a single healthy candidate the same
/// descriptor keeps being returned.
#[derive(Debug)]
pub struct ProxyPool {
    config: ProxyPoolConfig,
    enabled: bool,
    entries: Vec<ProxyEntry>,
    current: Option<usize>,
    last_rotated: Option<Instant>,
    pinned: bool,
    rng: StdRng,
}

impl ProxyPool {
    pub fn new(config: ProxyPoolConfig) -> Self {
        Self {
            config,
            enabled: true,
            entries: Vec::new(),
            current: None,
            last_rotated: None,
            pinned: false,
            rng: StdRng::from_entropy(),
        }
    }

    /// A pool that never hands out a proxy.
    pub fn disabled() -> Self {
        let mut pool = Self::new(ProxyPoolConfig::default());
        pool.enabled = false;
        pool
    }

    /// Reseed the random strategy, mostly useful for reproducible tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn load<I>(&mut self, proxies: I)
    where
        I: IntoIterator<Item = ProxyDescriptor>,
    {
        self.entries.clear();
        self.current = None;
        for proxy in proxies {
            self.add_proxy(proxy);
        }
    }

    pub fn add_proxy(&mut self, descriptor: ProxyDescriptor) {
        if self
            .entries
            .iter()
            .any(|entry| entry.descriptor == descriptor)
        {
            return;
        }
        self.entries.push(ProxyEntry {
            descriptor,
            stats: ProxyStats::default(),
            unhealthy_until: None,
        });
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The proxy currently assigned to the engine, if any.
    pub fn current(&self) -> Option<&ProxyDescriptor> {
        self.current.map(|idx| &self.entries[idx].descriptor)
    }

    /// Deadline of the next timed rotation for the given interval.
    pub fn rotation_due_at(&self, interval: Duration) -> Option<Instant> {
        if !self.is_enabled() || interval.is_zero() {
            return None;
        }
        self.last_rotated.map(|last| deadline_after(last, interval))
    }

    /// Locks the current assignment; `rotate` returns it unchanged until
    /// `unpin`, or until the pinned proxy is marked failed.
    pub fn pin(&mut self) {
        self.pinned = true;
    }

    pub fn unpin(&mut self) {
        self.pinned = false;
    }

    /// Selects the next healthy proxy and makes it the current assignment.
    pub fn rotate(&mut self) -> Option<ProxyDescriptor> {
        if !self.is_enabled() {
            return None;
        }

        self.reinstate_expired();

        if self.pinned {
            match self.current.filter(|&idx| self.entries[idx].is_healthy()) {
                Some(idx) => {
                    log::trace!("proxy assignment pinned, keeping current proxy");
                    self.last_rotated = Some(Instant::now());
                    self.entries[idx].stats.last_used = Some(Utc::now());
                    return Some(self.entries[idx].descriptor.clone());
                }
                None => {
                    log::debug!("pinned proxy is unhealthy, releasing the pin");
                    self.pinned = false;
                }
            }
        }

        let healthy: Vec<usize> = (0..self.entries.len())
            .filter(|&idx| self.entries[idx].is_healthy())
            .collect();
        if healthy.is_empty() {
            self.current = None;
            return None;
        }

        let candidates: Vec<usize> = if healthy.len() > 1 {
            healthy
                .iter()
                .copied()
                .filter(|&idx| Some(idx) != self.current)
                .collect()
        } else {
            healthy
        };

        let selected = match self.config.rotation_strategy {
            RotationStrategy::RoundRobin => {
                let len = self.entries.len();
                let start = self.current.map(|idx| idx + 1).unwrap_or(0);
                (0..len)
                    .map(|offset| (start + offset) % len)
                    .find(|idx| candidates.contains(idx))?
            }
            RotationStrategy::Random => *candidates.choose(&mut self.rng)?,
        };

        self.current = Some(selected);
        self.last_rotated = Some(Instant::now());
        let entry = &mut self.entries[selected];
        entry.stats.last_used = Some(Utc::now());
        Some(entry.descriptor.clone())
    }

    pub fn report_success(&mut self, proxy: &ProxyDescriptor) {
        if let Some(entry) = self.entry_mut(proxy) {
            entry.stats.successes += 1;
        }
    }

    /// Excludes the proxy from selection until its cooldown elapses.
    pub fn mark_failed(&mut self, proxy: &ProxyDescriptor) {
        let cooldown = self.config.cooldown;
        if let Some(entry) = self.entry_mut(proxy) {
            entry.stats.failures += 1;
            entry.stats.last_failure = Some(Utc::now());
            entry.unhealthy_until = Some(deadline_after(Instant::now(), cooldown));
        }
    }

    /// Clears cooldowns whose deadline has passed. Returns how many proxies came back.
    pub fn reinstate_expired(&mut self) -> usize {
        let now = Instant::now();
        let mut reinstated = 0;
        for entry in &mut self.entries {
            if let Some(until) = entry.unhealthy_until
                && until <= now
            {
                entry.unhealthy_until = None;
                reinstated += 1;
            }
        }
        reinstated
    }

    pub fn health_report(&self) -> ProxyHealthReport {
        let healthy = self.entries.iter().filter(|entry| entry.is_healthy()).count();
        ProxyHealthReport {
            total_proxies: self.entries.len(),
            healthy_proxies: healthy,
            unhealthy_proxies: self.entries.len() - healthy,
            details: self
                .entries
                .iter()
                .map(|entry| ProxyHealth {
                    proxy: entry.descriptor.to_string(),
                    healthy: entry.is_healthy(),
                    stats: entry.stats.clone(),
                })
                .collect(),
        }
    }

    fn entry_mut(&mut self, proxy: &ProxyDescriptor) -> Option<&mut ProxyEntry> {
        self.entries
            .iter_mut()
            .find(|entry| &entry.descriptor == proxy)
    }
}

impl Default for ProxyPool {
    fn default() -> Self {
        Self::new(ProxyPoolConfig::default())
    }
}
