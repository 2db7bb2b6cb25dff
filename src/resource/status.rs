//! Fetch progress accounting
//!
//! Counters are shared by every feeder and consumer of a fetch, across all
//! regions, so they are atomics. The set of resource types is fixed when the
//! logger is created; only the values change afterwards.

use super::target::ResourceTarget;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Minimum delay between two intermediate progress lines
const SHOW_INTERVAL: Duration = Duration::from_millis(500);

/// Sink for discovered/fetched counters
pub trait ProgressSink: Send + Sync {
    fn discovered(&self, resource_type: &str, count: usize);
    fn fetched(&self, resource_type: &str);
    fn regions_discovered(&self, count: usize);
    fn region_fetched(&self);
    /// Render progress; `finalize` forces a completion summary
    fn show(&self, finalize: bool);
}

/// Snapshot of one counter pair
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub discovered: usize,
    pub fetched: usize,
}

#[derive(Default)]
struct AtomicCounts {
    discovered: AtomicUsize,
    fetched: AtomicUsize,
}

impl AtomicCounts {
    fn snapshot(&self) -> Counts {
        Counts {
            discovered: self.discovered.load(Ordering::Relaxed),
            fetched: self.fetched.load(Ordering::Relaxed),
        }
    }
}

/// Progress logger for one service fetch
pub struct FetchStatusLogger {
    service: String,
    counts: BTreeMap<String, AtomicCounts>,
    regions: AtomicCounts,
    last_shown: Mutex<Option<Instant>>,
}

impl FetchStatusLogger {
    pub fn new(service: &str, targets: &[ResourceTarget]) -> Self {
        Self {
            service: service.to_string(),
            counts: targets
                .iter()
                .map(|t| (t.type_name.clone(), AtomicCounts::default()))
                .collect(),
            regions: AtomicCounts::default(),
            last_shown: Mutex::new(None),
        }
    }

    /// Counters of one resource type
    pub fn counts(&self, resource_type: &str) -> Option<Counts> {
        self.counts.get(resource_type).map(|c| c.snapshot())
    }

    pub fn region_counts(&self) -> Counts {
        self.regions.snapshot()
    }

    /// Counters of every resource type
    pub fn snapshot(&self) -> BTreeMap<String, Counts> {
        self.counts
            .iter()
            .map(|(name, c)| (name.clone(), c.snapshot()))
            .collect()
    }

    /// One-line progress summary, e.g. `regions 2/3 | buckets 4/4 | instances 1/2`
    pub fn render(&self) -> String {
        let regions = self.regions.snapshot();
        let mut parts = vec![format!("regions {}/{}", regions.fetched, regions.discovered)];
        for (name, counts) in &self.counts {
            let c = counts.snapshot();
            parts.push(format!("{} {}/{}", name, c.fetched, c.discovered));
        }
        parts.join(" | ")
    }

    fn due(&self) -> bool {
        let mut last = self
            .last_shown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < SHOW_INTERVAL => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

impl ProgressSink for FetchStatusLogger {
    fn discovered(&self, resource_type: &str, count: usize) {
        match self.counts.get(resource_type) {
            Some(c) => {
                c.discovered.fetch_add(count, Ordering::Relaxed);
            }
            None => tracing::debug!("{}: untracked resource type {}", self.service, resource_type),
        }
    }

    fn fetched(&self, resource_type: &str) {
        if let Some(c) = self.counts.get(resource_type) {
            c.fetched.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn regions_discovered(&self, count: usize) {
        self.regions.discovered.fetch_add(count, Ordering::Relaxed);
    }

    fn region_fetched(&self) {
        self.regions.fetched.fetch_add(1, Ordering::Relaxed);
    }

    fn show(&self, finalize: bool) {
        if finalize {
            tracing::info!("{} fetched: {}", self.service, self.render());
        } else if self.due() {
            tracing::debug!("{} progress: {}", self.service, self.render());
        }
    }
}

impl std::fmt::Debug for FetchStatusLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchStatusLogger")
            .field("service", &self.service)
            .field("counts", &self.snapshot())
            .field("regions", &self.region_counts())
            .finish()
    }
}
