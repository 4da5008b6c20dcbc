//! Background cache maintenance
//!
//! Two independent loops: the cleanup loop sweeps expired and stale entries on
//! the cache's (possibly session-shortened) cleanup interval, the monitor loop
//! samples process memory and reacts to pressure. Each takes the cache lock only
//! inside its own pass.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::TieredCache;

/// Page size assumed when converting resident pages to bytes
const PAGE_SIZE_BYTES: f64 = 4096.0;

/// Source of process memory usage samples
pub trait MemoryProbe: Send + Sync {
    /// Resident memory in megabytes, `None` when unavailable
    fn sample_mb(&self) -> Option<f64>;
}

/// Reads resident set size from `/proc/self/statm`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcStatmProbe;

impl MemoryProbe for ProcStatmProbe {
    fn sample_mb(&self) -> Option<f64> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident_pages: f64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        Some(resident_pages * PAGE_SIZE_BYTES / 1024.0 / 1024.0)
    }
}

/// Handle to the running maintenance tasks
pub struct CacheMaintenance {
    shutdown: broadcast::Sender<()>,
    cleanup_task: JoinHandle<()>,
    monitor_task: JoinHandle<()>,
}

impl CacheMaintenance {
    /// Start the cleanup and memory monitor loops
    pub fn spawn(cache: Arc<TieredCache>, probe: Arc<dyn MemoryProbe>) -> Self {
        let (shutdown, _) = broadcast::channel(1);

        let cleanup_task = tokio::spawn(run_cleanup(cache.clone(), shutdown.subscribe()));
        let monitor_task = tokio::spawn(run_monitor(cache, probe, shutdown.subscribe()));

        info!("Cache maintenance started");
        Self {
            shutdown,
            cleanup_task,
            monitor_task,
        }
    }

    /// Stop both loops and wait for them to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.cleanup_task.await;
        let _ = self.monitor_task.await;
        info!("Cache maintenance stopped");
    }
}

async fn run_cleanup(cache: Arc<TieredCache>, mut shutdown_rx: broadcast::Receiver<()>) {
    loop {
        // Re-read each pass so session optimisation takes effect
        let wait = cache.cleanup_interval();

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                let removed = cache.cleanup();
                debug!(removed, "Scheduled cache cleanup pass");
            }
            _ = shutdown_rx.recv() => {
                debug!("Cache cleanup loop shutting down");
                break;
            }
        }
    }
}

async fn run_monitor(
    cache: Arc<TieredCache>,
    probe: Arc<dyn MemoryProbe>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = interval(cache.monitor_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(usage_mb) = probe.sample_mb() {
                    cache.check_memory(usage_mb);
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Memory monitor shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, TieredCache};
    use crate::clock::ManualClock;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FixedProbe(Mutex<f64>);

    impl MemoryProbe for FixedProbe {
        fn sample_mb(&self) -> Option<f64> {
            Some(*self.0.lock().unwrap())
        }
    }

    fn test_cache() -> (Arc<TieredCache>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(TieredCache::new(CacheConfig::default(), clock.clone()));
        (cache, clock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_loop_sweeps_expired() {
        let (cache, clock) = test_cache();
        cache.set("short", json!(1), Some(Duration::from_secs(5)));
        cache.set("position:keep", json!(2), None);
        clock.advance(chrono::Duration::seconds(10));

        let probe = Arc::new(FixedProbe(Mutex::new(10.0)));
        let maintenance = CacheMaintenance::spawn(cache.clone(), probe);

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(cache.len(), 1);
        assert!(cache.stats().last_cleanup.is_some());

        maintenance.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_loop_samples_memory() {
        let (cache, _) = test_cache();
        for i in 0..4 {
            cache.set(&format!("cold{}", i), json!(i), None);
        }

        let probe = Arc::new(FixedProbe(Mutex::new(50.0)));
        let maintenance = CacheMaintenance::spawn(cache.clone(), probe.clone());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(cache.stats().memory_usage_mb, Some(50.0));
        assert_eq!(cache.len(), 4);

        *probe.0.lock().unwrap() = 500.0;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(cache.len(), 2);

        maintenance.shutdown().await;
    }

    #[test]
    fn test_proc_statm_probe() {
        // Only meaningful on Linux; elsewhere the probe reports nothing
        if let Some(mb) = ProcStatmProbe.sample_mb() {
            assert!(mb > 0.0);
        }
    }
}
