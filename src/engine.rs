//! Engine - composition root
//!
//! Owns every component, spawns one worker thread per core, and drives the
//! shutdown sequence: clear the running flag, join the workers, flush the
//! cache, sync the store. All cross-core state lives in the components the
//! engine hands out as `Arc`s; nothing is process-global.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{error, info};

use crate::anticipator::Anticipator;
use crate::cache::{CacheStats, PageCache};
use crate::compress::{CompressionConfig, CompressionManager, CompressionStats};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::ring::RingLog;
use crate::scheduler::Scheduler;
use crate::store::BackingStore;
use crate::worker::Worker;

/// Aggregate statistics reported after a run
#[derive(Debug, Clone)]
pub struct EngineReport {
    /// Operations completed per core
    pub ops_per_core: Vec<u64>,
    /// Final cache statistics
    pub cache: CacheStats,
    /// Final compression statistics
    pub compression: CompressionStats,
    /// Pages appended to the ring log
    pub ring_appended: u64,
}

/// The block staging engine
pub struct Engine {
    config: EngineConfig,
    store: Arc<BackingStore>,
    cache: Arc<PageCache>,
    compressor: Arc<CompressionManager>,
    scheduler: Arc<Scheduler>,
    ring: Arc<RingLog>,
    anticipator: Arc<Anticipator>,
    running: Arc<AtomicBool>,
}

impl Engine {
    /// Build all components from a validated configuration
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(BackingStore::open(
            &config.storage_path,
            config.total_bytes(),
        )?);
        let cache = Arc::new(PageCache::new(
            Arc::clone(&store),
            config.max_cache_entries,
        ));
        let compressor = Arc::new(CompressionManager::with_config(CompressionConfig {
            min_level: config.compression_min_level,
            max_level: config.compression_max_level,
            adaptive_threshold: config.adaptive_threshold,
            ..Default::default()
        }));
        let scheduler = Arc::new(Scheduler::new(config.cores, config.migration_threshold));
        let ring = Arc::new(RingLog::new(config.ring_bytes()));
        let anticipator = Arc::new(Anticipator::new());

        Ok(Self {
            config,
            store,
            cache,
            compressor,
            scheduler,
            ring,
            anticipator,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Shared running flag; clearing it drains the workers
    pub fn running_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Request a graceful shutdown
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Spawn the workers and block until they drain.
    ///
    /// Returns the aggregate report after the cache is flushed and the
    /// store synced. A thread-spawn failure aborts startup cleanly.
    pub fn run(&self) -> Result<EngineReport> {
        info!(
            cores = self.config.cores,
            segment_mb = self.config.segment_mb,
            storage = %self.config.storage_path.display(),
            "engine starting"
        );

        let mut handles: Vec<(thread::JoinHandle<()>, Arc<AtomicBool>)> = Vec::new();
        let mut ops: Vec<Arc<AtomicU64>> = Vec::new();

        for core_id in 0..self.config.cores {
            let mut worker = Worker::new(
                core_id,
                Arc::clone(&self.store),
                Arc::clone(&self.cache),
                Arc::clone(&self.compressor),
                Arc::clone(&self.scheduler),
                Arc::clone(&self.ring),
                Arc::clone(&self.anticipator),
                self.config.clone(),
                Arc::clone(&self.running),
            );
            ops.push(worker.ops_handle());
            let running = worker.running_handle();

            let spawned = thread::Builder::new()
                .name(format!("worker-{}", core_id))
                .spawn(move || worker.run());

            match spawned {
                Ok(handle) => handles.push((handle, running)),
                Err(e) => {
                    error!(core = core_id, error = %e, "failed to spawn worker");
                    self.running.store(false, Ordering::Release);
                    for (handle, running) in handles {
                        running.store(false, Ordering::Release);
                        let _ = handle.join();
                    }
                    return Err(Error::Internal(format!(
                        "failed to spawn worker {}: {}",
                        core_id, e
                    )));
                }
            }
        }

        for (handle, _) in handles {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }

        // Workers are gone: flush dirty pages and make the file durable
        self.cache.close();
        if let Err(e) = self.store.sync() {
            error!(error = %e, "final store sync failed");
        }

        let report = EngineReport {
            ops_per_core: ops.iter().map(|o| o.load(Ordering::Relaxed)).collect(),
            cache: self.cache.stats(),
            compression: self.compressor.stats(),
            ring_appended: self.ring.appended(),
        };
        info!(
            total_ops = report.ops_per_core.iter().sum::<u64>(),
            cache_hit_ratio = report.cache.hit_ratio,
            "engine stopped"
        );
        Ok(report)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn small_config(dir: &tempfile::TempDir) -> EngineConfig {
        EngineConfig {
            cores: 2,
            segment_mb: 1,
            cache_mb: 1,
            max_cache_entries: 32,
            storage_path: dir.path().join("swap.img"),
            base_load_delay: Duration::ZERO,
            low_load_delay: Duration::ZERO,
            high_load_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn test_engine_construction_preallocates_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(&dir);
        let engine = Engine::new(config.clone()).unwrap();
        assert_eq!(engine.store.size().unwrap(), config.total_bytes());
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            cores: 0,
            ..small_config(&dir)
        };
        assert!(Engine::new(config).is_err());
    }

    #[test]
    fn test_run_and_clean_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(Engine::new(small_config(&dir)).unwrap());

        let runner = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || engine.run().unwrap())
        };

        std::thread::sleep(Duration::from_millis(150));
        engine.shutdown();
        let report = runner.join().unwrap();

        assert_eq!(report.ops_per_core.len(), 2);
        for (core, &ops) in report.ops_per_core.iter().enumerate() {
            assert!(ops > 0, "core {} made no progress", core);
        }
        assert!(report.compression.compressions > 0);
        assert!(report.ring_appended > 0);
        // Cache was emptied by the shutdown flush
        assert_eq!(engine.cache.len(), 0);
    }

    #[test]
    fn test_shutdown_flushes_dirty_pages() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(small_config(&dir)).unwrap();

        // Dirty a page through the cache without triggering eviction
        let pattern: Vec<u8> = (0..crate::config::BLOCK_SIZE)
            .map(|i| (i % 13) as u8)
            .collect();
        engine.cache.get(0, true).unwrap();
        engine.cache.publish(0, &pattern);

        // No workers started: run joins nothing, then flushes
        engine.shutdown();
        engine.run().unwrap();

        let on_disk = engine.store.read(0, crate::config::BLOCK_SIZE).unwrap();
        assert_eq!(on_disk.as_ref(), pattern.as_slice());
    }
}
