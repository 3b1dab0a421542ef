//! Batched analysis: script-level parallelism, cancellation, and the
//! shared-resource utilities callers use around merged graphs.
//!
//! A single script's walk is single-threaded and non-suspending; the batch
//! layer runs multiple scripts concurrently, each with its own context and
//! graph, under a configurable concurrency cap. Memory pressure reported by
//! the (advisory) monitor halves the effective concurrency or rejects new
//! batches outright.

use crate::analyzer::Analyzer;
use crate::intern::partition_count;
use crate::types::{diagnostic_codes, AnalysisResult, ScriptRequest};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A hierarchical cancellation token.
///
/// Cancelling a parent cancels every child derived from it; cancelling a
/// child leaves the parent (and siblings) running.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<CancellationToken>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: None,
        }
    }

    /// Derives a child token that also observes this token's state.
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        self.parent
            .as_ref()
            .map(|parent| parent.is_cancelled())
            .unwrap_or(false)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Advisory memory pressure levels sampled from a [`MemoryMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPressure {
    Normal,
    /// Reduce concurrency.
    Elevated,
    /// Reject new batches.
    Critical,
}

/// Advisory memory pressure source consulted by the batch layer.
pub trait MemoryMonitor: Send + Sync {
    fn pressure(&self) -> MemoryPressure;
}

/// A monitor that never reports pressure.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMemoryMonitor;

impl MemoryMonitor for NoopMemoryMonitor {
    fn pressure(&self) -> MemoryPressure {
        MemoryPressure::Normal
    }
}

/// Partitioned reader-writer locks for callers that synchronize access to a
/// shared result graph after merging. Partition count is the next power of
/// two at or above four times the CPU count. Not used by the core's
/// internal data path.
pub struct LockManager {
    partitions: Vec<RwLock<()>>,
    mask: usize,
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_partitions(partition_count())
    }

    pub fn with_partitions(partitions: usize) -> Self {
        let count = partitions.max(1).next_power_of_two();
        Self {
            partitions: (0..count).map(|_| RwLock::new(())).collect(),
            mask: count - 1,
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn read(&self, key: u64) -> RwLockReadGuard<'_, ()> {
        self.partitions[(key as usize) & self.mask]
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn write(&self, key: u64) -> RwLockWriteGuard<'_, ()> {
        self.partitions[(key as usize) & self.mask]
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Read lock keyed by a canonical table name.
    pub fn read_name(&self, name: &str) -> RwLockReadGuard<'_, ()> {
        self.read(crate::intern::hash_id([name]))
    }

    /// Write lock keyed by a canonical table name.
    pub fn write_name(&self, name: &str) -> RwLockWriteGuard<'_, ()> {
        self.write(crate::intern::hash_id([name]))
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs batches of scripts through a shared [`Analyzer`].
pub struct BatchAnalyzer {
    analyzer: Analyzer,
    monitor: Arc<dyn MemoryMonitor>,
}

impl BatchAnalyzer {
    pub fn new(analyzer: Analyzer) -> Self {
        Self::with_monitor(analyzer, Arc::new(NoopMemoryMonitor))
    }

    pub fn with_monitor(analyzer: Analyzer, monitor: Arc<dyn MemoryMonitor>) -> Self {
        Self { analyzer, monitor }
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    /// Analyzes every script, at most `max_concurrent_scripts` at a time.
    /// Each item gets a child token of `parent`; results come back in input
    /// order. Between concurrent scripts no ordering is guaranteed; within
    /// one script the graph is a deterministic function of the input.
    pub fn analyze_all(
        &self,
        scripts: &[ScriptRequest],
        parent: &CancellationToken,
    ) -> Vec<AnalysisResult> {
        match self.monitor.pressure() {
            MemoryPressure::Critical => {
                return scripts
                    .iter()
                    .map(|script| {
                        let mut result = AnalysisResult::from_error(
                            diagnostic_codes::MEMORY_PRESSURE,
                            "analysis batch rejected under memory pressure",
                        );
                        result.source_name = script.source_name.clone();
                        result
                    })
                    .collect();
            }
            MemoryPressure::Elevated => {}
            MemoryPressure::Normal => {}
        }

        let configured = self.analyzer.options().max_concurrent_scripts.max(1);
        let workers = match self.monitor.pressure() {
            MemoryPressure::Elevated => (configured / 2).max(1),
            _ => configured,
        }
        .min(scripts.len().max(1));

        let next = AtomicUsize::new(0);
        let slots: Vec<Mutex<Option<AnalysisResult>>> =
            scripts.iter().map(|_| Mutex::new(None)).collect();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    if index >= scripts.len() {
                        break;
                    }
                    let token = parent.child();
                    let result = self
                        .analyzer
                        .analyze_with_cancellation(&scripts[index], token);
                    *slots[index].lock().unwrap_or_else(|poisoned| poisoned.into_inner()) =
                        Some(result);
                });
            }
        });

        slots
            .into_iter()
            .map(|slot| {
                slot.into_inner()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .unwrap_or_else(|| {
                        AnalysisResult::from_error(
                            diagnostic_codes::INTERNAL,
                            "analysis worker produced no result",
                        )
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AnalyzerOptions;

    #[test]
    fn test_cancellation_propagates_to_children() {
        let parent = CancellationToken::new();
        let child = parent.child();
        let grandchild = child.child();
        assert!(!grandchild.is_cancelled());

        parent.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_child_cancellation_stays_local() {
        let parent = CancellationToken::new();
        let a = parent.child();
        let b = parent.child();
        a.cancel();
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_lock_manager_partitions() {
        let locks = LockManager::with_partitions(6);
        assert_eq!(locks.partition_count(), 8);
        // Guards on distinct partitions are independent.
        let _a = locks.read(1);
        let _b = locks.read(2);
        let _c = locks.write(3);
        // Keys wrap onto partitions by mask.
        assert_eq!(9 & (locks.partition_count() - 1), 1);
    }

    #[test]
    fn test_lock_manager_name_keys() {
        let locks = LockManager::with_partitions(4);
        let read = locks.read_name("dbo.orders");
        drop(read);
        let write = locks.write_name("dbo.orders");
        drop(write);
    }

    #[test]
    fn test_analyze_all_in_order() {
        let analyzer = Analyzer::new(AnalyzerOptions::default());
        let batch = BatchAnalyzer::new(analyzer);
        let scripts = vec![
            ScriptRequest::new("SELECT a FROM t").with_source_name("one.sql"),
            ScriptRequest::new("SELECT b FROM u").with_source_name("two.sql"),
            ScriptRequest::new("SELECT c FROM v").with_source_name("three.sql"),
        ];
        let results = batch.analyze_all(&scripts, &CancellationToken::new());
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].source_name.as_deref(), Some("one.sql"));
        assert_eq!(results[2].source_name.as_deref(), Some("three.sql"));
        assert!(results.iter().all(|r| !r.is_incomplete()));
        assert!(results[1].graph.table_id("u").is_some());
    }

    #[test]
    fn test_cancelled_batch_marks_results_incomplete() {
        let analyzer = Analyzer::new(AnalyzerOptions::default());
        let batch = BatchAnalyzer::new(analyzer);
        let token = CancellationToken::new();
        token.cancel();
        let scripts = vec![ScriptRequest::new("SELECT a FROM t")];
        let results = batch.analyze_all(&scripts, &token);
        assert!(results[0].is_incomplete());
    }

    #[test]
    fn test_critical_pressure_rejects_batch() {
        struct CriticalMonitor;
        impl MemoryMonitor for CriticalMonitor {
            fn pressure(&self) -> MemoryPressure {
                MemoryPressure::Critical
            }
        }

        let analyzer = Analyzer::new(AnalyzerOptions::default());
        let batch = BatchAnalyzer::with_monitor(analyzer, Arc::new(CriticalMonitor));
        let results = batch.analyze_all(&[ScriptRequest::new("SELECT 1")], &CancellationToken::new());
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].diagnostics[0].code,
            diagnostic_codes::MEMORY_PRESSURE
        );
    }
}
