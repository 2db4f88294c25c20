//! Generation throughput counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct MetricsService {
    tokens_generated: AtomicUsize,
    generations: AtomicUsize,
    failures: AtomicUsize,
    busy_rejections: AtomicUsize,
    total_generation_ms: AtomicU64,
    start_time: Instant,
}

impl Default for MetricsService {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsService {
    pub fn new() -> Self {
        Self {
            tokens_generated: AtomicUsize::new(0),
            generations: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            busy_rejections: AtomicUsize::new(0),
            total_generation_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_generation(&self, tokens: usize, elapsed: Duration) {
        self.generations.fetch_add(1, Ordering::Relaxed);
        self.tokens_generated.fetch_add(tokens, Ordering::Relaxed);
        self.total_generation_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_busy(&self) {
        self.busy_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> MetricsStats {
        let tokens = self.tokens_generated.load(Ordering::Relaxed);
        let generations = self.generations.load(Ordering::Relaxed);
        let total_ms = self.total_generation_ms.load(Ordering::Relaxed);

        MetricsStats {
            tokens_generated: tokens,
            generations,
            failures: self.failures.load(Ordering::Relaxed),
            busy_rejections: self.busy_rejections.load(Ordering::Relaxed),
            avg_generation_ms: if generations > 0 { total_ms / generations as u64 } else { 0 },
            tokens_per_second: if total_ms > 0 {
                tokens as f64 * 1000.0 / total_ms as f64
            } else {
                0.0
            },
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsStats {
    pub tokens_generated: usize,
    pub generations: usize,
    pub failures: usize,
    pub busy_rejections: usize,
    pub avg_generation_ms: u64,
    pub tokens_per_second: f64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput() {
        let metrics = MetricsService::new();
        metrics.record_generation(50, Duration::from_millis(500));
        metrics.record_generation(50, Duration::from_millis(500));
        metrics.record_busy();

        let stats = metrics.get_stats();
        assert_eq!(stats.tokens_generated, 100);
        assert_eq!(stats.generations, 2);
        assert_eq!(stats.avg_generation_ms, 500);
        assert_eq!(stats.tokens_per_second, 100.0);
        assert_eq!(stats.busy_rejections, 1);
    }
}
