//! 会话统计
//!
//! 写线程只有一个，但报告可以从其他线程读取，所以计数器用原子量

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// 会话统计收集器
///
/// 所有操作都是 lock-free 的
#[derive(Debug, Default)]
pub struct SessionStats {
    write_cycles: AtomicU64,
    bytes_written: AtomicU64,
    retry_sleeps: AtomicU64,
    interrupted_retries: AtomicU64,
    pacing_sleeps: AtomicU64,
    query_failures: AtomicU64,
    wait_timeouts: AtomicU64,
    fatal_errors: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_write(&self, bytes: usize) {
        self.write_cycles.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_retry_sleep(&self) {
        self.retry_sleeps.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_interrupted(&self) {
        self.interrupted_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_pacing_sleep(&self) {
        self.pacing_sleeps.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_query_failure(&self) {
        self.query_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_wait_timeout(&self) {
        self.wait_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fatal(&self) {
        self.fatal_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// 生成快照
    pub fn report(&self) -> StatsReport {
        StatsReport {
            write_cycles: self.write_cycles.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            retry_sleeps: self.retry_sleeps.load(Ordering::Relaxed),
            interrupted_retries: self.interrupted_retries.load(Ordering::Relaxed),
            pacing_sleeps: self.pacing_sleeps.load(Ordering::Relaxed),
            query_failures: self.query_failures.load(Ordering::Relaxed),
            wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
            fatal_errors: self.fatal_errors.load(Ordering::Relaxed),
        }
    }
}

/// 统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsReport {
    pub write_cycles: u64,
    pub bytes_written: u64,
    pub retry_sleeps: u64,
    pub interrupted_retries: u64,
    pub pacing_sleeps: u64,
    pub query_failures: u64,
    pub wait_timeouts: u64,
    pub fatal_errors: u64,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Session Stats ===")?;
        writeln!(f, "Write cycles:    {}", self.write_cycles)?;
        writeln!(f, "Bytes written:   {}", self.bytes_written)?;
        writeln!(
            f,
            "Retries:         {} sleeps, {} interrupted",
            self.retry_sleeps, self.interrupted_retries
        )?;
        writeln!(f, "Pacing sleeps:   {}", self.pacing_sleeps)?;
        writeln!(
            f,
            "Wait skipped:    {} query failures, {} timeouts",
            self.query_failures, self.wait_timeouts
        )?;
        write!(f, "Fatal errors:    {}", self.fatal_errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = SessionStats::new();
        stats.record_write(2048);
        stats.record_write(1024);
        stats.record_retry_sleep();
        stats.record_pacing_sleep();
        stats.record_pacing_sleep();

        let report = stats.report();
        assert_eq!(report.write_cycles, 2);
        assert_eq!(report.bytes_written, 3072);
        assert_eq!(report.retry_sleeps, 1);
        assert_eq!(report.pacing_sleeps, 2);
        assert_eq!(report.fatal_errors, 0);
    }

    #[test]
    fn test_report_display() {
        let stats = SessionStats::new();
        stats.record_fatal();
        let text = stats.report().to_string();
        assert!(text.contains("Fatal errors:    1"));
    }
}
