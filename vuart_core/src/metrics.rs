// metrics.rs
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::tx::FlushReason;

// ============================================================================
// UART METRICS
// ============================================================================

#[derive(Debug)]
pub struct UartMetrics {
    /// Fixed at construction.
    enabled: bool,

    // Data path
    tx_bytes: AtomicU64,
    tx_discarded: AtomicU64,
    rx_bytes: AtomicU64,

    // Flush reasons
    threshold_flushes: AtomicU64,
    idle_flushes: AtomicU64,
    full_flushes: AtomicU64,

    // Errors
    overruns: AtomicU64,
    protocol_errors: AtomicU64,

    // Virtual interrupts
    interrupts_delivered: AtomicU64,
    spurious_wakeups: AtomicU64,
}

impl UartMetrics {
    /// Creates a new enabled metrics instance
    pub fn new() -> Self {
        Self {
            enabled: true,
            tx_bytes: AtomicU64::new(0),
            tx_discarded: AtomicU64::new(0),
            rx_bytes: AtomicU64::new(0),
            threshold_flushes: AtomicU64::new(0),
            idle_flushes: AtomicU64::new(0),
            full_flushes: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            interrupts_delivered: AtomicU64::new(0),
            spurious_wakeups: AtomicU64::new(0),
        }
    }

    /// Creates a disabled metrics instance
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    fn bump(&self, counter: &AtomicU64, n: u64) {
        if self.is_enabled() {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    // ========================================================================
    // RECORDING METHODS
    // ========================================================================

    /// Records a TX flush. `delivered` is false when no consumer was bound
    /// and the bytes were dropped.
    pub fn record_flush(&self, reason: FlushReason, bytes: usize, delivered: bool) {
        let counter = match reason {
            FlushReason::Threshold => &self.threshold_flushes,
            FlushReason::Idle => &self.idle_flushes,
            FlushReason::Full => &self.full_flushes,
        };
        self.bump(counter, 1);
        if delivered {
            self.bump(&self.tx_bytes, bytes as u64);
        } else {
            self.bump(&self.tx_discarded, bytes as u64);
        }
    }

    #[inline]
    pub fn record_rx(&self, bytes: usize) {
        self.bump(&self.rx_bytes, bytes as u64);
    }

    #[inline]
    pub fn record_overrun(&self) {
        self.bump(&self.overruns, 1);
    }

    #[inline]
    pub fn record_protocol_error(&self) {
        self.bump(&self.protocol_errors, 1);
    }

    #[inline]
    pub fn record_interrupt(&self) {
        self.bump(&self.interrupts_delivered, 1);
    }

    #[inline]
    pub fn record_spurious_wakeup(&self) {
        self.bump(&self.spurious_wakeups, 1);
    }

    // ========================================================================
    // ACCESSOR METHODS
    // ========================================================================

    pub fn tx_bytes(&self) -> u64 {
        self.tx_bytes.load(Ordering::Relaxed)
    }

    pub fn tx_discarded(&self) -> u64 {
        self.tx_discarded.load(Ordering::Relaxed)
    }

    pub fn rx_bytes(&self) -> u64 {
        self.rx_bytes.load(Ordering::Relaxed)
    }

    pub fn flushes(&self, reason: FlushReason) -> u64 {
        match reason {
            FlushReason::Threshold => self.threshold_flushes.load(Ordering::Relaxed),
            FlushReason::Idle => self.idle_flushes.load(Ordering::Relaxed),
            FlushReason::Full => self.full_flushes.load(Ordering::Relaxed),
        }
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn protocol_errors(&self) -> u64 {
        self.protocol_errors.load(Ordering::Relaxed)
    }

    pub fn interrupts_delivered(&self) -> u64 {
        self.interrupts_delivered.load(Ordering::Relaxed)
    }

    pub fn spurious_wakeups(&self) -> u64 {
        self.spurious_wakeups.load(Ordering::Relaxed)
    }

    // ========================================================================
    // COMPUTED METRICS
    // ========================================================================

    /// Average number of bytes handed to the consumer per delivering flush.
    pub fn avg_flush_size(&self) -> f64 {
        let flushes = self.flushes(FlushReason::Threshold)
            + self.flushes(FlushReason::Idle)
            + self.flushes(FlushReason::Full);
        if flushes == 0 {
            return 0.0;
        }
        self.tx_bytes() as f64 / flushes as f64
    }

    // ========================================================================
    // UTILITY METHODS
    // ========================================================================

    /// Resets all counters to zero
    pub fn reset(&self) {
        self.tx_bytes.store(0, Ordering::Relaxed);
        self.tx_discarded.store(0, Ordering::Relaxed);
        self.rx_bytes.store(0, Ordering::Relaxed);
        self.threshold_flushes.store(0, Ordering::Relaxed);
        self.idle_flushes.store(0, Ordering::Relaxed);
        self.full_flushes.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
        self.protocol_errors.store(0, Ordering::Relaxed);
        self.interrupts_delivered.store(0, Ordering::Relaxed);
        self.spurious_wakeups.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Instant::now(),
            tx_bytes: self.tx_bytes(),
            rx_bytes: self.rx_bytes(),
            overruns: self.overruns(),
            interrupts_delivered: self.interrupts_delivered(),
        }
    }
}

impl Default for UartMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// METRICS SNAPSHOT
// ============================================================================

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: Instant,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub overruns: u64,
    pub interrupts_delivered: u64,
}

impl MetricsSnapshot {
    pub fn delta(&self, other: &MetricsSnapshot) -> MetricsDelta {
        MetricsDelta {
            duration: self.timestamp.duration_since(other.timestamp),
            tx_bytes: self.tx_bytes.saturating_sub(other.tx_bytes),
            rx_bytes: self.rx_bytes.saturating_sub(other.rx_bytes),
            overruns: self.overruns.saturating_sub(other.overruns),
            interrupts_delivered: self
                .interrupts_delivered
                .saturating_sub(other.interrupts_delivered),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsDelta {
    pub duration: Duration,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub overruns: u64,
    pub interrupts_delivered: u64,
}

// ============================================================================
// DISPLAY IMPLEMENTATION
// ============================================================================

impl fmt::Display for UartMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "UART Metrics:")?;
        writeln!(f, "  Enabled:           {}", self.is_enabled())?;
        writeln!(f, "  TX Bytes:          {}", self.tx_bytes())?;
        writeln!(f, "  TX Discarded:      {}", self.tx_discarded())?;
        writeln!(f, "  RX Bytes:          {}", self.rx_bytes())?;
        writeln!(
            f,
            "  Flushes:           {} threshold, {} idle, {} full",
            self.flushes(FlushReason::Threshold),
            self.flushes(FlushReason::Idle),
            self.flushes(FlushReason::Full)
        )?;
        writeln!(f, "  Avg Flush Size:    {:.2}", self.avg_flush_size())?;
        writeln!(f, "  Overruns:          {}", self.overruns())?;
        writeln!(f, "  Protocol Errors:   {}", self.protocol_errors())?;
        writeln!(f, "  Interrupts:        {}", self.interrupts_delivered())?;
        writeln!(f, "  Spurious Wakeups:  {}", self.spurious_wakeups())
    }
}

// ============================================================================
// TESTS
// ============================================================================
