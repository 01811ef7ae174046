// uart.rs
//!
//! One emulated port: the chip state behind its guard, plus the condition
//! variable the virtual IRQ worker sleeps on.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::chip::{ChipSnapshot, ChipState};
use crate::error::{UartError, UartResult};
use crate::host::{InterruptSink, PortInfo, PortIo};
use crate::metrics::UartMetrics;
use crate::tx::{FlushReason, TxBinding, TxCallback};

/// What the virtual IRQ worker shares with its device: the chip state and
/// the condition variable, nothing that keeps the `Uart` itself alive.
pub(crate) struct Shared {
    pub(crate) state: Mutex<ChipState>,
    /// Signaled by `ChipState::recompute` (via `with_chip`) and by stop
    /// requests.
    pub(crate) irq_cv: Condvar,
}

impl Shared {
    // A panic inside a TX callback must not wedge the port for good; the
    // chip state is consistent between transitions.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ChipState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Uart {
    pub(crate) info: PortInfo,
    pub(crate) shared: Arc<Shared>,
    pub(crate) worker: Mutex<Option<JoinHandle<()>>>,
    pub(crate) metrics: Arc<UartMetrics>,
}

impl Uart {
    pub fn new(info: PortInfo) -> Arc<Self> {
        Self::with_metrics(info, UartMetrics::new())
    }

    pub fn with_metrics(info: PortInfo, metrics: UartMetrics) -> Arc<Self> {
        let metrics = Arc::new(metrics);
        Arc::new(Self {
            info,
            shared: Arc::new(Shared {
                state: Mutex::new(ChipState::new(info, metrics.clone())),
                irq_cv: Condvar::new(),
            }),
            worker: Mutex::new(None),
            metrics,
        })
    }

    #[inline]
    pub fn info(&self) -> PortInfo {
        self.info
    }

    #[inline]
    pub fn line(&self) -> u8 {
        self.info.line
    }

    pub fn metrics(&self) -> &UartMetrics {
        &self.metrics
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ChipState> {
        self.shared.lock()
    }

    /// Runs one transition under the guard and wakes the worker if the
    /// transition left an interrupt pending.
    fn with_chip<R>(&self, f: impl FnOnce(&mut ChipState) -> R) -> R {
        let mut chip = self.lock();
        let out = f(&mut chip);
        if chip.virq.signaled {
            self.shared.irq_cv.notify_one();
        }
        out
    }

    // ========================================================================
    // REGISTER ACCESS
    // ========================================================================

    pub fn read(&self, offset: u8) -> UartResult<u8> {
        self.with_chip(|chip| chip.read(offset))
    }

    pub fn write(&self, offset: u8, value: u8) -> UartResult<()> {
        self.with_chip(|chip| chip.write(offset, value))
    }

    // ========================================================================
    // DATA PATHS
    // ========================================================================

    /// Pushes bytes into RX as if they arrived on the wire. Returns how many
    /// were accepted; 0 when the port is not live, in loopback, or full.
    pub fn inject(&self, bytes: &[u8]) -> UartResult<usize> {
        self.with_chip(|chip| chip.inject(bytes))
    }

    pub fn signal_break(&self) -> UartResult<bool> {
        self.with_chip(|chip| chip.signal_break())
    }

    pub fn flush_tx(&self, reason: FlushReason) -> usize {
        self.with_chip(|chip| {
            let n = chip.flush_tx(reason);
            chip.recompute();
            n
        })
    }

    /// Binds (`Some`) or unbinds (`None`) the TX consumer. `threshold` is
    /// ignored when unbinding.
    pub fn set_tx_callback(&self, callback: Option<TxCallback>, threshold: usize) -> UartResult<()> {
        let binding = callback
            .map(|cb| TxBinding::new(cb, threshold))
            .transpose()?;
        self.with_chip(|chip| {
            if !chip.initialized {
                return Err(UartError::NotInitialized(chip.line()));
            }
            chip.set_tx_binding(binding);
            Ok(())
        })
    }

    pub fn reset(&self) {
        self.with_chip(|chip| chip.reset())
    }

    // ========================================================================
    // HOST ATTACHMENT
    // ========================================================================

    /// The host captured its port: interrupts can be delivered from now on.
    pub fn attach_host(&self, sink: Arc<dyn InterruptSink>) {
        self.with_chip(|chip| {
            chip.host = Some(sink);
            // Whatever was pending before the host showed up is due now.
            chip.recompute();
        });
        debug!(line = self.line(), "host port attached");
    }

    pub fn detach_host(&self) {
        self.with_chip(|chip| chip.host = None);
        debug!(line = self.line(), "host port detached");
    }

    pub(crate) fn set_registered(&self, registered: bool) {
        self.with_chip(|chip| chip.registered = registered);
    }

    pub(crate) fn release(&self) {
        self.with_chip(|chip| chip.release());
    }

    pub fn snapshot(&self) -> ChipSnapshot {
        self.lock().snapshot()
    }
}

impl PortIo for Uart {
    fn serial_in(&self, offset: u8) -> u8 {
        match self.read(offset) {
            Ok(val) => val,
            Err(err) => {
                if !err.is_bug() {
                    warn!(line = self.line(), offset, %err, "serial_in refused");
                }
                0
            }
        }
    }

    fn serial_out(&self, offset: u8, value: u8) {
        if let Err(err) = self.write(offset, value) {
            if !err.is_bug() {
                warn!(line = self.line(), offset, value, %err, "serial_out refused");
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
