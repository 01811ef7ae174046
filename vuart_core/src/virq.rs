// virq.rs
//!
//! Virtual interrupt delivery.
//!
//! There is no interrupt line between the emulated chip and the host, so a
//! worker thread per port stands in for one: it sleeps on the port's
//! condition variable until `recompute` reports a pending interrupt (or a
//! stop is requested), then calls the host's interrupt entry point with the
//! current IIR value. The call is made without the device guard held.

use std::sync::{Arc, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, trace, warn};

use crate::error::{UartError, UartResult};
use crate::host::InterruptSink;
use crate::irq::{compute_iir, is_pending};
use crate::metrics::UartMetrics;
use crate::uart::{Shared, Uart};

/// Worker bookkeeping kept inside the chip state, under the device guard.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct VirqState {
    pub(crate) enabled: bool,
    /// Set by `recompute` when an interrupt pends, consumed by the worker.
    pub(crate) signaled: bool,
    pub(crate) stop: bool,
}

pub(crate) enum Wakeup {
    Stop,
    Spurious,
    Deliver {
        iir: u8,
        sink: Option<Arc<dyn InterruptSink>>,
    },
}

impl Uart {
    pub fn enable_virtual_irq(&self) -> UartResult<()> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            return Err(UartError::VirqAlreadyEnabled(self.line()));
        }

        {
            let mut chip = self.lock();
            if !chip.initialized {
                return Err(UartError::NotInitialized(self.line()));
            }
            chip.virq = VirqState {
                enabled: true,
                ..VirqState::default()
            };
            // Arms the worker right away if something is already pending.
            chip.recompute();
        }

        match spawn(self.shared.clone(), self.metrics.clone(), self.line()) {
            Ok(handle) => *worker = Some(handle),
            Err(err) => {
                self.lock().virq = VirqState::default();
                return Err(err);
            }
        }

        info!(line = self.line(), "virtual IRQ enabled");
        Ok(())
    }

    /// Stops the worker and waits for it. No interrupt is delivered for this
    /// port once this returns.
    pub fn disable_virtual_irq(&self) -> UartResult<()> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = worker
            .take()
            .ok_or(UartError::VirqNotEnabled(self.line()))?;

        let joined = self.stop_worker(handle);
        info!(line = self.line(), "virtual IRQ disabled");
        joined.map_err(|_| UartError::WorkerPanicked(self.line()))
    }

    pub fn virtual_irq_enabled(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn stop_worker(&self, handle: JoinHandle<()>) -> thread::Result<()> {
        {
            let mut chip = self.lock();
            chip.virq.stop = true;
            self.shared.irq_cv.notify_all();
        }

        // The last handle can be dropped by the host from inside its own
        // interrupt handler. The worker sees `stop` on its next wait.
        if handle.thread().id() == thread::current().id() {
            return Ok(());
        }
        let joined = handle.join();
        self.lock().virq = VirqState::default();
        joined
    }
}

impl Drop for Uart {
    fn drop(&mut self) {
        let handle = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if self.stop_worker(handle).is_err() {
                warn!(line = self.line(), "virtual IRQ worker panicked");
            }
            debug!(line = self.line(), "virtual IRQ stopped on drop");
        }
    }
}

impl Shared {
    /// Blocks until an interrupt is signaled or a stop is requested. The
    /// guard is released while waiting.
    pub(crate) fn wait_for_interrupt(&self) -> Wakeup {
        let chip = self.lock();
        let mut chip = self
            .irq_cv
            .wait_while(chip, |chip| !chip.virq.signaled && !chip.virq.stop)
            .unwrap_or_else(PoisonError::into_inner);

        if chip.virq.stop {
            return Wakeup::Stop;
        }
        chip.virq.signaled = false;

        let iir = chip.regs.iir;
        debug_assert_eq!(
            iir,
            compute_iir(&chip.regs),
            "IIR captured without a recompute after the last mutation"
        );
        if !is_pending(iir) {
            return Wakeup::Spurious;
        }
        Wakeup::Deliver {
            iir,
            sink: chip.host.clone(),
        }
    }
}

/// The worker owns the chip state and condvar, never the `Uart`, so the
/// device can be dropped while the worker sleeps.
fn spawn(shared: Arc<Shared>, metrics: Arc<UartMetrics>, line: u8) -> UartResult<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("vuart-virq{}", line))
        .spawn(move || run(shared, metrics, line))
        .map_err(UartError::WorkerSpawn)
}

fn run(shared: Arc<Shared>, metrics: Arc<UartMetrics>, line: u8) {
    debug!(line, "virtual IRQ worker started");

    loop {
        match shared.wait_for_interrupt() {
            Wakeup::Stop => break,
            Wakeup::Spurious => {
                metrics.record_spurious_wakeup();
                trace!(line, "woken with nothing pending");
            }
            Wakeup::Deliver { iir, sink: None } => {
                debug!(line, iir, "interrupt pending but no host port attached yet");
            }
            Wakeup::Deliver {
                iir,
                sink: Some(sink),
            } => {
                trace!(line, iir, "delivering virtual interrupt");
                sink.deliver(line, iir);
                metrics.record_interrupt();
            }
        }
    }

    debug!(line, "virtual IRQ worker terminated");
}

// ============================================================================
// TESTS
// ============================================================================
