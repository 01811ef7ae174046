// ports.rs
//!
//! Line-number keyed table of emulated ports and their lifecycle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::error::{UartError, UartResult};
use crate::host::{HostRegistrar, PortInfo, PortIo};
use crate::metrics::UartMetrics;
use crate::tx::TxCallback;
use crate::uart::Uart;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Number of lines the emulator can provide.
pub const MAX_LINES: usize = 4;

/// Baud base of a PC UART clocked at 1.8432 MHz.
pub const BAUD_BASE: u32 = 115_200;

/// Standard PC/AT (I/O base, IRQ) per line.
const LEGACY_PORTS: [(u16, u32); MAX_LINES] = [
    (0x3F8, 4), // COM1
    (0x2F8, 3), // COM2
    (0x3E8, 4), // COM3
    (0x2E8, 3), // COM4
];

pub fn port_info(line: u8) -> UartResult<PortInfo> {
    let (iobase, irq) = *LEGACY_PORTS
        .get(line as usize)
        .ok_or(UartError::InvalidLine(line))?;
    Ok(PortInfo {
        line,
        iobase,
        irq,
        baud_base: BAUD_BASE,
    })
}

// ============================================================================
// PORT TABLE
// ============================================================================

#[derive(Clone, Default)]
enum Slot {
    #[default]
    Free,
    Live(Arc<Uart>),
    /// Being torn down. The line stays taken until the host side is gone.
    Removing,
}

type Slots = Option<Vec<Slot>>;

pub struct PortTable {
    registrar: Arc<dyn HostRegistrar>,
    /// Allocated on the first `add`, dropped after the last `remove`.
    slots: Mutex<Slots>,
    metrics_enabled: bool,
}

impl PortTable {
    pub fn new(registrar: Arc<dyn HostRegistrar>) -> Self {
        Self {
            registrar,
            slots: Mutex::new(None),
            metrics_enabled: true,
        }
    }

    /// Ports added from now on record no metrics.
    pub fn without_metrics(mut self) -> Self {
        self.metrics_enabled = false;
        self
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates, resets and registers the port for `line`.
    pub fn add(&self, line: u8) -> UartResult<Arc<Uart>> {
        let info = port_info(line)?;
        let mut slots = self.slots();

        let occupied = slots
            .as_ref()
            .is_some_and(|table| !matches!(table[line as usize], Slot::Free));
        if occupied {
            return Err(UartError::AlreadyInitialized(line));
        }

        let metrics = if self.metrics_enabled {
            UartMetrics::new()
        } else {
            UartMetrics::disabled()
        };
        let uart = Uart::with_metrics(info, metrics);

        // Nothing is stored before the host accepted the port.
        let io: Arc<dyn PortIo> = uart.clone();
        self.registrar.register(info, io)?;
        uart.set_registered(true);

        let table = slots.get_or_insert_with(|| {
            debug!("allocating port table");
            vec![Slot::Free; MAX_LINES]
        });
        table[line as usize] = Slot::Live(uart.clone());

        let iobase = format!("{:#x}", info.iobase);
        info!(line, iobase = %iobase, irq = info.irq, "virtual UART added");
        Ok(uart)
    }

    /// Tears the port down: virtual IRQ worker first, then the host side,
    /// then the chip state. The line cannot be added again until this
    /// returns.
    pub fn remove(&self, line: u8) -> UartResult<()> {
        let info = port_info(line)?;

        let uart = {
            let mut slots = self.slots();
            let slot = slots
                .as_mut()
                .map(|table| &mut table[line as usize])
                .ok_or(UartError::NotInitialized(line))?;
            match std::mem::replace(slot, Slot::Removing) {
                Slot::Live(uart) => uart,
                other => {
                    *slot = other;
                    return Err(UartError::NotInitialized(line));
                }
            }
        };

        let mut result = Ok(());
        if uart.virtual_irq_enabled() {
            if let Err(err) = uart.disable_virtual_irq() {
                warn!(line, %err, "virtual IRQ teardown failed");
                result = Err(err);
            }
        }

        uart.set_registered(false);
        if let Err(err) = self.registrar.unregister(info) {
            warn!(line, %err, "host unregistration failed");
            if result.is_ok() {
                result = Err(err);
            }
        }

        uart.release();

        let mut slots = self.slots();
        if let Some(table) = slots.as_mut() {
            table[line as usize] = Slot::Free;
            if table.iter().all(|slot| matches!(slot, Slot::Free)) {
                debug!("last port removed, releasing port table");
                *slots = None;
            }
        }
        drop(slots);

        info!(line, "virtual UART removed");
        result
    }

    pub fn get(&self, line: u8) -> UartResult<Arc<Uart>> {
        port_info(line)?;
        match self.slots().as_ref().map(|table| &table[line as usize]) {
            Some(Slot::Live(uart)) => Ok(uart.clone()),
            _ => Err(UartError::NotInitialized(line)),
        }
    }

    /// Lines whose port is live.
    pub fn lines(&self) -> Vec<u8> {
        match self.slots().as_ref() {
            Some(table) => table
                .iter()
                .enumerate()
                .filter(|(_, slot)| matches!(slot, Slot::Live(_)))
                .map(|(line, _)| line as u8)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.slots().is_some()
    }

    // ========================================================================
    // LINE-ADDRESSED OPERATIONS
    // ========================================================================

    pub fn read(&self, line: u8, offset: u8) -> UartResult<u8> {
        self.get(line)?.read(offset)
    }

    pub fn write(&self, line: u8, offset: u8, value: u8) -> UartResult<()> {
        self.get(line)?.write(offset, value)
    }

    pub fn inject(&self, line: u8, bytes: &[u8]) -> UartResult<usize> {
        self.get(line)?.inject(bytes)
    }

    pub fn set_tx_callback(
        &self,
        line: u8,
        callback: Option<TxCallback>,
        threshold: usize,
    ) -> UartResult<()> {
        self.get(line)?.set_tx_callback(callback, threshold)
    }

    pub fn enable_virtual_irq(&self, line: u8) -> UartResult<()> {
        self.get(line)?.enable_virtual_irq()
    }

    pub fn disable_virtual_irq(&self, line: u8) -> UartResult<()> {
        self.get(line)?.disable_virtual_irq()
    }
}

impl Drop for PortTable {
    fn drop(&mut self) {
        for line in self.lines() {
            if let Err(err) = self.remove(line) {
                warn!(line, %err, "port teardown on drop failed");
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::{RecordingRegistrar, RecordingSink};
    use crate::regs::*;
    use crate::tx::FlushReason;
    use std::time::{Duration, Instant};

    fn table() -> (PortTable, Arc<RecordingRegistrar>) {
        let registrar = Arc::new(RecordingRegistrar::default());
        (PortTable::new(registrar.clone()), registrar)
    }

    #[test]
    fn test_port_identity() {
        let com2 = port_info(1).unwrap();
        assert_eq!(com2.iobase, 0x2F8);
        assert_eq!(com2.irq, 3);
        assert_eq!(com2.baud_base, 115_200);
        assert!(matches!(port_info(4), Err(UartError::InvalidLine(4))));
    }

    #[test]
    fn test_add_registers_with_host() {
        let (table, registrar) = table();
        assert!(!table.is_allocated());

        let uart = table.add(0).unwrap();
        assert!(table.is_allocated());
        assert!(uart.snapshot().registered);
        assert!(uart.snapshot().initialized);
        assert_eq!(table.lines(), vec![0]);

        let registered = registrar.registered.lock().unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].0.iobase, 0x3F8);
        // The host drives the chip through the handle it was given.
        assert_eq!(registered[0].1.serial_in(UART_LSR), 0x60);
    }

    #[test]
    fn test_lifecycle_errors() {
        let (table, _) = table();
        assert!(matches!(table.add(7), Err(UartError::InvalidLine(7))));
        assert!(matches!(table.remove(1), Err(UartError::NotInitialized(1))));
        assert!(matches!(table.read(1, UART_LSR), Err(UartError::NotInitialized(1))));

        table.add(1).unwrap();
        assert!(matches!(table.add(1), Err(UartError::AlreadyInitialized(1))));
        assert!(matches!(
            table.disable_virtual_irq(1),
            Err(UartError::VirqNotEnabled(1))
        ));
        table.enable_virtual_irq(1).unwrap();
        assert!(matches!(
            table.enable_virtual_irq(1),
            Err(UartError::VirqAlreadyEnabled(1))
        ));
        table.remove(1).unwrap();
        assert!(matches!(table.remove(1), Err(UartError::NotInitialized(1))));
    }

    #[test]
    fn test_failed_registration_leaves_table_unchanged() {
        let (table, registrar) = table();
        *registrar.fail_next.lock().unwrap() = true;

        assert!(matches!(table.add(2), Err(UartError::Registration(_))));
        assert!(!table.is_allocated());
        assert!(table.lines().is_empty());

        table.add(2).unwrap();
        assert_eq!(table.lines(), vec![2]);
    }

    #[test]
    fn test_table_released_after_last_remove() {
        let (table, registrar) = table();
        table.add(0).unwrap();
        table.add(3).unwrap();
        assert_eq!(table.lines(), vec![0, 3]);

        table.remove(0).unwrap();
        assert!(table.is_allocated());
        table.remove(3).unwrap();
        assert!(!table.is_allocated());
        assert!(registrar.registered.lock().unwrap().is_empty());
    }

    #[test]
    fn test_remove_tears_down_in_order() {
        let (table, _) = table();
        let uart = table.add(0).unwrap();
        let sink = Arc::new(RecordingSink::default());
        uart.attach_host(sink);
        table
            .set_tx_callback(0, Some(Box::new(|_, _, _| {})), 8)
            .unwrap();
        table.enable_virtual_irq(0).unwrap();

        table.remove(0).unwrap();

        let snap = uart.snapshot();
        assert!(!uart.virtual_irq_enabled());
        assert!(!snap.initialized);
        assert!(!snap.registered);
        assert!(!snap.tx_bound);
        assert!(!snap.host_attached);
        // A stale handle is refused rather than resurrecting the port.
        assert!(matches!(uart.read(UART_LSR), Err(UartError::NotInitialized(0))));
        assert_eq!(uart.inject(b"x").unwrap_or(0), 0);
    }

    #[test]
    fn test_injection_requires_live_port() {
        let (table, _) = table();
        assert!(matches!(table.inject(0, b"a"), Err(UartError::NotInitialized(0))));

        table.add(0).unwrap();
        assert_eq!(table.inject(0, b"abc").unwrap(), 3);
        assert_eq!(table.read(0, UART_RX).unwrap(), b'a');
    }

    #[test]
    fn test_line_addressed_tx_path() {
        let (table, _) = table();
        table.add(1).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        table
            .set_tx_callback(
                1,
                Some(Box::new(move |line: u8, bytes: &[u8], reason: FlushReason| {
                    tx.send((line, bytes.to_vec(), reason)).unwrap();
                })),
                2,
            )
            .unwrap();

        table.write(1, UART_TX, b'o').unwrap();
        table.write(1, UART_TX, b'k').unwrap();
        assert_eq!(rx.try_recv().unwrap(), (1, b"ok".to_vec(), FlushReason::Threshold));
    }

    #[test]
    fn test_drop_tears_everything_down() {
        let registrar = Arc::new(RecordingRegistrar::default());
        let uart = {
            let table = PortTable::new(registrar.clone());
            let uart = table.add(0).unwrap();
            table.enable_virtual_irq(0).unwrap();
            uart
        };

        assert!(!uart.virtual_irq_enabled());
        assert!(!uart.snapshot().initialized);
        assert!(registrar.registered.lock().unwrap().is_empty());
    }

    #[test]
    fn test_virtual_irq_through_table() {
        let (table, _) = table();
        let uart = table.add(0).unwrap();
        let sink = Arc::new(RecordingSink::default());
        uart.attach_host(sink.clone());
        table.enable_virtual_irq(0).unwrap();

        table.write(0, UART_IER, Ier::RLSI.bits()).unwrap();
        uart.signal_break().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.delivered.lock().unwrap().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        table.disable_virtual_irq(0).unwrap();

        assert_eq!(
            sink.delivered.lock().unwrap()[0],
            (0, IIR_FIFO_ENABLED | IIR_RLSI)
        );
    }

    /// Host that tries to bring the line back while it is being
    /// unregistered.
    #[derive(Default)]
    struct ReaddingRegistrar {
        inner: RecordingRegistrar,
        table: Mutex<std::sync::Weak<PortTable>>,
        readd: Mutex<Option<UartResult<()>>>,
    }

    impl HostRegistrar for ReaddingRegistrar {
        fn register(&self, info: PortInfo, io: Arc<dyn PortIo>) -> UartResult<()> {
            self.inner.register(info, io)
        }

        fn unregister(&self, info: PortInfo) -> UartResult<()> {
            self.inner.unregister(info)?;
            let table = self.table.lock().unwrap().upgrade();
            if let Some(table) = table {
                let result = table.add(info.line).map(|_| ());
                *self.readd.lock().unwrap() = Some(result);
            }
            Ok(())
        }
    }

    #[test]
    fn test_add_during_remove_is_refused() {
        let registrar = Arc::new(ReaddingRegistrar::default());
        let table = Arc::new(PortTable::new(registrar.clone()));
        *registrar.table.lock().unwrap() = Arc::downgrade(&table);

        table.add(0).unwrap();
        assert!(matches!(table.get(0), Ok(_)));
        table.remove(0).unwrap();

        assert!(matches!(
            registrar.readd.lock().unwrap().take(),
            Some(Err(UartError::AlreadyInitialized(0)))
        ));
        // table and host agree: the line is gone on both sides
        assert!(table.lines().is_empty());
        assert!(!table.is_allocated());
        assert!(registrar.inner.registered.lock().unwrap().is_empty());

        *registrar.table.lock().unwrap() = std::sync::Weak::new();
        table.add(0).unwrap();
        assert_eq!(table.lines(), vec![0]);
        assert_eq!(registrar.inner.registered.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_removing_line_is_not_addressable() {
        let (table, _) = table();
        table.add(2).unwrap();
        {
            let mut slots = table.slots();
            slots.as_mut().unwrap()[2] = Slot::Removing;
        }
        assert!(matches!(table.get(2), Err(UartError::NotInitialized(2))));
        assert!(matches!(table.remove(2), Err(UartError::NotInitialized(2))));
        assert!(matches!(table.add(2), Err(UartError::AlreadyInitialized(2))));
        assert!(table.lines().is_empty());
        assert!(table.is_allocated());
    }

    #[test]
    fn test_metrics_can_be_disabled() {
        let registrar = Arc::new(RecordingRegistrar::default());
        let table = PortTable::new(registrar).without_metrics();
        let uart = table.add(0).unwrap();
        uart.inject(b"abc").unwrap();
        assert_eq!(uart.metrics().rx_bytes(), 0);
    }
}
