// tx.rs
//!
//! Transmit side: when bytes queued in the TX FIFO are handed to the
//! consumer, and why.

use tracing::{debug, warn};

use crate::chip::ChipState;
use crate::error::{UartError, UartResult};
use crate::fifo::FIFO_SIZE;
use crate::regs::Lsr;

/// Why the TX FIFO was flushed to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Occupancy reached the consumer's threshold.
    Threshold,
    /// The host masked the TX-empty interrupt with bytes still queued.
    Idle,
    /// The FIFO was full when another byte arrived.
    Full,
}

/// TX consumer: `(line, bytes, reason)`. Runs with the device guard held and
/// must not call back into the same port.
pub type TxCallback = Box<dyn FnMut(u8, &[u8], FlushReason) + Send>;

pub(crate) struct TxBinding {
    callback: TxCallback,
    buffer: [u8; FIFO_SIZE],
    threshold: usize,
}

impl TxBinding {
    pub(crate) fn new(callback: TxCallback, threshold: usize) -> UartResult<Self> {
        if threshold == 0 || threshold > FIFO_SIZE {
            return Err(UartError::InvalidThreshold(threshold));
        }
        Ok(Self {
            callback,
            buffer: [0; FIFO_SIZE],
            threshold,
        })
    }
}

impl ChipState {
    /// A byte written to THR outside loopback.
    pub(crate) fn on_tx_byte(&mut self, byte: u8) {
        self.regs.thr = byte;

        // With nobody to drain into, a full FIFO stays full and the byte
        // below is lost as an overrun.
        if self.tx.is_full() && self.tx_binding.is_some() {
            self.flush_tx(FlushReason::Full);
        }

        if !self.tx.push(byte) {
            self.regs.lsr.insert(Lsr::OE);
            self.metrics.record_overrun();
            warn!(line = self.line(), byte, "TX FIFO overrun, byte dropped");
            return;
        }

        self.regs.lsr.remove(Lsr::TEMT);
        if self.tx.len() >= FIFO_SIZE / 2 {
            self.regs.lsr.remove(Lsr::THRE);
        }

        let threshold_hit = self
            .tx_binding
            .as_ref()
            .is_some_and(|binding| self.tx.len() >= binding.threshold);
        if threshold_hit {
            self.flush_tx(FlushReason::Threshold);
        }
    }

    /// The host stopped asking for TX-empty interrupts; whatever is queued
    /// goes out now.
    pub(crate) fn on_disable_tx_interrupt(&mut self) {
        self.flush_tx(FlushReason::Idle);
    }

    /// Drains the TX FIFO into the bound consumer, or discards it when none
    /// is bound. Leaves the transmitter idle. Returns the number of bytes
    /// taken out of the FIFO.
    pub(crate) fn flush_tx(&mut self, reason: FlushReason) -> usize {
        let line = self.line();

        let (count, delivered) = match self.tx_binding.as_mut() {
            Some(binding) => {
                let count = self.tx.drain_into(&mut binding.buffer);
                (binding.callback)(line, &binding.buffer[..count], reason);
                (count, true)
            }
            None => {
                let count = self.tx.len();
                self.tx.reset();
                (count, false)
            }
        };

        self.regs.lsr.insert(Lsr::THRE | Lsr::TEMT);
        self.metrics.record_flush(reason, count, delivered);
        debug!(line, ?reason, count, delivered, "TX flush");
        count
    }

    /// Binds or unbinds the TX consumer.
    pub(crate) fn set_tx_binding(&mut self, binding: Option<TxBinding>) {
        debug!(line = self.line(), bound = binding.is_some(), "TX callback changed");
        self.tx_binding = binding;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::tests::chip;
    use crate::regs::*;
    use std::sync::{Arc, Mutex};

    type Flushes = Arc<Mutex<Vec<(u8, Vec<u8>, FlushReason)>>>;

    fn bind(chip: &mut ChipState, threshold: usize) -> Flushes {
        let flushes: Flushes = Arc::default();
        let sink = flushes.clone();
        let binding = TxBinding::new(
            Box::new(move |line: u8, bytes: &[u8], reason: FlushReason| {
                sink.lock().unwrap().push((line, bytes.to_vec(), reason));
            }),
            threshold,
        )
        .unwrap();
        chip.set_tx_binding(Some(binding));
        flushes
    }

    #[test]
    fn test_threshold_validation() {
        assert!(matches!(
            TxBinding::new(Box::new(|_, _, _| {}), 0),
            Err(UartError::InvalidThreshold(0))
        ));
        assert!(matches!(
            TxBinding::new(Box::new(|_, _, _| {}), FIFO_SIZE + 1),
            Err(UartError::InvalidThreshold(17))
        ));
        assert!(TxBinding::new(Box::new(|_, _, _| {}), FIFO_SIZE).is_ok());
    }

    #[test]
    fn test_tx_round_trip_in_order_once() {
        let mut chip = chip();
        let flushes = bind(&mut chip, FIFO_SIZE);

        let payload = b"0123456789";
        for &b in payload {
            chip.write(UART_TX, b).unwrap();
        }
        assert!(flushes.lock().unwrap().is_empty());

        assert_eq!(chip.flush_tx(FlushReason::Idle), payload.len());
        let flushes = flushes.lock().unwrap();
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0], (0, payload.to_vec(), FlushReason::Idle));
        assert!(chip.tx.is_empty());
    }

    #[test]
    fn test_threshold_beats_full() {
        let mut chip = chip();
        let flushes = bind(&mut chip, FIFO_SIZE);

        for b in 0..FIFO_SIZE as u8 {
            chip.write(UART_TX, b).unwrap();
        }

        let flushes = flushes.lock().unwrap();
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].2, FlushReason::Threshold);
        assert_eq!(flushes[0].1, (0..FIFO_SIZE as u8).collect::<Vec<_>>());
        assert_eq!(chip.metrics.flushes(FlushReason::Full), 0);
    }

    #[test]
    fn test_seventeenth_byte_without_consumer_overruns() {
        let mut chip = chip();

        for b in 0..=FIFO_SIZE as u8 {
            chip.write(UART_TX, b).unwrap();
        }

        assert_eq!(chip.tx.len(), FIFO_SIZE);
        assert!(chip.regs.lsr.contains(Lsr::OE));
        assert_eq!(chip.metrics.overruns(), 1);
        assert_eq!(chip.regs.thr, FIFO_SIZE as u8);
    }

    #[test]
    fn test_full_flush_when_threshold_not_reached() {
        let mut chip = chip();
        let flushes = bind(&mut chip, FIFO_SIZE);
        // Queue behind the consumer's back so the threshold never fires.
        for b in 0..FIFO_SIZE as u8 {
            chip.tx.push(b);
        }

        chip.write(UART_TX, 0xEE).unwrap();

        let flushes = flushes.lock().unwrap();
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].2, FlushReason::Full);
        assert_eq!(flushes[0].1.len(), FIFO_SIZE);
        assert_eq!(chip.tx.len(), 1);
        assert!(!chip.regs.lsr.contains(Lsr::OE));
    }

    #[test]
    fn test_threshold_flush_resets_line_status() {
        let mut chip = chip();
        let flushes = bind(&mut chip, 4);

        for &b in b"abcdefgh" {
            chip.write(UART_TX, b).unwrap();
        }

        let flushes = flushes.lock().unwrap();
        assert_eq!(flushes.len(), 2);
        assert_eq!(flushes[0].1, b"abcd");
        assert_eq!(flushes[1].1, b"efgh");
        assert!(flushes.iter().all(|f| f.2 == FlushReason::Threshold));
        assert!(chip.regs.lsr.contains(Lsr::THRE | Lsr::TEMT));
    }

    #[test]
    fn test_holding_register_empty_hysteresis() {
        let mut chip = chip();

        chip.write(UART_TX, 1).unwrap();
        assert!(!chip.regs.lsr.contains(Lsr::TEMT));
        assert!(chip.regs.lsr.contains(Lsr::THRE));

        for b in 2..=(FIFO_SIZE / 2) as u8 {
            chip.write(UART_TX, b).unwrap();
        }
        assert_eq!(chip.tx.len(), FIFO_SIZE / 2);
        assert!(!chip.regs.lsr.contains(Lsr::THRE));
    }

    #[test]
    fn test_masking_tx_interrupt_flushes_idle() {
        let mut chip = chip();
        let flushes = bind(&mut chip, FIFO_SIZE);

        chip.write(UART_IER, Ier::THRI.bits()).unwrap();
        chip.write(UART_TX, b'x').unwrap();
        chip.write(UART_TX, b'y').unwrap();
        chip.write(UART_IER, 0).unwrap();

        let flushes = flushes.lock().unwrap();
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0], (0, b"xy".to_vec(), FlushReason::Idle));
        assert_eq!(chip.regs.ier, Ier::empty());
    }

    #[test]
    fn test_masking_tx_interrupt_with_empty_fifo_does_not_flush() {
        let mut chip = chip();
        let flushes = bind(&mut chip, FIFO_SIZE);

        chip.write(UART_IER, Ier::THRI.bits()).unwrap();
        chip.write(UART_IER, 0).unwrap();
        assert!(flushes.lock().unwrap().is_empty());
        assert_eq!(chip.metrics.flushes(FlushReason::Idle), 0);
    }

    #[test]
    fn test_flush_without_consumer_discards() {
        let mut chip = chip();
        for &b in b"lost" {
            chip.write(UART_TX, b).unwrap();
        }
        assert_eq!(chip.flush_tx(FlushReason::Idle), 4);
        assert!(chip.tx.is_empty());
        assert!(chip.regs.lsr.contains(Lsr::THRE | Lsr::TEMT));
        assert_eq!(chip.metrics.tx_discarded(), 4);
        assert_eq!(chip.metrics.tx_bytes(), 0);
    }

    #[test]
    fn test_rebinding_consumer() {
        let mut chip = chip();
        let first = bind(&mut chip, 1);
        chip.write(UART_TX, b'a').unwrap();

        let second = bind(&mut chip, 1);
        chip.write(UART_TX, b'b').unwrap();

        chip.set_tx_binding(None);
        chip.write(UART_TX, b'c').unwrap();

        assert_eq!(first.lock().unwrap().len(), 1);
        assert_eq!(second.lock().unwrap()[0].1, b"b");
        assert_eq!(chip.tx.len(), 1);
    }
}
