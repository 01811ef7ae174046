// chip.rs
//!
//! Unsynchronized chip state and the register read/write transition
//! function. Every public transition ends in [`ChipState::recompute`], so
//! the interrupt identification register is never observed stale. The
//! owning [`crate::uart::Uart`] provides the guard.

use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::error::{UartError, UartResult};
use crate::fifo::{Fifo, FIFO_SIZE};
use crate::host::{InterruptSink, PortInfo};
use crate::metrics::UartMetrics;
use crate::regs::{Fcr, Ier, Lcr, Lsr, Mcr, Register, RegisterBank};
use crate::tx::TxBinding;
use crate::virq::VirqState;

// ============================================================================
// CHIP STATE
// ============================================================================

pub struct ChipState {
    pub(crate) info: PortInfo,
    pub(crate) regs: RegisterBank,
    pub(crate) rx: Fifo,
    pub(crate) tx: Fifo,

    pub(crate) initialized: bool,
    pub(crate) registered: bool,

    pub(crate) tx_binding: Option<TxBinding>,
    /// Interrupt entry point of the host port, once the host captured it.
    pub(crate) host: Option<Arc<dyn InterruptSink>>,
    pub(crate) virq: VirqState,

    pub(crate) metrics: Arc<UartMetrics>,
}

/// Point-in-time copy of a chip, for inspection and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipSnapshot {
    pub info: PortInfo,
    pub regs: RegisterBank,
    pub rx_len: usize,
    pub tx_len: usize,
    pub initialized: bool,
    pub registered: bool,
    pub tx_bound: bool,
    pub host_attached: bool,
    pub virq_enabled: bool,
}

impl ChipState {
    pub(crate) fn new(info: PortInfo, metrics: Arc<UartMetrics>) -> Self {
        let mut chip = Self {
            info,
            regs: RegisterBank::new(),
            rx: Fifo::new(),
            tx: Fifo::new(),
            initialized: true,
            registered: false,
            tx_binding: None,
            host: None,
            virq: VirqState::default(),
            metrics,
        };
        chip.reset();
        chip
    }

    #[inline]
    pub(crate) fn line(&self) -> u8 {
        self.info.line
    }

    /// Back to power-on values. FIFO contents are discarded, bindings to the
    /// host and the TX consumer are kept.
    pub(crate) fn reset(&mut self) {
        self.regs.reset();
        self.rx.reset();
        self.tx.reset();
        self.recompute();
    }

    /// Drops everything a removed line must not keep.
    pub(crate) fn release(&mut self) {
        self.tx_binding = None;
        self.host = None;
        self.registered = false;
        self.rx.reset();
        self.tx.reset();
        self.initialized = false;
    }

    pub(crate) fn snapshot(&self) -> ChipSnapshot {
        ChipSnapshot {
            info: self.info,
            regs: self.regs,
            rx_len: self.rx.len(),
            tx_len: self.tx.len(),
            initialized: self.initialized,
            registered: self.registered,
            tx_bound: self.tx_binding.is_some(),
            host_attached: self.host.is_some(),
            virq_enabled: self.virq.enabled,
        }
    }

    fn ensure_initialized(&self) -> UartResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(UartError::NotInitialized(self.line()))
        }
    }

    fn report(&self, offset: u8, err: &UartError) {
        if err.is_bug() {
            self.metrics.record_protocol_error();
            error!(line = self.line(), offset, %err, "UART transition table gap");
        }
    }

    // ========================================================================
    // REGISTER READ
    // ========================================================================

    pub(crate) fn read(&mut self, offset: u8) -> UartResult<u8> {
        self.ensure_initialized()?;

        let result = self.dispatch_read(offset);
        self.recompute();

        match &result {
            Ok(val) => trace!(line = self.line(), offset, val, "serial_in"),
            Err(err) => self.report(offset, err),
        }
        result
    }

    fn dispatch_read(&mut self, offset: u8) -> UartResult<u8> {
        let val = match Register::for_read(offset, self.regs.is_dlab())? {
            Register::DivisorLow => self.regs.dll,
            Register::DivisorHigh => self.regs.dlm,
            Register::RecvHold => self.read_rx(),
            Register::IntrEnable => self.regs.ier.bits(),
            Register::IntrIdent => {
                let val = self.regs.iir;
                self.regs.lsr.remove(Lsr::OE);
                val
            }
            Register::LineCtrl => self.regs.lcr.bits(),
            Register::ModemCtrl => self.regs.mcr.bits(),
            Register::LineStatus => {
                let val = self.regs.lsr.bits();
                self.regs.lsr.remove(Lsr::OE);
                val
            }
            Register::ModemStatus => self.regs.modem_status(),
            Register::Scratch => self.regs.scr,
            Register::TransmitHold | Register::FifoCtrl => {
                return Err(UartError::UndefinedRegister { offset })
            }
        };
        Ok(val)
    }

    fn read_rx(&mut self) -> u8 {
        // A break reads as a single NUL character.
        if self.regs.lsr.contains(Lsr::BI) {
            self.regs.lsr.remove(Lsr::BI);
            return 0;
        }

        if !self.regs.lsr.contains(Lsr::DR) {
            return 0;
        }

        match self.rx.pop() {
            Some(byte) => {
                self.regs.rbr = byte;
                self.regs.lsr.remove(Lsr::BRK_ERROR_BITS);
                if self.rx.is_empty() {
                    self.regs.lsr.remove(Lsr::DR);
                }
                byte
            }
            None => {
                self.regs.lsr.remove(Lsr::DR);
                0
            }
        }
    }

    // ========================================================================
    // REGISTER WRITE
    // ========================================================================

    pub(crate) fn write(&mut self, offset: u8, value: u8) -> UartResult<()> {
        self.ensure_initialized()?;

        let result = self.dispatch_write(offset, value);
        self.recompute();

        match &result {
            Ok(()) => trace!(line = self.line(), offset, value, "serial_out"),
            Err(err) => self.report(offset, err),
        }
        result
    }

    fn dispatch_write(&mut self, offset: u8, value: u8) -> UartResult<()> {
        match Register::for_write(offset, self.regs.is_dlab())? {
            Register::DivisorLow => self.regs.dll = value,
            Register::DivisorHigh => self.regs.dlm = value,
            Register::TransmitHold => {
                if self.regs.is_loopback() {
                    self.regs.thr = value;
                    self.receive_byte(value);
                } else {
                    self.on_tx_byte(value);
                }
            }
            Register::IntrEnable => self.write_ier(value),
            Register::FifoCtrl => self.write_fcr(value),
            Register::LineCtrl => self.regs.lcr = Lcr::from_bits_retain(value),
            Register::ModemCtrl => self.regs.mcr = Mcr::from_bits_truncate(value),
            Register::Scratch => self.regs.scr = value,
            Register::RecvHold
            | Register::IntrIdent
            | Register::LineStatus
            | Register::ModemStatus => return Err(UartError::ReadOnlyRegister { offset }),
        }
        Ok(())
    }

    fn write_ier(&mut self, value: u8) {
        let new = Ier::from_bits_truncate(value);
        if self.regs.ier.contains(Ier::THRI) && !new.contains(Ier::THRI) && !self.tx.is_empty() {
            self.on_disable_tx_interrupt();
        }
        self.regs.ier = new;
    }

    fn write_fcr(&mut self, value: u8) {
        let fcr = Fcr::from_bits_retain(value);

        // With the enable bit clear every other FCR bit is gated off.
        if !fcr.contains(Fcr::ENABLE) {
            self.regs.fcr = 0;
            return;
        }
        self.regs.fcr = value;

        if fcr.contains(Fcr::CLEAR_RCVR) {
            self.rx.reset();
            self.regs.lsr.remove(Lsr::DR);
        }
        if fcr.contains(Fcr::CLEAR_XMIT) {
            self.tx.reset();
            self.regs.lsr.insert(Lsr::THRE | Lsr::TEMT);
        }
    }

    // ========================================================================
    // RECEIVE PATH
    // ========================================================================

    /// Puts one byte on the receive side as if it arrived on the wire.
    pub(crate) fn receive_byte(&mut self, byte: u8) -> bool {
        if !self.rx.push(byte) {
            self.regs.lsr.insert(Lsr::OE);
            self.metrics.record_overrun();
            warn!(line = self.line(), byte, "RX FIFO overrun");
            return false;
        }
        self.regs.lsr.insert(Lsr::DR);
        self.metrics.record_rx(1);
        true
    }

    pub(crate) fn inject(&mut self, bytes: &[u8]) -> UartResult<usize> {
        self.ensure_initialized()?;

        if bytes.len() > FIFO_SIZE {
            return Err(UartError::CapacityExceeded {
                requested: bytes.len(),
                capacity: FIFO_SIZE,
            });
        }

        if !self.registered {
            debug!(line = self.line(), "RX injection on unregistered port ignored");
            return Ok(0);
        }
        // The serial input is disconnected in loopback.
        if self.regs.is_loopback() {
            debug!(line = self.line(), "RX injection ignored in loopback mode");
            return Ok(0);
        }
        if self.regs.lsr.contains(Lsr::DR) && self.rx.is_full() {
            debug!(line = self.line(), "RX FIFO full, injection refused");
            return Ok(0);
        }

        let mut accepted = 0;
        for &byte in bytes {
            if !self.rx.push(byte) {
                break;
            }
            accepted += 1;
        }
        if accepted > 0 {
            self.regs.lsr.insert(Lsr::DR);
            self.metrics.record_rx(accepted);
        }
        self.recompute();

        debug!(line = self.line(), requested = bytes.len(), accepted, "RX injected");
        Ok(accepted)
    }

    /// Raises a break condition on the line. Returns false when the wire is
    /// disconnected (loopback).
    pub(crate) fn signal_break(&mut self) -> UartResult<bool> {
        self.ensure_initialized()?;
        if self.regs.is_loopback() {
            return Ok(false);
        }
        self.regs.lsr.insert(Lsr::BI);
        self.recompute();
        Ok(true)
    }
}

// ============================================================================
// TESTS
// ============================================================================
