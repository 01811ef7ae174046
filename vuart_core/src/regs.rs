// regs.rs
//!
//! 16550A register map, bit definitions and power-on reset profile.

use bitflags::bitflags;

use crate::error::{UartError, UartResult};

// ============================================================================
// CONSTANTS - REGISTER OFFSETS
// ============================================================================

/// Receive Buffer Register (read, DLAB=0)
pub const UART_RX: u8 = 0;
/// Transmitter Holding Register (write, DLAB=0)
pub const UART_TX: u8 = 0;
/// Divisor Latch Low (DLAB=1)
pub const UART_DLL: u8 = 0;
/// Interrupt Enable Register (DLAB=0)
pub const UART_IER: u8 = 1;
/// Divisor Latch High (DLAB=1)
pub const UART_DLM: u8 = 1;
/// Interrupt Identification Register (read)
pub const UART_IIR: u8 = 2;
/// FIFO Control Register (write)
pub const UART_FCR: u8 = 2;
/// Line Control Register
pub const UART_LCR: u8 = 3;
/// Modem Control Register
pub const UART_MCR: u8 = 4;
/// Line Status Register
pub const UART_LSR: u8 = 5;
/// Modem Status Register
pub const UART_MSR: u8 = 6;
/// Scratch Register
pub const UART_SCR: u8 = 7;

/// Number of addressable register slots relative to the port base.
pub const UART_REG_COUNT: u8 = 8;

// ============================================================================
// CONSTANTS - INTERRUPT IDENTIFICATION
// ============================================================================

/// No interrupt pending
pub const IIR_NO_INT: u8 = 0x01;
/// Mask of the interrupt ID bits
pub const IIR_ID_MASK: u8 = 0x0E;
/// Transmitter holding register empty
pub const IIR_THRI: u8 = 0x02;
/// Received data available
pub const IIR_RDI: u8 = 0x04;
/// Receiver line status
pub const IIR_RLSI: u8 = 0x06;
/// FIFOs enabled (both bits)
pub const IIR_FIFO_ENABLED: u8 = 0xC0;

bitflags! {
    /// Interrupt Enable Register (IER). Only the four documented bits exist
    /// here; anything above bit 3 is dropped on write.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
    pub struct Ier: u8 {
        /// Received data available
        const RDI = 1 << 0;
        /// Transmitter holding register empty
        const THRI = 1 << 1;
        /// Receiver line status
        const RLSI = 1 << 2;
        /// Modem status
        const MSI = 1 << 3;
    }

    /// FIFO Control Register (FCR)
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
    pub struct Fcr: u8 {
        const ENABLE = 1 << 0;
        const CLEAR_RCVR = 1 << 1;
        const CLEAR_XMIT = 1 << 2;
        const DMA_SELECT = 1 << 3;
        const TRIGGER_MASK = 0b1100_0000;
    }

    /// Line Control Register (LCR)
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
    pub struct Lcr: u8 {
        const WLEN = 0b11;
        const STOP = 1 << 2;
        const PARITY = 1 << 3;
        const EPAR = 1 << 4;
        const SPAR = 1 << 5;
        const SBC = 1 << 6;
        /// Divisor Latch Access Bit
        const DLAB = 1 << 7;
    }

    /// Modem Control Register (MCR)
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
    pub struct Mcr: u8 {
        const DTR = 1 << 0;
        const RTS = 1 << 1;
        const OUT1 = 1 << 2;
        /// Gates the interrupt line on PC hardware
        const OUT2 = 1 << 3;
        const LOOP = 1 << 4;
    }

    /// Line Status Register (LSR)
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
    pub struct Lsr: u8 {
        /// Data ready
        const DR = 1 << 0;
        /// Overrun error
        const OE = 1 << 1;
        /// Parity error
        const PE = 1 << 2;
        /// Framing error
        const FE = 1 << 3;
        /// Break interrupt
        const BI = 1 << 4;
        /// Transmitter holding register empty
        const THRE = 1 << 5;
        /// Transmitter empty (FIFO and shift register)
        const TEMT = 1 << 6;
        /// Error in RCVR FIFO
        const FIFOE = 1 << 7;

        /// Bits that raise a receiver line status interrupt
        const BRK_ERROR_BITS = Self::OE.bits() | Self::PE.bits() | Self::FE.bits() | Self::BI.bits();
    }

    /// Modem Status Register (MSR)
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
    pub struct Msr: u8 {
        const DCTS = 1 << 0;
        const DDSR = 1 << 1;
        const TERI = 1 << 2;
        const DDCD = 1 << 3;
        const CTS = 1 << 4;
        const DSR = 1 << 5;
        const RI = 1 << 6;
        const DCD = 1 << 7;

        const DELTA_MASK = 0x0F;
        const HANDSHAKE_MASK = 0xF0;
    }
}

// ============================================================================
// REGISTER DECODING
// ============================================================================

/// A register slot after DLAB multiplexing has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    RecvHold,
    TransmitHold,
    IntrEnable,
    IntrIdent,
    FifoCtrl,
    LineCtrl,
    ModemCtrl,
    LineStatus,
    ModemStatus,
    Scratch,
    DivisorLow,
    DivisorHigh,
}

impl Register {
    pub fn for_read(offset: u8, dlab: bool) -> UartResult<Self> {
        match (offset, dlab) {
            (UART_DLL, true) => Ok(Self::DivisorLow),
            (UART_RX, false) => Ok(Self::RecvHold),
            (UART_DLM, true) => Ok(Self::DivisorHigh),
            (UART_IER, false) => Ok(Self::IntrEnable),
            (UART_IIR, _) => Ok(Self::IntrIdent),
            (UART_LCR, _) => Ok(Self::LineCtrl),
            (UART_MCR, _) => Ok(Self::ModemCtrl),
            (UART_LSR, _) => Ok(Self::LineStatus),
            (UART_MSR, _) => Ok(Self::ModemStatus),
            (UART_SCR, _) => Ok(Self::Scratch),
            _ => Err(UartError::UndefinedRegister { offset }),
        }
    }

    pub fn for_write(offset: u8, dlab: bool) -> UartResult<Self> {
        match (offset, dlab) {
            (UART_DLL, true) => Ok(Self::DivisorLow),
            (UART_TX, false) => Ok(Self::TransmitHold),
            (UART_DLM, true) => Ok(Self::DivisorHigh),
            (UART_IER, false) => Ok(Self::IntrEnable),
            (UART_FCR, _) => Ok(Self::FifoCtrl),
            (UART_LCR, _) => Ok(Self::LineCtrl),
            (UART_MCR, _) => Ok(Self::ModemCtrl),
            (UART_LSR, _) | (UART_MSR, _) => Err(UartError::ReadOnlyRegister { offset }),
            (UART_SCR, _) => Ok(Self::Scratch),
            _ => Err(UartError::UndefinedRegister { offset }),
        }
    }
}

// ============================================================================
// REGISTER BANK
// ============================================================================

/// Addressable state of one chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterBank {
    pub rbr: u8,
    pub thr: u8,
    pub ier: Ier,
    /// Derived; only `irq::compute_iir` produces this value.
    pub iir: u8,
    /// Last value written, kept for inspection.
    pub fcr: u8,
    pub lcr: Lcr,
    pub mcr: Mcr,
    pub lsr: Lsr,
    pub msr: Msr,
    pub scr: u8,
    pub dll: u8,
    pub dlm: u8,
}

impl RegisterBank {
    pub fn new() -> Self {
        let mut bank = Self {
            rbr: 0,
            thr: 0,
            ier: Ier::empty(),
            iir: 0,
            fcr: 0,
            lcr: Lcr::empty(),
            mcr: Mcr::empty(),
            lsr: Lsr::empty(),
            msr: Msr::empty(),
            scr: 0,
            dll: 0,
            dlm: 0,
        };
        bank.reset();
        bank
    }

    /// Power-on values. Interrupts off, transmitter idle, OUT2 (the PC
    /// interrupt gate) asserted and the cable reporting carrier/ready.
    pub fn reset(&mut self) {
        self.rbr = 0;
        self.thr = 0;
        self.ier = Ier::empty();
        self.iir = IIR_NO_INT | IIR_FIFO_ENABLED;
        self.fcr = 0;
        self.lcr = Lcr::empty();
        self.mcr = Mcr::OUT2;
        self.lsr = Lsr::THRE | Lsr::TEMT;
        self.msr = Msr::DCD | Msr::DSR | Msr::CTS;
        self.scr = 0;
        self.dll = 0;
        self.dlm = 0;
    }

    #[inline]
    pub fn is_dlab(&self) -> bool {
        self.lcr.contains(Lcr::DLAB)
    }

    #[inline]
    pub fn is_loopback(&self) -> bool {
        self.mcr.contains(Mcr::LOOP)
    }

    pub fn divisor(&self) -> u16 {
        u16::from_le_bytes([self.dll, self.dlm])
    }

    /// Modem status as the host sees it. In loopback the handshake inputs
    /// are wired to the modem control outputs.
    pub fn modem_status(&self) -> u8 {
        if !self.is_loopback() {
            return self.msr.bits();
        }

        let mut lines = Msr::empty();
        lines.set(Msr::CTS, self.mcr.contains(Mcr::RTS));
        lines.set(Msr::DSR, self.mcr.contains(Mcr::DTR));
        lines.set(Msr::RI, self.mcr.contains(Mcr::OUT1));
        lines.set(Msr::DCD, self.mcr.contains(Mcr::OUT2));

        (self.msr & Msr::DELTA_MASK).bits() | lines.bits()
    }
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
