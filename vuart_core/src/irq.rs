// irq.rs
//!
//! Interrupt identification. `compute_iir` is the only producer of the IIR
//! value; `ChipState::recompute` stores it and arms the virtual IRQ worker.

use crate::chip::ChipState;
use crate::regs::{
    Ier, Lsr, RegisterBank, IIR_FIFO_ENABLED, IIR_ID_MASK, IIR_NO_INT, IIR_RDI, IIR_RLSI,
    IIR_THRI,
};

/// Interrupt sources in 16550A priority order, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptCause {
    LineStatus,
    ReceivedData,
    TransmitterEmpty,
}

impl InterruptCause {
    pub fn id(self) -> u8 {
        match self {
            Self::LineStatus => IIR_RLSI,
            Self::ReceivedData => IIR_RDI,
            Self::TransmitterEmpty => IIR_THRI,
        }
    }

    pub fn from_iir(iir: u8) -> Option<Self> {
        if !is_pending(iir) {
            return None;
        }
        match iir & IIR_ID_MASK {
            IIR_RLSI => Some(Self::LineStatus),
            IIR_RDI => Some(Self::ReceivedData),
            IIR_THRI => Some(Self::TransmitterEmpty),
            _ => None,
        }
    }
}

#[inline]
pub fn is_pending(iir: u8) -> bool {
    iir & IIR_NO_INT == 0
}

pub fn highest_pending(regs: &RegisterBank) -> Option<InterruptCause> {
    let ier = regs.ier;
    let lsr = regs.lsr;

    if ier.contains(Ier::RLSI) && lsr.intersects(Lsr::BRK_ERROR_BITS) {
        Some(InterruptCause::LineStatus)
    } else if ier.contains(Ier::RDI) && lsr.contains(Lsr::DR) {
        Some(InterruptCause::ReceivedData)
    } else if ier.contains(Ier::THRI) && lsr.contains(Lsr::THRE) {
        Some(InterruptCause::TransmitterEmpty)
    } else {
        None
    }
}

/// IIR value for the given register state. FIFOs are always reported as
/// enabled.
pub fn compute_iir(regs: &RegisterBank) -> u8 {
    let id = match highest_pending(regs) {
        Some(cause) => cause.id(),
        None => IIR_NO_INT,
    };
    id | IIR_FIFO_ENABLED
}

impl ChipState {
    /// Re-derives IIR after a mutation. Returns true when an interrupt is
    /// pending, in which case the virtual IRQ worker (if any) is armed.
    pub(crate) fn recompute(&mut self) -> bool {
        self.regs.iir = compute_iir(&self.regs);

        let pending = is_pending(self.regs.iir);
        if pending && self.virq.enabled {
            self.virq.signaled = true;
        }
        pending
    }
}
