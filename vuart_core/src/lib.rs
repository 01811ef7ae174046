// lib.rs
//!
//! Virtual 16550A UART core.
//!
//! Emulates the register bank, the 16 byte RX/TX FIFOs, interrupt
//! identification and TX flushing of a 16550A, and delivers "virtual
//! interrupts" to the host from a background worker per port.

pub mod chip;
pub mod config;
pub mod error;
pub mod fifo;
pub mod host;
pub mod irq;
pub mod metrics;
pub mod ports;
pub mod regs;
pub mod tx;
pub mod uart;
mod virq;

pub use chip::ChipSnapshot;
pub use error::{ErrorClass, ErrorSeverity, UartError, UartResult};
pub use host::{HostRegistrar, InterruptSink, PortInfo, PortIo};
pub use metrics::{MetricsSnapshot, UartMetrics};
pub use ports::{PortTable, MAX_LINES};
pub use tx::{FlushReason, TxCallback};
pub use uart::Uart;
