// error.rs
//!
//! Error type shared by the UART core, the port table and the demo host.

use std::fmt;
use std::io;

// ============================================================================
// ERROR TYPE
// ============================================================================

#[derive(Debug)]
pub enum UartError {
    // Capacity
    CapacityExceeded { requested: usize, capacity: usize },
    InvalidThreshold(usize),

    // Protocol (holes in the register transition table)
    UndefinedRegister { offset: u8 },
    ReadOnlyRegister { offset: u8 },

    // Lifecycle
    InvalidLine(u8),
    NotInitialized(u8),
    AlreadyInitialized(u8),
    VirqAlreadyEnabled(u8),
    VirqNotEnabled(u8),
    Registration(String),

    // Resource
    WorkerSpawn(io::Error),
    WorkerPanicked(u8),

    InvalidConfiguration(String),
}

/// Coarse classification used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Capacity,
    Protocol,
    Lifecycle,
    Resource,
}

impl fmt::Display for UartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityExceeded { requested, capacity } => write!(
                f,
                "FIFO capacity exceeded: {} bytes requested, capacity is {}",
                requested, capacity
            ),
            Self::InvalidThreshold(t) => write!(f, "Invalid TX flush threshold: {}", t),

            Self::UndefinedRegister { offset } => {
                write!(f, "Access to undefined UART register offset {}", offset)
            }
            Self::ReadOnlyRegister { offset } => {
                write!(f, "Write to read-only UART register offset {}", offset)
            }

            Self::InvalidLine(line) => write!(f, "Invalid serial line: {}", line),
            Self::NotInitialized(line) => write!(f, "Serial line {} is not initialized", line),
            Self::AlreadyInitialized(line) => {
                write!(f, "Serial line {} is already initialized", line)
            }
            Self::VirqAlreadyEnabled(line) => {
                write!(f, "Virtual IRQ already enabled on line {}", line)
            }
            Self::VirqNotEnabled(line) => write!(f, "Virtual IRQ not enabled on line {}", line),
            Self::Registration(msg) => write!(f, "Host port registration failed: {}", msg),

            Self::WorkerSpawn(err) => write!(f, "Failed to spawn virtual IRQ worker: {}", err),
            Self::WorkerPanicked(line) => {
                write!(f, "Virtual IRQ worker for line {} panicked", line)
            }

            Self::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

// ============================================================================
// ERROR TRAIT IMPLEMENTATION
// ============================================================================

impl std::error::Error for UartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::WorkerSpawn(err) => Some(err),
            _ => None,
        }
    }
}

pub type UartResult<T> = Result<T, UartError>;

// ============================================================================
// SEVERITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
    Fatal,
}

impl UartError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::CapacityExceeded { .. } | Self::InvalidThreshold(_) => ErrorClass::Capacity,

            Self::UndefinedRegister { .. } | Self::ReadOnlyRegister { .. } => {
                ErrorClass::Protocol
            }

            Self::InvalidLine(_)
            | Self::NotInitialized(_)
            | Self::AlreadyInitialized(_)
            | Self::VirqAlreadyEnabled(_)
            | Self::VirqNotEnabled(_)
            | Self::Registration(_)
            | Self::InvalidConfiguration(_) => ErrorClass::Lifecycle,

            Self::WorkerSpawn(_) | Self::WorkerPanicked(_) => ErrorClass::Resource,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // Absorbed by adjusting status bits, the access itself goes on.
            Self::CapacityExceeded { .. } | Self::InvalidThreshold(_) => ErrorSeverity::Warning,

            Self::UndefinedRegister { .. } | Self::ReadOnlyRegister { .. } => ErrorSeverity::Error,

            Self::InvalidLine(_) | Self::InvalidConfiguration(_) => ErrorSeverity::Warning,

            Self::NotInitialized(_)
            | Self::AlreadyInitialized(_)
            | Self::VirqAlreadyEnabled(_)
            | Self::VirqNotEnabled(_)
            | Self::Registration(_) => ErrorSeverity::Error,

            Self::WorkerSpawn(_) => ErrorSeverity::Critical,
            Self::WorkerPanicked(_) => ErrorSeverity::Fatal,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.severity() < ErrorSeverity::Critical
    }

    /// Protocol errors mean the register transition table has a hole.
    pub fn is_bug(&self) -> bool {
        self.class() == ErrorClass::Protocol
    }
}

// ============================================================================
// TESTS
// ============================================================================
