// host.rs
//!
//! Interfaces to the host serial subsystem. The core never creates host
//! port objects itself; it hands a [`PortIo`] to a [`HostRegistrar`] and
//! notifies an [`InterruptSink`] once the host has attached one.

use std::sync::Arc;

use crate::error::UartResult;

/// Identity of an emulated port as presented to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortInfo {
    pub line: u8,
    pub iobase: u16,
    pub irq: u32,
    pub baud_base: u32,
}

/// Register access entry points the host calls for every port access.
pub trait PortIo: Send + Sync {
    fn serial_in(&self, offset: u8) -> u8;
    fn serial_out(&self, offset: u8, value: u8);
}

/// The host's interrupt handler for one port.
///
/// Called from the virtual IRQ worker without the device guard held, so the
/// implementation may (and usually will) read registers right away.
pub trait InterruptSink: Send + Sync {
    fn deliver(&self, line: u8, iir: u8);
}

/// Represents ports to the host as live serial devices.
pub trait HostRegistrar: Send + Sync {
    fn register(&self, info: PortInfo, io: Arc<dyn PortIo>) -> UartResult<()>;
    fn unregister(&self, info: PortInfo) -> UartResult<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::UartError;
    use std::sync::Mutex;

    /// Registrar that keeps the handed-out `PortIo` handles around.
    #[derive(Default)]
    pub struct RecordingRegistrar {
        pub registered: Mutex<Vec<(PortInfo, Arc<dyn PortIo>)>>,
        pub fail_next: Mutex<bool>,
    }

    impl HostRegistrar for RecordingRegistrar {
        fn register(&self, info: PortInfo, io: Arc<dyn PortIo>) -> UartResult<()> {
            let mut fail = self.fail_next.lock().unwrap();
            if *fail {
                *fail = false;
                return Err(UartError::Registration(format!("line {} refused", info.line)));
            }
            self.registered.lock().unwrap().push((info, io));
            Ok(())
        }

        fn unregister(&self, info: PortInfo) -> UartResult<()> {
            self.registered.lock().unwrap().retain(|(i, _)| i.line != info.line);
            Ok(())
        }
    }

    /// Sink that records every delivered IIR value.
    #[derive(Default)]
    pub struct RecordingSink {
        pub delivered: Mutex<Vec<(u8, u8)>>,
    }

    impl InterruptSink for RecordingSink {
        fn deliver(&self, line: u8, iir: u8) {
            self.delivered.lock().unwrap().push((line, iir));
        }
    }
}
