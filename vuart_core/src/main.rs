use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use vuart_core::config::HostConfig;
use vuart_core::irq::InterruptCause;
use vuart_core::regs::{Ier, Lsr, Mcr, UART_IER, UART_LSR, UART_MCR, UART_RX, UART_TX};
use vuart_core::{
    FlushReason, HostRegistrar, InterruptSink, PortInfo, PortIo, PortTable, TxCallback, Uart,
    UartError, UartResult,
};

// ============================================================================
// ECHO HOST
// ============================================================================

/// Minimal stand-in for a host serial driver. Every byte received on a line
/// is written back to its transmitter; in loopback the bytes already went
/// out once, so they are printed instead.
#[derive(Default)]
struct EchoHost {
    ports: Mutex<HashMap<u8, Arc<dyn PortIo>>>,
}

impl EchoHost {
    fn port(&self, line: u8) -> Option<Arc<dyn PortIo>> {
        self.ports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&line)
            .cloned()
    }

    fn drain_rx(io: &dyn PortIo) -> Vec<u8> {
        let mut bytes = Vec::new();
        while io.serial_in(UART_LSR) & Lsr::DR.bits() != 0 {
            bytes.push(io.serial_in(UART_RX));
        }
        bytes
    }
}

impl HostRegistrar for EchoHost {
    fn register(&self, info: PortInfo, io: Arc<dyn PortIo>) -> UartResult<()> {
        let mut ports = self.ports.lock().unwrap_or_else(|e| e.into_inner());
        if ports.contains_key(&info.line) {
            return Err(UartError::Registration(format!(
                "ttyS{} already registered",
                info.line
            )));
        }
        ports.insert(info.line, io);
        tracing::info!(line = info.line, irq = info.irq, "ttyS{} registered", info.line);
        Ok(())
    }

    fn unregister(&self, info: PortInfo) -> UartResult<()> {
        self.ports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&info.line);
        tracing::info!(line = info.line, "ttyS{} unregistered", info.line);
        Ok(())
    }
}

impl InterruptSink for EchoHost {
    fn deliver(&self, line: u8, iir: u8) {
        let Some(io) = self.port(line) else {
            return;
        };

        match InterruptCause::from_iir(iir) {
            Some(InterruptCause::LineStatus) => {
                let lsr = Lsr::from_bits_retain(io.serial_in(UART_LSR));
                if lsr.contains(Lsr::BI) {
                    // consume the NUL the break reads as
                    io.serial_in(UART_RX);
                }
                tracing::warn!(line, lsr = lsr.bits(), "line status interrupt");
            }
            Some(InterruptCause::ReceivedData) => {
                let bytes = Self::drain_rx(io.as_ref());
                let loopback = io.serial_in(UART_MCR) & Mcr::LOOP.bits() != 0;
                if loopback {
                    print_line(line, &bytes);
                    return;
                }
                for byte in bytes {
                    io.serial_out(UART_TX, byte);
                }
                // Queued echo goes out when THRI is masked again, either on
                // the TX-empty interrupt or right away if THRE is down.
                io.serial_out(UART_IER, (Ier::RDI | Ier::RLSI | Ier::THRI).bits());
                if io.serial_in(UART_LSR) & Lsr::THRE.bits() == 0 {
                    io.serial_out(UART_IER, (Ier::RDI | Ier::RLSI).bits());
                }
            }
            Some(InterruptCause::TransmitterEmpty) => {
                io.serial_out(UART_IER, (Ier::RDI | Ier::RLSI).bits());
            }
            None => {}
        }
    }
}

fn print_line(line: u8, bytes: &[u8]) {
    let mut out = io::stdout().lock();
    if let Err(e) = out.write_all(bytes).and_then(|_| out.flush()) {
        tracing::warn!(line, error = %e, "Failed to write to stdout");
    }
}

fn stdout_consumer() -> TxCallback {
    Box::new(|line: u8, bytes: &[u8], reason: FlushReason| {
        tracing::trace!(line, count = bytes.len(), ?reason, "TX to stdout");
        print_line(line, bytes);
    })
}

// ============================================================================
// STDIN PUMP
// ============================================================================

/// Feeds stdin into line 0, one FIFO-sized chunk at a time. In loopback the
/// bytes are written to the transmitter instead, like a guest would.
fn pump_stdin(ports: Arc<PortTable>, loopback: bool, done: mpsc::Sender<()>) {
    let mut stdin = io::stdin().lock();
    let mut chunk = [0u8; 16];

    loop {
        let n = match stdin.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stdin");
                break;
            }
        };

        if let Err(e) = feed(&ports, &chunk[..n], loopback) {
            tracing::error!(error = %e, "Line 0 went away");
            break;
        }
    }

    tracing::info!("stdin closed");
    let _ = done.send(());
}

fn feed(ports: &PortTable, mut bytes: &[u8], loopback: bool) -> UartResult<()> {
    if loopback {
        for &byte in bytes {
            ports.write(0, UART_TX, byte)?;
        }
        return Ok(());
    }

    while !bytes.is_empty() {
        let accepted = ports.inject(0, bytes)?;
        bytes = &bytes[accepted..];
        if accepted == 0 {
            // RX is full until the host drains it
            thread::sleep(Duration::from_millis(1));
        }
    }
    Ok(())
}

// ============================================================================
// MAIN
// ============================================================================

fn bring_up(ports: &PortTable, host: &Arc<EchoHost>, config: &HostConfig, line: u8) -> UartResult<Arc<Uart>> {
    let uart = ports.add(line)?;
    uart.attach_host(host.clone());
    ports.set_tx_callback(line, Some(stdout_consumer()), config.threshold)?;
    ports.write(line, UART_IER, (Ier::RDI | Ier::RLSI).bits())?;
    if config.loopback && line == 0 {
        ports.write(line, UART_MCR, (Mcr::LOOP | Mcr::OUT2).bits())?;
    }
    ports.enable_virtual_irq(line)?;
    Ok(uart)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = HostConfig::parse();

    if let Err(e) = config.validate().map_err(UartError::InvalidConfiguration) {
        eprintln!("{}", e);
        std::process::exit(2);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level())),
        )
        .with_writer(io::stderr)
        .init();

    let host = Arc::new(EchoHost::default());
    let ports = Arc::new(if config.no_metrics {
        PortTable::new(host.clone()).without_metrics()
    } else {
        PortTable::new(host.clone())
    });

    let mut uarts = Vec::new();
    for line in 0..config.lines {
        uarts.push(bring_up(&ports, &host, &config, line)?);
    }
    tracing::info!(lines = config.lines, threshold = config.threshold, "vuart ready");

    let (done_tx, done_rx) = mpsc::channel();
    let ctrlc_tx = done_tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(());
    })?;

    {
        let ports = ports.clone();
        let loopback = config.loopback;
        thread::Builder::new()
            .name("vuart-stdin".into())
            .spawn(move || pump_stdin(ports, loopback, done_tx))?;
    }

    let _ = done_rx.recv();
    tracing::info!("shutting down");

    for uart in &uarts {
        uart.flush_tx(FlushReason::Idle);
        if let Err(e) = ports.remove(uart.line()) {
            tracing::warn!(line = uart.line(), error = %e, "Failed to remove line");
        }
    }

    if !config.no_metrics {
        for uart in &uarts {
            println!("ttyS{}", uart.line());
            print!("{}", uart.metrics());
        }
    }

    Ok(())
}
