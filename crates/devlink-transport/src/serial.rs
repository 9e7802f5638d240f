//! Serial port transport.
//!
//! Wraps [`serialport`] behind the [`LinkPort`] contract. Serial links are
//! half-duplex from the engine's point of view, so the reader reports
//! [`ReadMode::Polling`] and inbound data is checked with `bytes_to_read`
//! before every blocking read.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{LinkControl, LinkPort, LinkReader, LinkWriter, ReadMode};

/// Read timeout on the underlying port. Short enough that the read loop
/// notices a suspend request promptly, long enough to avoid busy spinning.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// An open serial port, ready to be split into its working halves.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    name: String,
    closed: Arc<AtomicBool>,
}

impl SerialLink {
    /// Open `name` at `baud` with 8N1 framing and no flow control.
    pub fn open(name: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(name, baud)
            .timeout(READ_TIMEOUT)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|source| TransportError::Open {
                port: name.to_string(),
                source,
            })?;
        debug!(port = name, baud, "serial port opened");
        Ok(Self {
            port,
            name: name.to_string(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Name of the underlying device, e.g. `/dev/ttyACM0`.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl LinkPort for SerialLink {
    type Route = ();
    type Reader = SerialReader;
    type Writer = SerialWriter;
    type Control = SerialControl;

    fn split(self) -> Result<(Self::Reader, Self::Writer, Self::Control)> {
        let writer_port = self.port.try_clone().map_err(|source| TransportError::Open {
            port: self.name.clone(),
            source,
        })?;
        let reader = SerialReader {
            port: self.port,
            name: self.name.clone(),
            closed: Arc::clone(&self.closed),
        };
        let writer = SerialWriter {
            port: writer_port,
            name: self.name.clone(),
            closed: Arc::clone(&self.closed),
        };
        let control = SerialControl {
            closed: self.closed,
        };
        Ok((reader, writer, control))
    }
}

/// Inbound half of a [`SerialLink`].
pub struct SerialReader {
    port: Box<dyn SerialPort>,
    name: String,
    closed: Arc<AtomicBool>,
}

impl LinkReader for SerialReader {
    fn prepare(&mut self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }
        // Stale bytes from before a transmit burst belong to nobody.
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|err| classify(&self.name, err))?;
        Ok(())
    }

    fn available(&mut self) -> Result<bool> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }
        let pending = self
            .port
            .bytes_to_read()
            .map_err(|err| classify(&self.name, err))?;
        Ok(pending > 0)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(err)
                if err.kind() == std::io::ErrorKind::TimedOut
                    || err.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(0)
            }
            Err(err) => Err(classify_io(&self.name, err)),
        }
    }

    fn mode(&self) -> ReadMode {
        ReadMode::Polling
    }
}

/// Outbound half of a [`SerialLink`].
pub struct SerialWriter {
    port: Box<dyn SerialPort>,
    name: String,
    closed: Arc<AtomicBool>,
}

impl LinkWriter for SerialWriter {
    type Route = ();

    fn write(&mut self, _route: &(), frame: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }
        self.port
            .write_all(frame)
            .map_err(|err| classify_io(&self.name, err))?;
        self.port
            .flush()
            .map_err(|err| classify_io(&self.name, err))?;
        Ok(())
    }
}

/// Shared shutdown handle for a [`SerialLink`].
#[derive(Clone)]
pub struct SerialControl {
    closed: Arc<AtomicBool>,
}

impl LinkControl for SerialControl {
    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn classify(name: &str, err: serialport::Error) -> TransportError {
    match err.kind {
        serialport::ErrorKind::NoDevice => TransportError::PortGone(name.to_string()),
        serialport::ErrorKind::Io(_) => classify_io(name, err.into()),
        _ => TransportError::Io(err.into()),
    }
}

fn classify_io(name: &str, err: std::io::Error) -> TransportError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::BrokenPipe
        | ErrorKind::NotFound
        | ErrorKind::NotConnected
        | ErrorKind::PermissionDenied => TransportError::PortGone(name.to_string()),
        _ => TransportError::Io(err),
    }
}

/// A serial device visible on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub description: Option<String>,
}

/// Enumerate serial ports, most-likely-device first.
///
/// USB CDC-ACM adapters (`ttyACM*`) sort ahead of USB-serial bridges
/// (`ttyUSB*`), which sort ahead of everything else; ties break on the
/// trailing device number.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .map_err(|err| TransportError::Io(std::io::Error::other(err.to_string())))?
        .into_iter()
        .map(|p| {
            let description = match p.port_type {
                serialport::SerialPortType::UsbPort(usb) => usb.product,
                _ => None,
            };
            PortInfo {
                name: p.port_name,
                description,
            }
        })
        .collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    Ok(ports)
}

fn port_sort_key(name: &str) -> (u8, u32, String) {
    let rank = if name.contains("ttyACM") {
        0
    } else if name.contains("ttyUSB") {
        1
    } else {
        2
    };
    let number = name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<String>()
        .parse()
        .unwrap_or(u32::MAX);
    (rank, number, name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acm_ports_sort_first() {
        let mut names = vec![
            "/dev/ttyS0".to_string(),
            "/dev/ttyUSB1".to_string(),
            "/dev/ttyACM2".to_string(),
            "/dev/ttyACM0".to_string(),
            "/dev/ttyUSB0".to_string(),
        ];
        names.sort_by_key(|n| port_sort_key(n));
        assert_eq!(
            names,
            vec![
                "/dev/ttyACM0",
                "/dev/ttyACM2",
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/ttyS0",
            ]
        );
    }

    #[test]
    fn unnumbered_ports_sort_last_within_rank() {
        let mut names = vec!["/dev/cu.usbmodem".to_string(), "/dev/ttyS3".to_string()];
        names.sort_by_key(|n| port_sort_key(n));
        assert_eq!(names, vec!["/dev/ttyS3", "/dev/cu.usbmodem"]);
    }
}
