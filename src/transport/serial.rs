//! USB-serial transport backed by the `serialport` crate.

use std::time::Duration;

use serialport::SerialPort;

use super::{run_exchange, RawIo, Transport, TransportError};

/// A serial-port-backed [Transport]. Opens the port eagerly on construction
/// and classifies "device not configured"/`ENODEV`-flavoured I/O errors as
/// [TransportError::Disconnected].
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port_name", &self.port.name())
            .finish()
    }
}

impl SerialTransport {
    /// Opens `path` at `baud_rate` with an overall read timeout of
    /// `read_timeout` (the per-exchange timeout used by
    /// [Transport::exchange] is independent of this and controls the
    /// exchange loop, not the underlying port's blocking-read timeout).
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud_rate)
            .timeout(read_timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .open()
            .map_err(|e| TransportError::Io(format!("failed to open {path}: {e}")))?;
        Ok(Self { port })
    }
}

fn classify_io_error(e: std::io::Error) -> TransportError {
    let msg = e.to_string();
    let lower = msg.to_ascii_lowercase();
    if lower.contains("device not configured") || lower.contains("no such device") || lower.contains("disconnected") {
        TransportError::Disconnected(msg)
    } else {
        TransportError::Io(msg)
    }
}

impl RawIo for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        use std::io::Write;
        self.port.write_all(bytes).map_err(classify_io_error)?;
        self.port.flush().map_err(classify_io_error)
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        Ok(self.port.bytes_to_read().unwrap_or(0) as usize)
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        use std::io::Read;
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(classify_io_error(e)),
        }
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        let _ = self.port.clear(serialport::ClearBuffer::Input);
        Ok(())
    }

    fn clear_output(&mut self) -> Result<(), TransportError> {
        let _ = self.port.clear(serialport::ClearBuffer::Output);
        Ok(())
    }
}

impl Transport for SerialTransport {
    fn exchange(
        &mut self,
        command: &str,
        timeout: Duration,
        silence_timeout: Duration,
        min_wait_before_silence: Duration,
    ) -> Result<Vec<String>, TransportError> {
        run_exchange(self, command, timeout, silence_timeout, min_wait_before_silence)
    }
}

/// Enumerates serial ports that plausibly host an ELM327 adapter (any port
/// the platform reports, since consumer ELM327 clones enumerate under many
/// different vendor/product names and as plain USB-serial CDC devices).
pub fn find_ports() -> Result<Vec<String>, TransportError> {
    serialport::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .map_err(|e| TransportError::Io(e.to_string()))
}
