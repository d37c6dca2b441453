//! Byte-level I/O over serial or BLE, framing ELM327 commands and reading
//! until the `>` prompt or a silence timeout.
//!
//! See spec.md §4.1 and §5 ("BLE transports internally schedule
//! asynchronous I/O... expose a synchronous blocking facade").

use std::time::{Duration, Instant};

#[cfg(feature = "ble")]
pub mod ble;
#[cfg(feature = "serial")]
pub mod serial;

#[cfg(feature = "ble")]
pub use ble::BleTransport;
#[cfg(feature = "serial")]
pub use serial::SerialTransport;

/// Error produced by a [Transport].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The underlying handle was closed, or the OS reported the device as
    /// no longer configured. Never retried.
    #[error("device disconnected: {0}")]
    Disconnected(String),
    /// Generic I/O or timeout error; may be retried once by the OBD-II
    /// wrapper.
    #[error("communication error: {0}")]
    Io(String),
}

/// Minimal byte-sink/source the [Transport] trait drives. Implemented by
/// [serial::SerialTransport] over a `serialport::SerialPort` and by
/// [ble::BleTransport] over a buffered BLE notification queue.
pub trait RawIo: Send {
    /// Writes `bytes` to the underlying device.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
    /// Returns the number of bytes currently available to read without
    /// blocking.
    fn bytes_available(&mut self) -> Result<usize, TransportError>;
    /// Reads up to `buf.len()` available bytes, returning how many were
    /// read. Must not block if fewer than `buf.len()` bytes are available.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
    /// Discards anything buffered for reading.
    fn clear_input(&mut self) -> Result<(), TransportError>;
    /// Discards anything buffered for writing.
    fn clear_output(&mut self) -> Result<(), TransportError>;
}

/// One adapter command/response exchange.
///
/// Contract (spec.md §4.1): writes `command + CR` as ASCII; reads incoming
/// bytes, accumulating into a buffer, and terminates when either
/// (a) the prompt byte `>` has been observed AND at least one "meaningful"
/// line is present, or (b) the total elapsed time has exceeded
/// `min_wait_before_silence` AND no new byte has arrived for
/// `silence_timeout`, or (c) `timeout` is reached. The buffer is then split
/// on `\r`/`\n`/`>`, whitespace-trimmed, and empty lines are dropped.
pub trait Transport: Send {
    /// Performs one command/response exchange; see the trait-level contract.
    fn exchange(
        &mut self,
        command: &str,
        timeout: Duration,
        silence_timeout: Duration,
        min_wait_before_silence: Duration,
    ) -> Result<Vec<String>, TransportError>;
}

/// A "meaningful" line is anything that isn't a bare `SEARCHING...` line or
/// a `BUS INIT...` line without `ERROR` in it. Used only to decide whether
/// the prompt-termination condition has enough content to stop early; noise
/// classification for parsing happens in [crate::line_parser].
fn is_meaningful(line: &str) -> bool {
    let up = line.trim().to_ascii_uppercase();
    if up.is_empty() {
        return false;
    }
    if up.starts_with("SEARCHING") {
        return false;
    }
    if up.starts_with("BUS INIT") && !up.contains("ERROR") {
        return false;
    }
    true
}

/// Shared exchange loop driven by any [RawIo] implementation. Both
/// [serial::SerialTransport] and [ble::BleTransport] delegate here after
/// writing the command.
pub(crate) fn run_exchange(
    io: &mut dyn RawIo,
    command: &str,
    timeout: Duration,
    silence_timeout: Duration,
    min_wait_before_silence: Duration,
) -> Result<Vec<String>, TransportError> {
    io.clear_input()?;
    io.clear_output()?;

    let mut line = String::with_capacity(command.len() + 1);
    line.push_str(command);
    line.push('\r');
    io.write_all(line.as_bytes())?;

    let mut buf: Vec<u8> = Vec::new();
    let start = Instant::now();
    let mut last_rx = start;
    let mut received_any = false;
    let mut received_meaningful = false;
    let mut prompt_seen = false;
    let mut scratch = [0u8; 256];

    loop {
        let now = Instant::now();
        if now.duration_since(start) > timeout {
            break;
        }

        let available = io.bytes_available()?;
        if available > 0 {
            let to_read = available.min(scratch.len());
            let n = io.read_available(&mut scratch[..to_read])?;
            if n > 0 {
                buf.extend_from_slice(&scratch[..n]);
                last_rx = now;
                received_any = true;
                if buf.contains(&b'>') {
                    prompt_seen = true;
                }
                if !received_meaningful {
                    let text = String::from_utf8_lossy(&buf);
                    let has_meaningful = text
                        .replace('>', "\n")
                        .replace('\r', "\n")
                        .lines()
                        .any(is_meaningful);
                    if has_meaningful {
                        received_meaningful = true;
                    }
                }
                if prompt_seen && received_meaningful {
                    break;
                }
            }
        } else {
            if prompt_seen && received_meaningful {
                break;
            }
            if received_any
                && received_meaningful
                && now.duration_since(start) >= min_wait_before_silence
                && now.duration_since(last_rx) > silence_timeout
            {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    let text = String::from_utf8_lossy(&buf);
    let lines: Vec<String> = text
        .replace('>', "\n")
        .replace('\r', "\n")
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    Ok(lines)
}

/// Default timeouts used by callers that don't need to tune them per call.
pub mod defaults {
    use std::time::Duration;

    /// Default overall command timeout.
    pub const TIMEOUT: Duration = Duration::from_secs(4);
    /// Default silence-break timeout once meaningful data has arrived.
    pub const SILENCE_TIMEOUT: Duration = Duration::from_millis(250);
    /// Minimum elapsed time before a silence-break is allowed to fire.
    pub const MIN_WAIT_BEFORE_SILENCE: Duration = Duration::from_millis(750);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct FakeIo {
        to_read: VecDeque<u8>,
        written: Vec<u8>,
    }

    impl RawIo for FakeIo {
        fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            self.written.extend_from_slice(bytes);
            Ok(())
        }
        fn bytes_available(&mut self) -> Result<usize, TransportError> {
            Ok(self.to_read.len())
        }
        fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            let mut n = 0;
            while n < buf.len() {
                match self.to_read.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
        fn clear_input(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn clear_output(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[test]
    fn exchange_stops_at_prompt_with_meaningful_line() {
        let mut io = FakeIo {
            to_read: b"41 0C 1A F8\r\r>".iter().copied().collect(),
            written: Vec::new(),
        };
        let lines = run_exchange(
            &mut io,
            "010C",
            Duration::from_secs(2),
            Duration::from_millis(50),
            Duration::from_millis(10),
        )
        .unwrap();
        assert_eq!(lines, vec!["41 0C 1A F8".to_string()]);
        assert_eq!(io.written, b"010C\r".to_vec());
    }

    #[test]
    fn exchange_ignores_searching_until_real_data() {
        let mut io = FakeIo {
            to_read: b"SEARCHING...\r41 00 BE 1F B8 13\r>".iter().copied().collect(),
            written: Vec::new(),
        };
        let lines = run_exchange(
            &mut io,
            "0100",
            Duration::from_secs(2),
            Duration::from_millis(50),
            Duration::from_millis(10),
        )
        .unwrap();
        assert_eq!(lines, vec!["SEARCHING...".to_string(), "41 00 BE 1F B8 13".to_string()]);
    }
}
