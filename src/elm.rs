//! ELM327 connection lifecycle: AT-command initialization, protocol
//! negotiation, and headers-on verification. See spec.md §4.4 and the
//! adapter-state data model in §3.
//!
//! Grounded on `original_source/obd/elm/elm327.py` and `obd/elm/init.py`.

use std::time::{Duration, Instant};

use crate::isotp::{find_prefix, MergedPayloadMap};
use crate::line_parser::{is_noise, parse_lines};
use crate::transport::{defaults, Transport, TransportError};
use crate::DiagError;

/// Protocol codes the `ATSP{code}` command accepts, as used in spec.md
/// §4.4's negotiation candidate list and §4.8's discovery candidate list.
/// Represented as the literal character ELM327 expects after `ATSP`.
pub type ProtocolCode = char;

/// Candidate protocol codes tried in order during negotiation, per
/// spec.md §4.4.
pub const NEGOTIATION_CANDIDATES: &[ProtocolCode] = &['0', '6', '7', '8', '9'];

/// Adapter state mirrored by the driver: persists across calls so the
/// facade's next request observes the previous request's mutations
/// (spec.md §5 "ordering").
#[derive(Debug, Clone)]
pub struct AdapterState {
    /// Serial device path or BLE address.
    pub port_id: String,
    /// Baud rate (serial only; meaningless for BLE transports).
    pub baud_rate: u32,
    /// Last-negotiated protocol code, if any.
    pub protocol: Option<ProtocolCode>,
    /// Whether `ATH1` (headers-on) is currently in effect.
    pub headers_on: bool,
    /// Whether `ATS1` (spaces-on) is currently in effect.
    pub spaces_on: bool,
    /// ELM327 firmware version banner, captured from the `ATZ` response.
    pub version: Option<String>,
    /// Last command sent, for diagnostics.
    pub last_tx: Option<String>,
    /// Last response lines received, for diagnostics.
    pub last_rx: Option<Vec<String>>,
    /// Duration of the last exchange, for diagnostics.
    pub last_duration: Option<Duration>,
}

impl AdapterState {
    fn new(port_id: String, baud_rate: u32, headers_on: bool) -> Self {
        Self {
            port_id,
            baud_rate,
            protocol: None,
            headers_on,
            spaces_on: true,
            version: None,
            last_tx: None,
            last_rx: None,
            last_duration: None,
        }
    }
}

/// Drives an ELM327 adapter over a boxed [Transport]: issues AT commands,
/// tracks [AdapterState], and exposes a raw `exchange` used by the OBD-II
/// and UDS service layers.
pub struct ElmDriver {
    transport: Box<dyn Transport>,
    state: AdapterState,
}

impl std::fmt::Debug for ElmDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElmDriver").field("state", &self.state).finish_non_exhaustive()
    }
}

impl ElmDriver {
    /// Opens a connection over `transport`: resets the adapter, disables
    /// echo/linefeeds, configures headers per `headers_on`, enables
    /// adaptive timing, selects auto-protocol, and verifies `0100`
    /// answers. See spec.md §4.4.
    pub fn open(
        transport: Box<dyn Transport>,
        port_id: String,
        baud_rate: u32,
        headers_on: bool,
    ) -> Result<Self, DiagError> {
        let mut driver = Self {
            transport,
            state: AdapterState::new(port_id, baud_rate, headers_on),
        };

        let banner = driver.send_at_extended("ATZ")?;
        driver.state.version = banner.into_iter().find(|l| l.to_ascii_uppercase().starts_with("ELM327"));

        driver.send_at("ATE0")?;
        driver.send_at("ATL0")?;
        if headers_on {
            driver.send_at("ATS1")?;
        } else {
            driver.send_at("ATS0")?;
        }
        driver.set_headers(headers_on)?;
        driver.send_at("ATAT1")?;
        driver.send_at("ATSP0")?;
        let _ = driver.send_at("ATAL");

        if !driver.verify_obd()? {
            driver.negotiate_protocol()?;
        }
        driver.sanity_check_headers()?;

        Ok(driver)
    }

    /// Current adapter state.
    pub fn state(&self) -> &AdapterState {
        &self.state
    }

    fn set_headers(&mut self, on: bool) -> Result<(), DiagError> {
        self.send_at(if on { "ATH1" } else { "ATH0" })?;
        self.state.headers_on = on;
        Ok(())
    }

    /// Issues `0100` and returns true if `4100` appears anywhere in the
    /// concatenated response hex.
    fn verify_obd(&mut self) -> Result<bool, DiagError> {
        let lines = self.exchange_raw("0100", defaults::TIMEOUT)?;
        Ok(concat_hex(&lines).contains("4100"))
    }

    /// Requires at least one response line of 3-8 hex chars followed by
    /// whitespace (i.e. a plausible ECU header token followed by data); if
    /// none is found, headers-on is downgraded and `ATH0`/`ATS0` reissued.
    fn sanity_check_headers(&mut self) -> Result<(), DiagError> {
        if !self.state.headers_on {
            return Ok(());
        }
        let lines = self.exchange_raw("0100", defaults::TIMEOUT)?;
        let has_header_line = lines.iter().any(|line| {
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some(first) if (3..=8).contains(&first.len()) && first.chars().all(|c| c.is_ascii_hexdigit()) => {
                    parts.next().is_some()
                }
                _ => false,
            }
        });
        if !has_header_line {
            log::warn!("headers-on sanity check failed; downgrading to headers-off");
            self.send_at("ATH0")?;
            self.send_at("ATS0")?;
            self.state.headers_on = false;
        }
        Ok(())
    }

    /// Iterates [NEGOTIATION_CANDIDATES], issuing `ATSP{code}` and probing
    /// `0100` with retries and a half-second inter-attempt delay. Restores
    /// `ATSP0` and fails with [DiagError::CommunicationError] if no
    /// candidate answers.
    fn negotiate_protocol(&mut self) -> Result<(), DiagError> {
        const RETRIES: u32 = 2;
        for &code in NEGOTIATION_CANDIDATES {
            self.send_at(&format!("ATSP{code}"))?;
            for attempt in 0..RETRIES {
                if self.verify_obd()? {
                    self.state.protocol = Some(code);
                    return Ok(());
                }
                if attempt + 1 < RETRIES {
                    std::thread::sleep(Duration::from_millis(500));
                }
            }
        }
        let _ = self.send_at("ATSP0");
        Err(DiagError::CommunicationError(
            "no candidate protocol answered 0100".to_string(),
        ))
    }

    /// Sends a raw AT command, expecting a bare `OK` (or equivalent
    /// non-error response); returns the response lines after noise
    /// filtering for banner-style commands.
    fn send_at(&mut self, command: &str) -> Result<Vec<String>, DiagError> {
        self.exchange_raw(command, defaults::TIMEOUT)
    }

    /// Like [Self::send_at] but with an extended timeout, used for `ATZ`
    /// which can take the adapter over a second to reset.
    fn send_at_extended(&mut self, command: &str) -> Result<Vec<String>, DiagError> {
        self.exchange_raw(command, Duration::from_secs(5))
    }

    fn exchange_raw(&mut self, command: &str, timeout: Duration) -> Result<Vec<String>, DiagError> {
        let start = Instant::now();
        let result = self.transport.exchange(
            command,
            timeout,
            defaults::SILENCE_TIMEOUT,
            defaults::MIN_WAIT_BEFORE_SILENCE,
        );
        self.state.last_tx = Some(command.to_string());
        self.state.last_duration = Some(start.elapsed());
        match result {
            Ok(lines) => {
                self.state.last_rx = Some(lines.clone());
                Ok(lines)
            }
            Err(TransportError::Disconnected(s)) => Err(DiagError::DeviceDisconnected(s)),
            Err(TransportError::Io(s)) => Err(DiagError::CommunicationError(s)),
        }
    }

    /// Issues `command` and returns the raw response lines, applying the
    /// OBD-II retry wrapper (spec.md §7): one retry with 150 ms spacing if
    /// the first attempt's lines contain a transient pseudo-error.
    pub fn exchange(&mut self, command: &str) -> Result<Vec<String>, DiagError> {
        let lines = self.exchange_raw(command, defaults::TIMEOUT)?;
        if contains_transient_error(&lines) {
            std::thread::sleep(Duration::from_millis(150));
            return self.exchange_raw(command, defaults::TIMEOUT);
        }
        Ok(lines)
    }

    /// Issues `command`, groups and merges the response into a
    /// [MergedPayloadMap] per the current headers-on state, and locates
    /// `expected_prefix` within it.
    pub fn query_payload(
        &mut self,
        command: &str,
        expected_prefix: &[&str],
    ) -> Result<Option<(String, Vec<u8>)>, DiagError> {
        let lines = self.exchange(command)?;
        let grouped = parse_lines(&lines, self.state.headers_on);
        let map = MergedPayloadMap::build(&grouped, self.state.headers_on);
        Ok(find_prefix(&map, expected_prefix).map(|(ecu, payload)| (ecu.to_string(), tokens_to_bytes(&payload))))
    }

    /// Sets the active protocol and re-verifies `0100`, updating
    /// [AdapterState::protocol] on success. Used by UDS transport
    /// configuration (spec.md §4.7) and discovery (spec.md §4.8).
    pub fn set_protocol(&mut self, code: ProtocolCode) -> Result<(), DiagError> {
        self.send_at(&format!("ATSP{code}"))?;
        self.state.protocol = Some(code);
        Ok(())
    }

    /// Sets headers-on/off, updating [AdapterState::headers_on].
    pub fn set_headers_on(&mut self, on: bool) -> Result<(), DiagError> {
        self.set_headers(on)
    }

    /// Access to the underlying transport for components (K-Line apply,
    /// UDS transport configuration) that need raw AT-command sequencing
    /// beyond what [ElmDriver] exposes directly.
    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }
}

fn concat_hex(lines: &[String]) -> String {
    lines
        .iter()
        .filter(|l| !is_noise(l))
        .flat_map(|l| l.chars())
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_ascii_uppercase()
}

fn tokens_to_bytes(tokens: &[String]) -> Vec<u8> {
    tokens
        .iter()
        .filter_map(|t| u8::from_str_radix(t, 16).ok())
        .collect()
}

/// Transient pseudo-errors the OBD-II retry wrapper (spec.md §7) retries
/// once on: `NO DATA`, `UNABLE TO CONNECT`, `BUFFER FULL`, `ERROR`,
/// `STOPPED`, `CAN ERROR`, or a bare `?`.
fn contains_transient_error(lines: &[String]) -> bool {
    lines.iter().any(|l| {
        let up = l.trim().to_ascii_uppercase();
        up == "?"
            || up.contains("NO DATA")
            || up.contains("UNABLE TO CONNECT")
            || up.contains("BUFFER FULL")
            || up.contains("ERROR")
            || up.contains("STOPPED")
            || up.contains("CAN ERROR")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_hex_skips_noise_lines() {
        let lines = vec!["SEARCHING...".to_string(), "41 00 BE 1F B8 13".to_string()];
        assert_eq!(concat_hex(&lines), "4100BE1FB813");
    }

    #[test]
    fn transient_error_detection() {
        assert!(contains_transient_error(&["NO DATA".to_string()]));
        assert!(contains_transient_error(&["?".to_string()]));
        assert!(!contains_transient_error(&["41 0C 1A F8".to_string()]));
    }

    #[test]
    fn tokens_to_bytes_parses_hex() {
        let tokens = vec!["41".to_string(), "0C".to_string(), "1A".to_string(), "F8".to_string()];
        assert_eq!(tokens_to_bytes(&tokens), vec![0x41, 0x0C, 0x1A, 0xF8]);
    }
}
