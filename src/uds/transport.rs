//! UDS transport configuration and per-request send/receive. See spec.md
//! §4.7.

use crate::elm::ElmDriver;
use crate::isotp::MergedPayloadMap;
use crate::line_parser::{parse_lines, HEADLESS_ECU};
use crate::{DiagError, DiagServerResult};

use super::{parse_response, UdsSid};

/// UDS transport state: tx/rx CAN IDs, protocol code, and headers-on flag.
/// Configuring re-issues the full AT sequence against the driver's adapter.
#[derive(Debug, Clone)]
pub struct UdsTransport {
    tx_id: String,
    rx_id: String,
    protocol: char,
    headers_on: bool,
}

impl UdsTransport {
    /// Configures `elm` for UDS communication with `tx_id`/`rx_id` (3-hex-char
    /// 11-bit IDs or similar) on `protocol`, running the configure sequence:
    /// `ATSP{protocol}`, `ATE0`, `ATL0`, `ATS0`, `ATH1`/`ATH0`, `ATSH{tx_id}`.
    /// A failing step raises [DiagError::TransportError].
    pub fn configure(elm: &mut ElmDriver, tx_id: &str, rx_id: &str, protocol: char, headers_on: bool) -> DiagServerResult<Self> {
        let mut run = |cmd: String| -> DiagServerResult<()> {
            elm.exchange(&cmd)
                .map(|_| ())
                .map_err(|e| DiagError::TransportError(format!("{cmd}: {e}")))
        };

        run(format!("ATSP{protocol}"))?;
        run("ATE0".to_string())?;
        run("ATL0".to_string())?;
        run("ATS0".to_string())?;
        run(if headers_on { "ATH1".to_string() } else { "ATH0".to_string() })?;
        run(format!("ATSH{tx_id}"))?;

        Ok(Self {
            tx_id: tx_id.to_string(),
            rx_id: rx_id.to_string(),
            protocol,
            headers_on,
        })
    }

    /// The configured tx-id.
    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    /// The configured rx-id.
    pub fn rx_id(&self) -> &str {
        &self.rx_id
    }

    /// Sends `[sid, ...data]` as space-separated hex, one raw command.
    /// Groups and merges the response by ECU, selects the configured
    /// rx-id's bytes (or the sentinel group in headers-off mode), and
    /// validates against spec.md §4.6's failure semantics.
    pub fn send(&self, elm: &mut ElmDriver, sid: UdsSid, data: &[u8]) -> DiagServerResult<Vec<u8>> {
        let mut frame = vec![sid as u8];
        frame.extend_from_slice(data);
        let command: String = frame.iter().map(|b| format!("{b:02X} ")).collect::<String>().trim_end().to_string();

        let lines = elm.exchange(&command)?;
        let grouped = parse_lines(&lines, self.headers_on);
        let map = MergedPayloadMap::build(&grouped, self.headers_on);

        let key = if self.headers_on { self.rx_id.as_str() } else { HEADLESS_ECU };
        let tokens = map
            .get(key)
            .ok_or_else(|| DiagError::ResponseError("Empty".to_string()))?;
        let bytes: Vec<u8> = tokens.iter().filter_map(|t| u8::from_str_radix(t, 16).ok()).collect();

        parse_response(sid, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_frame_hex_formatting() {
        let frame: Vec<u8> = vec![0x22, 0xF1, 0x90];
        let command: String = frame.iter().map(|b| format!("{b:02X} ")).collect::<String>().trim_end().to_string();
        assert_eq!(command, "22 F1 90");
    }
}
