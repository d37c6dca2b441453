//! Mode 09 (VIN read). See spec.md §4.5.

use crate::elm::ElmDriver;
use crate::DiagError;

/// A Mode 09 PID 02 VIN read result: the raw decoded ASCII string
/// (`vin_raw`) and, if it validates, the 17-character VIN.
#[derive(Debug, Clone)]
pub struct VinReading {
    /// Raw ASCII decoded from the response payload, before validation.
    pub vin_raw: String,
    /// The 17-character VIN, if `vin_raw` validates against the VIN regex.
    pub vin: Option<String>,
}

/// Matches `^[A-HJ-NPR-Z0-9]{17}$` (I, O, Q excluded, per ISO 3779).
fn is_valid_vin(candidate: &str) -> bool {
    candidate.len() == 17
        && candidate
            .chars()
            .all(|c| c.is_ascii_digit() || (c.is_ascii_uppercase() && !matches!(c, 'I' | 'O' | 'Q')))
}

/// Requests `0902`, expecting prefix `["49","02"]`. Unconditionally drops
/// the byte immediately after the prefix (normally the `01` subframe
/// marker, but dropped regardless of its value since a response that omits
/// the literal marker still shifts its first data byte into that slot),
/// decodes the remaining bytes as ASCII (bytes outside `[0x20,0x7E]` are
/// dropped), trims to 17 characters, and validates.
pub fn read_vin(elm: &mut ElmDriver) -> Result<Option<VinReading>, DiagError> {
    let found = elm.query_payload("0902", &["49", "02"])?;
    let Some((_, payload)) = found else {
        return Ok(None);
    };
    let data = &payload[3.min(payload.len())..];

    let ascii: String = data
        .iter()
        .copied()
        .filter(|&b| (0x20..=0x7E).contains(&b))
        .map(|b| b as char)
        .collect();
    let vin_raw = ascii.chars().take(17).collect::<String>();
    let vin = is_valid_vin(&vin_raw).then(|| vin_raw.clone());

    Ok(Some(VinReading { vin_raw, vin }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Transport, TransportError};
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn valid_vin_passes_regex() {
        assert!(is_valid_vin("1C4RJFAG105KL5732"));
    }

    #[test]
    fn ambiguous_letters_rejected() {
        assert!(!is_valid_vin("1C4RJFAGIO5KL57320"));
        assert!(!is_valid_vin("short"));
    }

    /// A [Transport] double keyed by uppercased, trimmed command text,
    /// answering `OK` to anything not scripted (the AT housekeeping
    /// [ElmDriver::open] issues).
    struct ScriptedTransport {
        responses: HashMap<String, Vec<String>>,
    }

    impl ScriptedTransport {
        fn new() -> Self {
            Self { responses: HashMap::new() }
        }

        fn on(mut self, command: &str, response: &str) -> Self {
            self.responses.insert(
                command.trim().to_ascii_uppercase(),
                response.split_whitespace().map(str::to_string).collect(),
            );
            self
        }
    }

    impl Transport for ScriptedTransport {
        fn exchange(
            &mut self,
            command: &str,
            _timeout: Duration,
            _silence_timeout: Duration,
            _min_wait_before_silence: Duration,
        ) -> Result<Vec<String>, TransportError> {
            let key = command.trim().to_ascii_uppercase();
            Ok(self.responses.get(&key).cloned().unwrap_or_else(|| vec!["OK".to_string()]))
        }
    }

    fn connect(transport: ScriptedTransport) -> ElmDriver {
        ElmDriver::open(Box::new(transport), "test".to_string(), 38_400, false).unwrap()
    }

    #[test]
    fn read_vin_skips_literal_subframe_marker() {
        // spec.md §8 scenario 3: subframe marker 01, then ASCII VIN bytes.
        let transport = ScriptedTransport::new()
            .on("ATZ", "ELM327 v1.5")
            .on("0100", "41 00 BE 3E B8 13")
            .on("0902", "49 02 01 31 43 34 52 4A 46 41 47 31 30 35 4B 4C 35 37 33 32");
        let mut elm = connect(transport);

        let reading = read_vin(&mut elm).unwrap().expect("a VIN response was scripted");
        assert_eq!(reading.vin.as_deref(), Some("1C4RJFAG105KL5732"));
    }

    #[test]
    fn read_vin_drops_the_byte_after_the_prefix_even_without_a_literal_marker() {
        // A response that omits the literal `01` marker still has its
        // would-be first data byte land in that slot, so it must be
        // dropped unconditionally, the same as when the marker is present.
        let transport = ScriptedTransport::new()
            .on("ATZ", "ELM327 v1.5")
            .on("0100", "41 00 BE 3E B8 13")
            .on("0902", "49 02 00 31 43 34 52 4A 46 41 47 31 30 35 4B 4C 35 37 33 32 FF");
        let mut elm = connect(transport);

        let reading = read_vin(&mut elm).unwrap().expect("a VIN response was scripted");
        assert_eq!(reading.vin.as_deref(), Some("1C4RJFAG105KL5732"));
    }
}
