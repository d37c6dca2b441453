//! Classifies and tokenises raw ELM327 response lines.
//!
//! A line is noise if it starts with one of the adapter's pseudo-error
//! prefixes, equals `OK`, or is a version banner. Non-noise lines are
//! stripped to `[0-9A-Fa-f ]` and split into uppercase tokens; in
//! headers-on mode the first token names the responding ECU.

/// Noise-line prefixes emitted by the ELM327 that carry no payload data.
pub const NOISE_PREFIXES: &[&str] = &[
    "SEARCHING",
    "BUS INIT",
    "UNABLE TO CONNECT",
    "STOPPED",
    "NO DATA",
    "CAN ERROR",
    "BUFFER FULL",
    "BUS BUSY",
    "BUS ERROR",
    "DATA ERROR",
];

/// Identifier used to group all response lines together when the adapter
/// is configured with headers off.
pub const HEADLESS_ECU: &str = "NOHDR";

/// Returns true if `line` carries no payload data (a pseudo-error, a lone
/// `OK`, or an `ELM327` version banner).
pub fn is_noise(line: &str) -> bool {
    let up = line.trim().to_ascii_uppercase();
    if up.is_empty() {
        return true;
    }
    if up == "OK" {
        return true;
    }
    if up.starts_with("ELM327") {
        return true;
    }
    NOISE_PREFIXES.iter().any(|p| up.starts_with(p))
}

/// Strips everything but hex digits and spaces from `line`, returning the
/// remaining whitespace-separated tokens, uppercased.
pub fn normalize_tokens(line: &str) -> Vec<String> {
    let cleaned: String = line
        .chars()
        .filter(|c| c.is_ascii_hexdigit() || *c == ' ')
        .collect();
    cleaned
        .split_whitespace()
        .map(|t| t.to_ascii_uppercase())
        .collect()
}

/// Returns true if every token is valid hex and non-empty.
pub fn is_hexish(tokens: &[String]) -> bool {
    !tokens.is_empty() && tokens.iter().all(|t| !t.is_empty() && t.chars().all(|c| c.is_ascii_hexdigit()))
}

/// One grouped ECU response: the responding ECU's identifier and its
/// ordered token sequence (uppercase two-hex-character bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcuResponse {
    /// ECU identifier (the first token of the line in headers-on mode, or
    /// [HEADLESS_ECU] when headers are off).
    pub ecu: String,
    /// Ordered hex-byte tokens following the ECU identifier.
    pub tokens: Vec<String>,
}

/// Splits the raw buffer returned by a [crate::transport::Transport] exchange
/// into lines, drops noise lines, and groups the remainder by ECU.
///
/// Lines are fed to this function already split on `\r`/`\n`/`>` and
/// whitespace-trimmed by the transport (per the exchange contract); this
/// function performs the noise classification, hex tokenisation, and ECU
/// grouping on top of that.
pub fn parse_lines(lines: &[String], headers_on: bool) -> Vec<EcuResponse> {
    let mut grouped: Vec<EcuResponse> = Vec::new();
    for line in lines {
        if is_noise(line) {
            continue;
        }
        let tokens = normalize_tokens(line);
        if !is_hexish(&tokens) || tokens.is_empty() {
            continue;
        }
        let (ecu, rest) = if headers_on {
            (tokens[0].clone(), tokens[1..].to_vec())
        } else {
            (HEADLESS_ECU.to_string(), tokens)
        };
        match grouped.iter_mut().find(|g| g.ecu == ecu) {
            Some(g) => g.tokens.extend(rest),
            None => grouped.push(EcuResponse { ecu, tokens: rest }),
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_lines_are_recognized() {
        assert!(is_noise("SEARCHING..."));
        assert!(is_noise("BUS INIT: OK"));
        assert!(is_noise("OK"));
        assert!(is_noise("ELM327 v1.5"));
        assert!(is_noise(""));
        assert!(!is_noise("7E8 06 41 0C 1A F8"));
    }

    #[test]
    fn tokenizes_and_uppercases() {
        let toks = normalize_tokens("7e8 06 41 0c 1a f8");
        assert_eq!(toks, vec!["7E8", "06", "41", "0C", "1A", "F8"]);
    }

    #[test]
    fn groups_by_ecu_headers_on() {
        let lines = vec![
            "7E8 06 41 0C 1A F8".to_string(),
            "7E0 04 41 0C 00 00".to_string(),
        ];
        let grouped = parse_lines(&lines, true);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].ecu, "7E8");
        assert_eq!(grouped[0].tokens, vec!["06", "41", "0C", "1A", "F8"]);
    }

    #[test]
    fn headers_off_uses_sentinel_identifier() {
        let lines = vec!["41 0C 1A F8".to_string()];
        let grouped = parse_lines(&lines, false);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].ecu, HEADLESS_ECU);
    }

    #[test]
    fn drops_non_hex_lines() {
        let lines = vec!["SEARCHING...".to_string(), "7E8 06 41 0C 1A F8".to_string()];
        let grouped = parse_lines(&lines, true);
        assert_eq!(grouped.len(), 1);
    }
}
