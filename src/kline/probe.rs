//! Probe-pattern heuristics: verify-probe success patterns and
//! query response classification. See spec.md §4.9 "Verify" and "Query
//! with profile".
//!
//! Grounded on `original_source/obd/legacy_kline/runtime/probes.py` and
//! `quirks.py`.

use super::Quirks;
use crate::line_parser::is_noise;

/// Error-text markers that immediately fail a verify probe or mark a
/// query response permanently failed, regardless of quirks.
const ERROR_MARKERS: &[&str] = &["NO DATA", "UNABLE TO CONNECT", "ERROR", "DISCONNECTED"];

/// Strips non-hex characters from `lines` and concatenates into one
/// uppercase hex blob, skipping noise lines. Used by [probe_ok] and the
/// "any valid hex blob" fallback pattern.
pub fn extract_hex_blob(lines: &[String]) -> String {
    lines
        .iter()
        .filter(|l| !is_noise(l))
        .flat_map(|l| l.chars())
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_ascii_uppercase()
}

fn contains_error_marker(lines: &[String]) -> bool {
    lines.iter().any(|l| {
        let up = l.trim().to_ascii_uppercase();
        ERROR_MARKERS.iter().any(|m| up.contains(m))
    })
}

/// Returns true if `lines` (the response to `probe_command`) matches that
/// probe's canonical success pattern (spec.md §4.9 "Verify" probe table).
/// Error-text lines fail the probe immediately regardless of pattern.
pub fn probe_ok(probe_command: &str, lines: &[String]) -> bool {
    if contains_error_marker(lines) {
        return false;
    }
    let blob = extract_hex_blob(lines);
    match probe_command {
        "0100" => blob.contains("4100") && blob.len() >= 12,
        "010C" => blob.contains("410C") && blob.len() >= 10,
        "0105" => blob.contains("4105") && blob.len() >= 10,
        "0902" => blob.contains("4902") && blob.len() >= 10,
        _ => !blob.is_empty() && blob.len() >= 8,
    }
}

/// The outcome of classifying one query response (spec.md §4.9 "Query
/// with profile" step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// A non-noise hex token was present; the request succeeded.
    Ok,
    /// Transient failure; the caller should retry.
    Retryable,
    /// Non-transient failure; the caller should stop retrying.
    PermanentFail,
    /// `DISCONNECTED` was observed; the caller must stop immediately.
    HardFail,
}

/// True if `lines` contains a `DISCONNECTED` marker, meaning the query
/// must return immediately without any further retry.
pub fn response_is_hard_fail(lines: &[String]) -> bool {
    lines.iter().any(|l| l.trim().to_ascii_uppercase().contains("DISCONNECTED"))
}

/// True if `class` should be retried by [super::query_with_profile].
pub fn is_retryable_response(class: ResponseClass) -> bool {
    class == ResponseClass::Retryable
}

/// Classifies a query response per spec.md §4.9 step 3: `ok` if any
/// non-noise hex token is present; `retryable` if the response is empty,
/// contains `ERROR`, contains `UNABLE TO CONNECT` (unless
/// [Quirks::IGNORE_UNABLE_TO_CONNECT] is set), or contains `NO DATA` and
/// [Quirks::RETRY_ON_NO_DATA] is set; otherwise `permanent_fail`.
/// `DISCONNECTED` is checked by the caller via [response_is_hard_fail]
/// before this is reached.
pub fn classify_response(lines: &[String], quirks: Quirks) -> ResponseClass {
    if response_is_hard_fail(lines) {
        return ResponseClass::HardFail;
    }

    let blob = extract_hex_blob(lines);
    if !blob.is_empty() {
        return ResponseClass::Ok;
    }

    if lines.is_empty() {
        return ResponseClass::Retryable;
    }

    let joined_upper = lines.join(" ").to_ascii_uppercase();
    if joined_upper.contains("ERROR") {
        return ResponseClass::Retryable;
    }
    if joined_upper.contains("UNABLE TO CONNECT") && !quirks.contains(Quirks::IGNORE_UNABLE_TO_CONNECT) {
        return ResponseClass::Retryable;
    }
    if joined_upper.contains("NO DATA") && quirks.contains(Quirks::RETRY_ON_NO_DATA) {
        return ResponseClass::Retryable;
    }

    ResponseClass::PermanentFail
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_0100_requires_pattern_and_length() {
        assert!(probe_ok("0100", &["41 00 BE 1F B8 13".to_string()]));
        assert!(!probe_ok("0100", &["41 00".to_string()]));
        assert!(!probe_ok("0100", &["NO DATA".to_string()]));
    }

    #[test]
    fn fallback_pattern_accepts_any_long_enough_hex_blob() {
        assert!(probe_ok("0902", &["49 02 01 31 43 34".to_string()]));
    }

    #[test]
    fn classify_hard_fail_on_disconnected() {
        let class = classify_response(&["DISCONNECTED".to_string()], Quirks::empty());
        assert_eq!(class, ResponseClass::HardFail);
    }

    #[test]
    fn classify_no_data_retryable_only_with_quirk() {
        let lines = vec!["NO DATA".to_string()];
        assert_eq!(classify_response(&lines, Quirks::empty()), ResponseClass::PermanentFail);
        assert_eq!(
            classify_response(&lines, Quirks::RETRY_ON_NO_DATA),
            ResponseClass::Retryable
        );
    }

    #[test]
    fn classify_unable_to_connect_ignored_by_quirk() {
        let lines = vec!["UNABLE TO CONNECT".to_string()];
        assert_eq!(classify_response(&lines, Quirks::empty()), ResponseClass::Retryable);
        assert_eq!(
            classify_response(&lines, Quirks::IGNORE_UNABLE_TO_CONNECT),
            ResponseClass::PermanentFail
        );
    }

    #[test]
    fn classify_ok_when_hex_present() {
        let lines = vec!["41 00 BE 1F B8 13".to_string()];
        assert_eq!(classify_response(&lines, Quirks::empty()), ResponseClass::Ok);
    }
}
