//! Legacy K-Line profile/quirk/policy system: candidate selection,
//! apply/verify, quirks-driven retry/timing policy, and session routing.
//! See spec.md §4.9 and the `K-Line Profile`/`Quirk Set`/`K-Line Policy`
//! data model in §3.
//!
//! Grounded on `original_source/obd/legacy_kline/*` and
//! `original_source/obd/kline/*` (two parallel implementations; this
//! crate's [KLinePolicy] carries the `kline` variant's warmup fields, as
//! spec.md §3 names them explicitly). See DESIGN.md.

mod detect;
mod probe;
mod query;

pub use detect::{apply, detect_candidate, verify, DetectAttempt};
pub use probe::{classify_response, is_retryable_response, response_is_hard_fail, ResponseClass};
pub use query::query_with_profile;

use std::fmt;
use std::time::Duration;

use bitflags::bitflags;

bitflags! {
    /// Named behavioural flags that modify a profile's retry/timing
    /// policy. See spec.md §3 "Quirk Set".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Quirks: u8 {
        /// Override headers-on regardless of the caller's default.
        const FORCE_HEADERS_ON = 1 << 0;
        /// Override headers-off regardless of the caller's default.
        const FORCE_HEADERS_OFF = 1 << 1;
        /// Add extra delay between requests within a query.
        const EXTRA_INTER_REQUEST_DELAY = 1 << 2;
        /// Add extra delay between AT commands during apply.
        const EXTRA_INTER_COMMAND_DELAY = 1 << 3;
        /// Treat `NO DATA` as retryable instead of a permanent failure.
        const RETRY_ON_NO_DATA = 1 << 4;
        /// Treat `UNABLE TO CONNECT` as non-retryable (don't retry on it).
        const IGNORE_UNABLE_TO_CONNECT = 1 << 5;
        /// Require a warmup probe before the first real request.
        const REQUIRE_WARMUP_PROBE = 1 << 6;
    }
}

/// The three K-Line protocol families, each with its own ELM327 `ATSP`
/// code (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KLineFamily {
    /// ISO 9141-2, `ATSP3`.
    Iso9141_2,
    /// KWP2000 5-baud init, `ATSP4`.
    Kwp2000FiveBaud,
    /// KWP2000 fast init, `ATSP5`.
    Kwp2000Fast,
}

impl KLineFamily {
    /// The `ATSP` argument for this family.
    pub fn at_protocol_code(self) -> char {
        match self {
            KLineFamily::Iso9141_2 => '3',
            KLineFamily::Kwp2000FiveBaud => '4',
            KLineFamily::Kwp2000Fast => '5',
        }
    }
}

/// An immutable K-Line profile definition. See spec.md §3 "K-Line Profile".
#[derive(Debug, Clone)]
pub struct KLineProfile {
    /// Human-readable profile name, used in error context and detection
    /// reports.
    pub name: String,
    /// Protocol family this profile targets.
    pub family: KLineFamily,
    /// Ordered AT/init command list issued during `apply`.
    pub init: Vec<String>,
    /// Optional extra AT commands issued after `init`.
    pub options: Vec<String>,
    /// Non-empty list of OBD requests tried in order during `verify`.
    pub verify_obd: Vec<String>,
    /// Per-profile request timeout.
    pub request_timeout: Duration,
    /// Delay inserted between each command during `apply`.
    pub inter_command_delay: Duration,
    /// Behavioural quirks affecting retry/timing policy.
    pub quirks: Quirks,
    /// Free-text notes (vehicle coverage, caveats), not used by the logic.
    pub notes: String,
}

/// Context attached to a K-Line error: which profile was active, the last
/// AT command sent, and a short preview of the last response lines.
#[derive(Debug, Clone, Default)]
pub struct KLineContext {
    /// Name of the profile being applied/verified/detected.
    pub profile_name: String,
    /// Last AT command issued before the failure.
    pub last_at_command: Option<String>,
    /// Preview (first few lines) of the last response received.
    pub last_lines_preview: Vec<String>,
}

impl fmt::Display for KLineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "profile={}", self.profile_name)?;
        if let Some(cmd) = &self.last_at_command {
            write!(f, " last_cmd={cmd}")?;
        }
        if !self.last_lines_preview.is_empty() {
            write!(f, " last_lines={:?}", self.last_lines_preview)?;
        }
        Ok(())
    }
}

/// Retry/timing policy, derived from a base policy plus a profile's
/// quirks. See spec.md §3 "K-Line Policy" and §4.9 "Policy derivation".
#[derive(Debug, Clone, Copy)]
pub struct KLinePolicy {
    /// Number of retries after the first attempt.
    pub retries: u32,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Delay between requests within a query.
    pub inter_request_delay: Duration,
    /// Settle delay observed before the first request of a query.
    pub initial_settle_delay: Duration,
    /// Linear backoff added per retry attempt (`inter_request_delay +
    /// backoff * attempt`).
    pub backoff: Duration,
    /// Whether a warmup probe is issued before the first real request.
    pub warmup_enabled: bool,
    /// The warmup probe command, if [Self::warmup_enabled].
    pub warmup_probe: Option<String>,
    /// Maximum warmup attempts.
    pub warmup_attempts: u32,
    /// Delay between warmup attempts.
    pub warmup_delay: Duration,
}

impl Default for KLinePolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            timeout: Duration::from_secs(4),
            inter_request_delay: Duration::from_millis(50),
            initial_settle_delay: Duration::from_millis(100),
            backoff: Duration::from_millis(100),
            warmup_enabled: false,
            warmup_probe: Some("0100".to_string()),
            warmup_attempts: 1,
            warmup_delay: Duration::from_millis(200),
        }
    }
}

/// Minimum inter-request delay enforced when
/// [Quirks::EXTRA_INTER_REQUEST_DELAY] is set.
const EXTRA_INTER_REQUEST_DELAY_FLOOR: Duration = Duration::from_millis(120);
/// Extra per-command delay added during `apply` when
/// [Quirks::EXTRA_INTER_COMMAND_DELAY] is set.
pub(crate) const EXTRA_INTER_COMMAND_DELAY: Duration = Duration::from_millis(80);

/// Derives a [KLinePolicy] for `profile` from `base`, applying the
/// quirk-driven overrides in spec.md §4.9 "Policy derivation":
/// `timeout` takes the profile's `request_timeout`; `require_warmup_probe`
/// enables warmup with at least one attempt; `extra_inter_request_delay`
/// floors `inter_request_delay` at 120ms.
pub fn policy_for_profile(profile: &KLineProfile, base: &KLinePolicy) -> KLinePolicy {
    let mut policy = *base;
    policy.timeout = profile.request_timeout;
    if profile.quirks.contains(Quirks::REQUIRE_WARMUP_PROBE) {
        policy.warmup_enabled = true;
        policy.warmup_attempts = policy.warmup_attempts.max(1);
    }
    if profile.quirks.contains(Quirks::EXTRA_INTER_REQUEST_DELAY) {
        policy.inter_request_delay = policy.inter_request_delay.max(EXTRA_INTER_REQUEST_DELAY_FLOOR);
    }
    policy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(quirks: Quirks) -> KLineProfile {
        KLineProfile {
            name: "test".to_string(),
            family: KLineFamily::Iso9141_2,
            init: vec![],
            options: vec![],
            verify_obd: vec!["0100".to_string()],
            request_timeout: Duration::from_secs(2),
            inter_command_delay: Duration::from_millis(20),
            quirks,
            notes: String::new(),
        }
    }

    #[test]
    fn warmup_quirk_enables_warmup_with_min_one_attempt() {
        let base = KLinePolicy { warmup_attempts: 0, ..KLinePolicy::default() };
        let derived = policy_for_profile(&profile(Quirks::REQUIRE_WARMUP_PROBE), &base);
        assert!(derived.warmup_enabled);
        assert!(derived.warmup_attempts >= 1);
    }

    #[test]
    fn extra_delay_quirk_floors_inter_request_delay() {
        let base = KLinePolicy { inter_request_delay: Duration::from_millis(10), ..KLinePolicy::default() };
        let derived = policy_for_profile(&profile(Quirks::EXTRA_INTER_REQUEST_DELAY), &base);
        assert_eq!(derived.inter_request_delay, EXTRA_INTER_REQUEST_DELAY_FLOOR);
    }

    #[test]
    fn no_quirks_leaves_policy_otherwise_unchanged() {
        let base = KLinePolicy::default();
        let derived = policy_for_profile(&profile(Quirks::empty()), &base);
        assert_eq!(derived.retries, base.retries);
        assert!(!derived.warmup_enabled);
    }
}
