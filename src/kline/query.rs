//! Policy-driven query execution: settle, optional warmup, then
//! retry-with-backoff. See spec.md §4.9 "Query with profile".

use super::probe::{classify_response, response_is_hard_fail, ResponseClass};
use super::{KLinePolicy, KLineProfile};
use crate::elm::ElmDriver;
use crate::DiagError;

/// Runs one OBD request through `profile`'s derived `policy`:
///
/// 1. Settles for `policy.initial_settle_delay`.
/// 2. If warmup is enabled, issues `policy.warmup_probe` up to
///    `policy.warmup_attempts` times, stopping early on an `Ok` or
///    non-retryable classification.
/// 3. Sends `command` up to `policy.retries + 1` times; a `DISCONNECTED`
///    response returns immediately (hard fail); `Ok`/`PermanentFail`
///    classifications return immediately; `Retryable` sleeps
///    `inter_request_delay + backoff * attempt` and retries.
pub fn query_with_profile(
    elm: &mut ElmDriver,
    profile: &KLineProfile,
    policy: &KLinePolicy,
    command: &str,
) -> Result<Vec<String>, DiagError> {
    std::thread::sleep(policy.initial_settle_delay);

    if policy.warmup_enabled {
        if let Some(probe) = &policy.warmup_probe {
            for attempt in 0..policy.warmup_attempts {
                let lines = elm.exchange(probe)?;
                if response_is_hard_fail(&lines) {
                    return Ok(lines);
                }
                let class = classify_response(&lines, profile.quirks);
                if class != ResponseClass::Retryable {
                    break;
                }
                if attempt + 1 < policy.warmup_attempts {
                    std::thread::sleep(policy.warmup_delay);
                }
            }
        }
    }

    let mut last_lines = Vec::new();
    for attempt in 0..=policy.retries {
        let lines = elm.exchange(command)?;
        if response_is_hard_fail(&lines) {
            return Ok(lines);
        }
        let class = classify_response(&lines, profile.quirks);
        last_lines = lines;
        match class {
            ResponseClass::Ok | ResponseClass::PermanentFail => return Ok(last_lines),
            ResponseClass::HardFail => return Ok(last_lines),
            ResponseClass::Retryable => {
                if attempt < policy.retries {
                    std::thread::sleep(policy.inter_request_delay + policy.backoff * attempt);
                }
            }
        }
    }
    Ok(last_lines)
}
