//! Apply/verify/detect state machine for K-Line profile candidates. See
//! spec.md §4.9 "Candidate detection".

use std::time::Duration;

use super::probe::probe_ok;
use super::{policy_for_profile, KLineContext, KLineFamily, KLinePolicy, KLineProfile, Quirks};
use crate::elm::ElmDriver;
use crate::DiagError;

fn inter_command_delay(profile: &KLineProfile) -> Duration {
    if profile.quirks.contains(Quirks::EXTRA_INTER_COMMAND_DELAY) {
        profile.inter_command_delay + super::EXTRA_INTER_COMMAND_DELAY
    } else {
        profile.inter_command_delay
    }
}

fn send_at(elm: &mut ElmDriver, ctx: &mut KLineContext, cmd: &str) -> Result<Vec<String>, DiagError> {
    ctx.last_at_command = Some(cmd.to_string());
    let lines = elm.exchange(cmd)?;
    ctx.last_lines_preview = lines.iter().take(3).cloned().collect();
    Ok(lines)
}

/// Applies `profile` to the adapter: soft reset, quirk-driven header
/// override, the profile's init list, then its options list, with an
/// inter-command delay between every AT command. See spec.md §4.9 step 1.
pub fn apply(elm: &mut ElmDriver, profile: &KLineProfile) -> Result<(), DiagError> {
    let mut ctx = KLineContext {
        profile_name: profile.name.clone(),
        ..Default::default()
    };
    let delay = inter_command_delay(profile);

    let reset_sequence = ["AT D", "ATE0", "ATL0", "ATS0", "ATH1"];
    for cmd in reset_sequence {
        send_at(elm, &mut ctx, cmd).map_err(|_| DiagError::KLineApplyError(ctx.clone()))?;
        std::thread::sleep(delay);
    }

    if profile.quirks.contains(Quirks::FORCE_HEADERS_ON) {
        send_at(elm, &mut ctx, "ATH1").map_err(|_| DiagError::KLineApplyError(ctx.clone()))?;
        std::thread::sleep(delay);
    } else if profile.quirks.contains(Quirks::FORCE_HEADERS_OFF) {
        send_at(elm, &mut ctx, "ATH0").map_err(|_| DiagError::KLineApplyError(ctx.clone()))?;
        std::thread::sleep(delay);
    }

    send_at(elm, &mut ctx, &format!("ATSP{}", profile.family.at_protocol_code()))
        .map_err(|_| DiagError::KLineApplyError(ctx.clone()))?;
    std::thread::sleep(delay);

    for cmd in &profile.init {
        send_at(elm, &mut ctx, cmd).map_err(|_| DiagError::KLineApplyError(ctx.clone()))?;
        std::thread::sleep(delay);
    }
    for cmd in &profile.options {
        send_at(elm, &mut ctx, cmd).map_err(|_| DiagError::KLineApplyError(ctx.clone()))?;
        std::thread::sleep(delay);
    }

    Ok(())
}

/// Verifies an applied profile: tries every probe in
/// [KLineProfile::verify_obd] in order via [super::query_with_profile],
/// returning the success reason of the first probe that matches its
/// canonical pattern. Fails with [DiagError::KLineVerifyError] if every
/// probe fails.
pub fn verify(elm: &mut ElmDriver, profile: &KLineProfile, policy: &KLinePolicy) -> Result<String, DiagError> {
    let mut ctx = KLineContext {
        profile_name: profile.name.clone(),
        ..Default::default()
    };
    for probe in &profile.verify_obd {
        let lines = super::query_with_profile(elm, profile, policy, probe)?;
        ctx.last_at_command = Some(probe.clone());
        ctx.last_lines_preview = lines.iter().take(3).cloned().collect();
        if probe_ok(probe, &lines) {
            return Ok(format!("OK: probe {probe}; lines={lines:?}"));
        }
    }
    Err(DiagError::KLineVerifyError(ctx))
}

/// One profile's apply/verify attempt outcome, recorded for
/// [DiagError::KLineDetectError]'s full attempt report.
#[derive(Debug, Clone)]
pub struct DetectAttempt {
    /// The profile that was tried.
    pub profile_name: String,
    /// `Ok(reason)` on success, `Err(message)` otherwise.
    pub outcome: Result<String, String>,
}

/// Iterates `profiles` in order, applying and verifying each. The first
/// profile whose first successful probe passes wins. See spec.md §4.9 step
/// 3 "Detect".
pub fn detect_candidate(
    elm: &mut ElmDriver,
    profiles: &[KLineProfile],
    base_policy: &KLinePolicy,
) -> Result<(KLineProfile, String), DiagError> {
    let mut attempts = Vec::with_capacity(profiles.len());

    for profile in profiles {
        let policy = policy_for_profile(profile, base_policy);
        let attempt_result = apply(elm, profile).and_then(|_| verify(elm, profile, &policy));
        match attempt_result {
            Ok(reason) => {
                attempts.push(DetectAttempt {
                    profile_name: profile.name.clone(),
                    outcome: Ok(reason.clone()),
                });
                return Ok((profile.clone(), reason));
            }
            Err(e) => {
                attempts.push(DetectAttempt {
                    profile_name: profile.name.clone(),
                    outcome: Err(e.to_string()),
                });
            }
        }
    }

    Err(DiagError::KLineDetectError(KLineContext {
        profile_name: "<none>".to_string(),
        last_at_command: None,
        last_lines_preview: attempts
            .iter()
            .map(|a| format!("{}: {:?}", a.profile_name, a.outcome))
            .collect(),
    }))
}
