//! UDS module discovery: protocol/address sweep, VIN and DTC
//! confirmation, and brand signature overlay. See spec.md §4.8.

use std::time::{Duration, Instant};

use crate::elm::ElmDriver;
use crate::isotp::MergedPayloadMap;
use crate::line_parser::parse_lines;
use crate::vin_cache::{normalize_vin, VinCache, VinCacheEntry};
use crate::DiagError;

use super::{DtcFingerprint, UdsDtcRecord};

/// Discovery scan input. See spec.md §4.8.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// First 11-bit tx-id to probe (inclusive), e.g. `0x700`.
    pub id_start: u16,
    /// Last 11-bit tx-id to probe (inclusive), e.g. `0x7FF`.
    pub id_end: u16,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retries per tx-id probe.
    pub retries: u32,
    /// Also try 11-bit 250 kbps (`ATSP8`) in addition to 500 kbps (`ATSP6`).
    pub try_250k: bool,
    /// Also try 29-bit addressing (`ATSP7`/`ATSP9`).
    pub include_29bit: bool,
    /// Stop scanning further protocol candidates once one yields modules.
    pub stop_on_first: bool,
    /// Attempt to recover each module's VIN via `22 F1 90`.
    pub confirm_vin: bool,
    /// Attempt to recover each module's DTC fingerprint via `19 02 FF`.
    pub confirm_dtcs: bool,
    /// Brand hint used to select the signature overlay, if no VIN-derived
    /// brand is available.
    pub brand_hint: Option<String>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            id_start: 0x700,
            id_end: 0x7FF,
            timeout: Duration::from_millis(300),
            retries: 1,
            try_250k: false,
            include_29bit: false,
            stop_on_first: true,
            confirm_vin: true,
            confirm_dtcs: true,
            brand_hint: None,
        }
    }
}

/// Coarse module classification derived from a DTC fingerprint's dominant
/// top-nibble letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleType {
    /// Dominant letter `P`.
    Powertrain,
    /// Dominant letter `C` (ABS/ESC).
    ChassisAbsEsc,
    /// Dominant letter `B`.
    Body,
    /// Dominant letter `U` (network/gateway).
    NetworkGateway,
    /// No DTC fingerprint available to classify from.
    Unknown,
}

impl ModuleType {
    fn from_fingerprint(fp: &DtcFingerprint) -> Self {
        let counts = [
            (ModuleType::Powertrain, fp.powertrain),
            (ModuleType::ChassisAbsEsc, fp.chassis),
            (ModuleType::Body, fp.body),
            (ModuleType::NetworkGateway, fp.network),
        ];
        counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .filter(|(_, count)| *count > 0)
            .map(|(kind, _)| kind)
            .unwrap_or(ModuleType::Unknown)
    }
}

/// One `(tx_id, rx_id)` brand signature catalog entry; overlaid onto
/// discovered modules by exact pair match.
#[derive(Debug, Clone)]
pub struct BrandSignature {
    /// Brand/module family name.
    pub name: String,
    /// tx-id this signature matches.
    pub tx_id: String,
    /// rx-id this signature matches.
    pub rx_id: String,
}

/// One discovered module.
#[derive(Debug, Clone)]
pub struct DiscoveredModule {
    /// Canonical tx-id (the id this crate sends requests to).
    pub tx_id: String,
    /// The rx-id that answered first.
    pub rx_id: String,
    /// Additional rx-ids that answered the same tx-id.
    pub alternates: Vec<String>,
    /// Recovered VIN, if [DiscoveryOptions::confirm_vin] was set and a
    /// valid VIN was read.
    pub vin: Option<String>,
    /// True if a `7F 22 33` (security access denied) response was seen
    /// while confirming the VIN.
    pub requires_security: bool,
    /// DTC fingerprint, if [DiscoveryOptions::confirm_dtcs] was set.
    pub dtc_fingerprint: Option<DtcFingerprint>,
    /// Coarse classification derived from the DTC fingerprint.
    pub module_type: ModuleType,
    /// Brand catalog signature match, if any.
    pub brand_signature: Option<String>,
    /// Confidence score: +1 per accepted probe, +1 for VIN recovery, +1
    /// for DTC summary presence, +1 for a signature match.
    pub confidence: u32,
}

/// Full discovery result.
#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    /// Discovered modules, in scan order.
    pub modules: Vec<DiscoveredModule>,
    /// Wall-clock time the scan took.
    pub elapsed_s: f64,
}

/// Saves the adapter's protocol/headers state on construction and
/// restores it on drop, best-effort, regardless of how the scope exits.
/// Grounded on spec.md §5 "scoped acquisition... on any exit path, the
/// previous ATSP and ATH/ATS are re-issued on a best-effort basis."
struct ProtocolGuard<'a> {
    elm: &'a mut ElmDriver,
    original_protocol: Option<char>,
    original_headers_on: bool,
}

impl<'a> ProtocolGuard<'a> {
    fn new(elm: &'a mut ElmDriver) -> Self {
        let original_protocol = elm.state().protocol;
        let original_headers_on = elm.state().headers_on;
        Self {
            elm,
            original_protocol,
            original_headers_on,
        }
    }

    /// Reborrows the guarded driver without moving it out of the guard, so
    /// the guard stays intact (and its [Drop] restore still fires) for the
    /// rest of the enclosing scope.
    fn elm(&mut self) -> &mut ElmDriver {
        self.elm
    }
}

impl Drop for ProtocolGuard<'_> {
    fn drop(&mut self) {
        if let Some(protocol) = self.original_protocol {
            let _ = self.elm.set_protocol(protocol);
        }
        let _ = self.elm.set_headers_on(self.original_headers_on);
    }
}

fn protocol_candidates(opts: &DiscoveryOptions) -> Vec<char> {
    let mut candidates = vec!['6'];
    if opts.try_250k {
        candidates.push('8');
    }
    if opts.include_29bit {
        candidates.push('7');
    }
    if opts.try_250k && opts.include_29bit {
        candidates.push('9');
    }
    candidates
}

fn probe_contains(tokens: &[String], needle: &[&str]) -> bool {
    tokens.windows(needle.len().max(1)).any(|w| w.iter().map(String::as_str).eq(needle.iter().copied()))
}

/// Runs one `10 03` / `3E 00` liveness probe against `tx_id` with retries,
/// returning the set of rx-ids (ECU headers) whose merged payload
/// contained an accepted response pattern.
fn probe_tx_id(elm: &mut ElmDriver, tx_id: u16, opts: &DiscoveryOptions) -> Vec<String> {
    let _ = elm.exchange(&format!("ATSH{tx_id:03X}"));

    for attempt in 0..=opts.retries {
        if let Some(rx) = try_probe(elm, "10 03", &["50"], &["7F", "10"]) {
            return rx;
        }
        if let Some(rx) = try_probe(elm, "3E 00", &["7E"], &["7F", "3E"]) {
            return rx;
        }
        if attempt < opts.retries {
            std::thread::sleep(Duration::from_millis(100));
        }
    }
    Vec::new()
}

fn try_probe(elm: &mut ElmDriver, command: &str, positive: &[&str], negative: &[&str]) -> Option<Vec<String>> {
    let lines = elm.exchange(command).ok()?;
    let grouped = parse_lines(&lines, elm.state().headers_on);
    let map = MergedPayloadMap::build(&grouped, elm.state().headers_on);
    let mut hits = Vec::new();
    for (ecu, tokens) in map.iter() {
        if probe_contains(tokens, positive) || probe_contains(tokens, negative) {
            hits.push(ecu.to_string());
        }
    }
    if hits.is_empty() {
        None
    } else {
        Some(hits)
    }
}

fn scan_11bit(elm: &mut ElmDriver, opts: &DiscoveryOptions) -> Vec<DiscoveredModule> {
    let mut modules = Vec::new();
    for tx_id in opts.id_start..=opts.id_end {
        let rx_ids = probe_tx_id(elm, tx_id, opts);
        if rx_ids.is_empty() {
            continue;
        }
        let mut rx_iter = rx_ids.into_iter();
        let rx_id = rx_iter.next().unwrap();
        let alternates: Vec<String> = rx_iter.collect();
        modules.push(DiscoveredModule {
            tx_id: format!("{tx_id:03X}"),
            rx_id,
            alternates,
            vin: None,
            requires_security: false,
            dtc_fingerprint: None,
            module_type: ModuleType::Unknown,
            brand_signature: None,
            confidence: 1,
        });
    }
    modules
}

fn scan_29bit(elm: &mut ElmDriver) -> Vec<DiscoveredModule> {
    let mut modules = Vec::new();
    let _ = elm.exchange("ATSH18DB33F1");
    if let Some(rx_ids) = try_probe(elm, "10 03", &["50"], &["7F", "10"]) {
        for rx_id in rx_ids {
            // rx-id of the form 18DAF1<ee> -> tx = 18DA<ee>F1
            let tx_id = if rx_id.len() == 8 {
                let ee = &rx_id[6..8];
                format!("18DA{ee}F1")
            } else {
                rx_id.clone()
            };
            modules.push(DiscoveredModule {
                tx_id,
                rx_id,
                alternates: Vec::new(),
                vin: None,
                requires_security: false,
                dtc_fingerprint: None,
                module_type: ModuleType::Unknown,
                brand_signature: None,
                confidence: 1,
            });
        }
    }
    modules
}

fn confirm_vin(elm: &mut ElmDriver, module: &mut DiscoveredModule) {
    let _ = elm.exchange(&format!("ATSH{}", module.tx_id));
    let found = elm.query_payload("22 F1 90", &["62", "F1", "90"]);
    match found {
        Ok(Some((_, payload))) => {
            let data = &payload[3.min(payload.len())..];
            let ascii: String = data
                .iter()
                .copied()
                .filter(|&b| (0x20..=0x7E).contains(&b))
                .map(|b| b as char)
                .take(17)
                .collect();
            if !ascii.is_empty() {
                module.vin = Some(ascii);
                module.confidence += 1;
            }
        }
        Ok(None) => {
            if let Ok(lines) = elm.exchange("22 F1 90") {
                let grouped = parse_lines(&lines, elm.state().headers_on);
                let map = MergedPayloadMap::build(&grouped, elm.state().headers_on);
                for (_, tokens) in map.iter() {
                    if probe_contains(tokens, &["7F", "22", "33"]) {
                        module.requires_security = true;
                    }
                }
            }
        }
        Err(_) => {}
    }
}

fn confirm_dtcs(elm: &mut ElmDriver, module: &mut DiscoveredModule) {
    let _ = elm.exchange(&format!("ATSH{}", module.tx_id));
    if let Ok(Some((_, payload))) = elm.query_payload("19 02 FF", &["59", "02"]) {
        let groups = &payload[2.min(payload.len())..];
        let records: Vec<UdsDtcRecord> = groups
            .chunks_exact(4)
            .map(|g| UdsDtcRecord {
                code: crate::dtc::decode_dtc_bytes(g[0], g[1]),
                status: g[3],
            })
            .collect();
        let fingerprint = DtcFingerprint::from_records(&records);
        module.module_type = ModuleType::from_fingerprint(&fingerprint);
        module.dtc_fingerprint = Some(fingerprint);
        module.confidence += 1;
    }
}

fn overlay_brand_signatures(modules: &mut [DiscoveredModule], catalog: &[BrandSignature]) {
    for module in modules.iter_mut() {
        if let Some(sig) = catalog.iter().find(|s| s.tx_id == module.tx_id && s.rx_id == module.rx_id) {
            module.brand_signature = Some(sig.name.clone());
            module.confidence += 1;
        }
    }
}

/// Runs the full discovery algorithm (spec.md §4.8): saves and restores
/// adapter protocol/headers via [ProtocolGuard], iterates protocol
/// candidates, scans for modules, optionally confirms VIN/DTCs, overlays
/// brand signatures, and writes a recovered VIN to `cache` if provided.
pub fn discover(
    elm: &mut ElmDriver,
    opts: &DiscoveryOptions,
    catalog: &[BrandSignature],
    cache: Option<&dyn VinCache>,
) -> Result<DiscoveryResult, DiagError> {
    let start = Instant::now();
    let mut guard = ProtocolGuard::new(elm);

    let mut all_modules = Vec::new();
    for protocol in protocol_candidates(opts) {
        guard.elm().set_protocol(protocol)?;
        guard.elm().set_headers_on(true)?;

        let mut modules = scan_11bit(guard.elm(), opts);
        if opts.include_29bit && (protocol == '7' || protocol == '9') {
            modules.extend(scan_29bit(guard.elm()));
        }

        if !modules.is_empty() {
            for module in modules.iter_mut() {
                if opts.confirm_vin {
                    confirm_vin(guard.elm(), module);
                }
                if opts.confirm_dtcs {
                    confirm_dtcs(guard.elm(), module);
                }
            }
            // spec.md §4.8 step 6: only overlay brand signatures when a
            // brand hint or a VIN-derived brand is available.
            if opts.brand_hint.is_some() || modules.iter().any(|m| m.vin.is_some()) {
                overlay_brand_signatures(&mut modules, catalog);
            }
            all_modules.extend(modules);
            if opts.stop_on_first {
                break;
            }
        }
    }

    if let Some(cache) = cache {
        if let Some(vin) = all_modules.iter().find_map(|m| m.vin.clone()) {
            let discovered_modules = serde_json::to_value(
                all_modules
                    .iter()
                    .map(|m| (m.tx_id.clone(), m.rx_id.clone()))
                    .collect::<Vec<_>>(),
            )
            .ok();
            let entry = VinCacheEntry {
                attributes: serde_json::json!({}),
                discovered_modules,
                cached_at: chrono::Utc::now(),
            };
            let _ = cache.set(&normalize_vin(&vin), entry);
        }
    }

    Ok(DiscoveryResult {
        modules: all_modules,
        elapsed_s: start.elapsed().as_secs_f64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_type_picks_dominant_letter() {
        let fp = DtcFingerprint { powertrain: 3, chassis: 1, body: 0, network: 0 };
        assert_eq!(ModuleType::from_fingerprint(&fp), ModuleType::Powertrain);
    }

    #[test]
    fn module_type_unknown_when_empty() {
        let fp = DtcFingerprint::default();
        assert_eq!(ModuleType::from_fingerprint(&fp), ModuleType::Unknown);
    }

    #[test]
    fn default_protocol_candidates_include_500k_only() {
        let opts = DiscoveryOptions::default();
        assert_eq!(protocol_candidates(&opts), vec!['6']);
    }

    #[test]
    fn full_candidate_set_when_every_flag_set() {
        let opts = DiscoveryOptions {
            try_250k: true,
            include_29bit: true,
            ..DiscoveryOptions::default()
        };
        assert_eq!(protocol_candidates(&opts), vec!['6', '8', '7', '9']);
    }

    #[test]
    fn overlay_matches_by_exact_tx_rx_pair() {
        let mut modules = vec![DiscoveredModule {
            tx_id: "7E0".to_string(),
            rx_id: "7E8".to_string(),
            alternates: Vec::new(),
            vin: None,
            requires_security: false,
            dtc_fingerprint: None,
            module_type: ModuleType::Unknown,
            brand_signature: None,
            confidence: 1,
        }];
        let catalog = vec![BrandSignature {
            name: "Engine (generic)".to_string(),
            tx_id: "7E0".to_string(),
            rx_id: "7E8".to_string(),
        }];
        overlay_brand_signatures(&mut modules, &catalog);
        assert_eq!(modules[0].brand_signature.as_deref(), Some("Engine (generic)"));
        assert_eq!(modules[0].confidence, 2);
    }
}
