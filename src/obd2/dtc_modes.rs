//! Mode 03 (stored DTCs), Mode 07 (pending DTCs), and Mode 0A (permanent
//! DTCs) reads. See spec.md §4.5.

use crate::dtc::{parse_dtc_groups, Dtc, DtcStatus};
use crate::elm::ElmDriver;
use crate::DiagError;

fn read_dtc_mode(elm: &mut ElmDriver, command: &str, response_prefix: &str, status: DtcStatus) -> Result<Vec<Dtc>, DiagError> {
    let found = elm.query_payload(command, &[response_prefix])?;
    let Some((_, payload)) = found else {
        return Ok(Vec::new());
    };
    // payload starts with [prefix, count]; both are dropped before grouping.
    let data = &payload[2.min(payload.len())..];
    Ok(parse_dtc_groups(data, status))
}

/// Mode 03: currently stored (confirmed) DTCs.
pub fn read_stored_dtcs(elm: &mut ElmDriver) -> Result<Vec<Dtc>, DiagError> {
    read_dtc_mode(elm, "03", "43", DtcStatus::Stored)
}

/// Mode 07: pending DTCs, not yet confirmed across enough drive cycles.
pub fn read_pending_dtcs(elm: &mut ElmDriver) -> Result<Vec<Dtc>, DiagError> {
    read_dtc_mode(elm, "07", "47", DtcStatus::Pending)
}

/// Mode 0A: permanent DTCs, which cannot be cleared by Mode 04.
pub fn read_permanent_dtcs(elm: &mut ElmDriver) -> Result<Vec<Dtc>, DiagError> {
    read_dtc_mode(elm, "0A", "4A", DtcStatus::Permanent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_scenario_strips_prefix_and_count() {
        // spec.md §8 scenario 2: payload [43,02,01,18,02,20] -> strip prefix
        // `43` and count `02` -> [01,18,02,20] -> P0118, P0220.
        let payload = [0x43u8, 0x02, 0x01, 0x18, 0x02, 0x20];
        let data = &payload[2..];
        let codes = parse_dtc_groups(data, DtcStatus::Stored);
        assert_eq!(codes.len(), 2);
        assert_eq!(codes[0].code, "P0118");
        assert_eq!(codes[1].code, "P0220");
        assert!(codes.iter().all(|d| d.status == DtcStatus::Stored));
    }

    #[test]
    fn short_payload_yields_no_codes() {
        let data: &[u8] = &[];
        assert!(parse_dtc_groups(data, DtcStatus::Pending).is_empty());
    }
}
