//! Mode 01 (live data) and Mode 02 (freeze frame) read operations. See
//! spec.md §4.5.

use crate::dtc::{decode_dtc_bytes, Dtc, DtcStatus};
use crate::elm::ElmDriver;
use crate::DiagError;

use super::pids::lookup;

/// One decoded Mode 01 or 02 reading.
#[derive(Debug, Clone)]
pub struct Reading {
    /// PID name.
    pub name: String,
    /// Engineering unit.
    pub unit: String,
    /// Decoded value, rounded to the caller's requested precision.
    /// `None` if the PID isn't in the descriptor table ("Unknown PID").
    pub value: Option<f64>,
    /// ECU that answered.
    pub ecu: String,
}

/// Reads one Mode 01 PID, decoding with its [super::pids::PidDescriptor]
/// formula and rounding to `precision` decimal digits (spec.md default 2).
/// An unknown PID yields a `Reading` with `value: None`.
pub fn read_live_pid(elm: &mut ElmDriver, pid: u8, precision: u32) -> Result<Option<Reading>, DiagError> {
    let command = format!("01{pid:02X}");
    let pid_hex = format!("{pid:02X}");
    let found = elm.query_payload(&command, &["41", &pid_hex])?;
    let Some((ecu, payload)) = found else {
        return Ok(None);
    };
    let data = &payload[2.min(payload.len())..];

    let descriptor = lookup(pid);
    let (name, unit, value) = match descriptor {
        Some(d) => {
            let raw = d.formula.decode(data);
            let rounded = raw.map(|v| round_to(v, precision));
            (d.name.to_string(), d.unit.to_string(), rounded)
        }
        None => (format!("PID 0x{pid:02X}"), String::new(), None),
    };

    Ok(Some(Reading { name, unit, value, ecu }))
}

/// Reads every PID in `pids` (or, if `None`, every PID in the descriptor
/// table), skipping PIDs the ECU doesn't answer.
pub fn read_live_data(
    elm: &mut ElmDriver,
    pids: Option<&[u8]>,
    precision: u32,
) -> Result<Vec<Reading>, DiagError> {
    let codes: Vec<u8> = match pids {
        Some(p) => p.to_vec(),
        None => super::pids::PID_TABLE.iter().map(|p| p.code).collect(),
    };
    let mut out = Vec::new();
    for code in codes {
        if let Some(reading) = read_live_pid(elm, code, precision)? {
            out.push(reading);
        }
    }
    Ok(out)
}

fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

/// Canonical freeze-frame PID set read by [read_freeze_frame] (spec.md
/// §4.5 Mode 02).
pub const FREEZE_FRAME_PIDS: &[u8] = &[0x04, 0x05, 0x06, 0x07, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x11];

/// One freeze-frame snapshot: the triggering DTC plus every canonical
/// PID's reading at the time it was captured.
#[derive(Debug, Clone)]
pub struct FreezeFrame {
    /// The DTC that triggered this freeze frame, if decodable from the
    /// frame-0 response of PID 02.
    pub triggering_dtc: Option<Dtc>,
    /// Readings for [FREEZE_FRAME_PIDS].
    pub readings: Vec<Reading>,
}

/// Reads freeze frame `frame` (ELM327/J1979 frame index, usually `0`):
/// requests `02<pid><frame>`, expecting prefix `42<pid>`, for the
/// canonical PID set, plus the triggering DTC from PID 02's frame-0
/// response.
pub fn read_freeze_frame(elm: &mut ElmDriver, frame: u8, precision: u32) -> Result<FreezeFrame, DiagError> {
    let triggering_dtc = {
        let command = format!("0202{frame:02X}");
        let found = elm.query_payload(&command, &["42", "02"])?;
        found.and_then(|(_, payload)| {
            // Drop `42`, `02`, and the echoed frame-index byte.
            let data = &payload[3.min(payload.len())..];
            if data.len() >= 2 && (data[0] != 0 || data[1] != 0) {
                Some(Dtc {
                    code: decode_dtc_bytes(data[0], data[1]),
                    status: DtcStatus::Stored,
                })
            } else {
                None
            }
        })
    };

    let mut readings = Vec::new();
    for &pid in FREEZE_FRAME_PIDS {
        let command = format!("02{pid:02X}{frame:02X}");
        let pid_hex = format!("{pid:02X}");
        if let Some((ecu, payload)) = elm.query_payload(&command, &["42", &pid_hex])? {
            // Drop `42`, the PID, and the echoed frame-index byte.
            let data = &payload[3.min(payload.len())..];
            let descriptor = lookup(pid);
            let (name, unit, value) = match descriptor {
                Some(d) => (d.name.to_string(), d.unit.to_string(), d.formula.decode(data).map(|v| round_to(v, precision))),
                None => (format!("PID 0x{pid:02X}"), String::new(), None),
            };
            readings.push(Reading { name, unit, value, ecu });
        }
    }

    Ok(FreezeFrame { triggering_dtc, readings })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_uses_default_precision() {
        assert_eq!(round_to(1726.0, 2), 1726.0);
        assert_eq!(round_to(1.23456, 2), 1.23);
    }
}
