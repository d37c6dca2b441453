//! OBD-II (SAE J1979) service layer: live data, freeze frame, DTC reads,
//! clear, and VIN. See spec.md §4.5.

pub mod dtc_modes;
pub mod mode01;
pub mod mode04;
pub mod mode09;
pub mod pids;
pub mod readiness;

pub use dtc_modes::{read_pending_dtcs, read_permanent_dtcs, read_stored_dtcs};
pub use mode01::{read_freeze_frame, read_live_data, read_live_pid, FreezeFrame, Reading, FREEZE_FRAME_PIDS};
pub use mode04::clear_dtcs;
pub use mode09::{read_vin, VinReading};
pub use pids::{lookup, Formula, PidDescriptor, PID_TABLE};
pub use readiness::{decode_readiness, EngineKind, MonitorState, Readiness};

use crate::elm::ElmDriver;
use crate::DiagError;

/// Requests `0101` and decodes the readiness payload at offsets `2..6`.
pub fn read_readiness(elm: &mut ElmDriver) -> Result<Option<Readiness>, DiagError> {
    let found = elm.query_payload("0101", &["41", "01"])?;
    let Some((_, payload)) = found else {
        return Ok(None);
    };
    let data = &payload[2.min(payload.len())..];
    if data.len() < 4 {
        return Ok(None);
    }
    Ok(Some(decode_readiness(data[0], data[1], data[2], data[3])))
}
