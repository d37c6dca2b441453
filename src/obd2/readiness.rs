//! Mode 01 PID 01 readiness/monitor decoding. See spec.md §3 "Readiness
//! Monitor Set" and §4.5 "Readiness".
//!
//! Grounded on `original_source/obd/scanner.py`'s readiness bit layout.

/// One readiness monitor's completion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorState {
    /// The ECU supports this monitor (its support bit is set).
    pub available: bool,
    /// The monitor's self-test has completed (its incomplete bit is
    /// clear, and only meaningful when [Self::available]).
    pub complete: bool,
}

/// Which engine-type monitor table applies, selected by PID 01 byte B bit 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Spark-ignition (gasoline) monitor table.
    Spark,
    /// Compression-ignition (diesel) monitor table.
    Compression,
}

/// Decoded Mode 01 PID 01 response: MIL state, stored DTC count, and every
/// readiness monitor's completion state.
#[derive(Debug, Clone)]
pub struct Readiness {
    /// Malfunction Indicator Lamp state.
    pub mil_on: bool,
    /// Count of DTCs currently stored (bits 0-6 of byte A).
    pub dtc_count: u8,
    /// Which monitor table (spark vs compression) this readiness uses.
    pub engine_kind: EngineKind,
    /// The three monitors common to both continuous-monitor tables.
    pub misfire: MonitorState,
    /// Fuel system monitor.
    pub fuel_system: MonitorState,
    /// Components monitor.
    pub components: MonitorState,
    /// Non-continuous monitors, keyed by name. Populated per
    /// [EngineKind]'s bitmap (spec.md §4.5).
    pub non_continuous: Vec<(&'static str, MonitorState)>,
}

/// Decodes bytes A, B, C, D of a Mode 01 PID 01 response (the payload
/// immediately following the `41 01` prefix) into a [Readiness]. Bit
/// layout per spec.md §4.5:
///
/// - MIL = bit 7 of A; DTC count = bits 0-6 of A.
/// - Engine kind: B bit 3 (0=spark, 1=compression).
/// - Misfire: B bit 0 support / C bit 0 incomplete.
/// - Fuel System: B bit 1 / C bit 1.
/// - Components: B bit 2 / C bit 2.
/// - Spark: Catalyst B4/D0, Heated Catalyst B5/D1, Evap B6/D2, Secondary
///   Air B7/D3, A/C C3/D4, O2 C4/D5, O2 Heater C5/D6, EGR C6/D7.
/// - Diesel: NMHC C0/D0, NOx C1/D1, Boost C3/D3, Exhaust Gas Sensor C5/D5,
///   PM Filter C6/D6, EGR/VVT C7/D7.
pub fn decode_readiness(a: u8, b: u8, c: u8, d: u8) -> Readiness {
    let mil_on = a & 0x80 != 0;
    let dtc_count = a & 0x7F;
    let engine_kind = if b & 0x08 != 0 { EngineKind::Compression } else { EngineKind::Spark };

    let monitor = |support_bit: u8, support_byte: u8, incomplete_bit: u8, incomplete_byte: u8| MonitorState {
        available: support_byte & (1 << support_bit) != 0,
        complete: support_byte & (1 << support_bit) != 0 && incomplete_byte & (1 << incomplete_bit) == 0,
    };

    let misfire = monitor(0, b, 0, c);
    let fuel_system = monitor(1, b, 1, c);
    let components = monitor(2, b, 2, c);

    let non_continuous = match engine_kind {
        EngineKind::Spark => vec![
            ("Catalyst", monitor(4, b, 0, d)),
            ("Heated Catalyst", monitor(5, b, 1, d)),
            ("Evaporative System", monitor(6, b, 2, d)),
            ("Secondary Air System", monitor(7, b, 3, d)),
            ("A/C Refrigerant", monitor(3, c, 4, d)),
            ("Oxygen Sensor", monitor(4, c, 5, d)),
            ("Oxygen Sensor Heater", monitor(5, c, 6, d)),
            ("EGR System", monitor(6, c, 7, d)),
        ],
        EngineKind::Compression => vec![
            ("NMHC Catalyst", monitor(0, c, 0, d)),
            ("NOx/SCR Monitor", monitor(1, c, 1, d)),
            ("Boost Pressure", monitor(3, c, 3, d)),
            ("Exhaust Gas Sensor", monitor(5, c, 5, d)),
            ("PM Filter Monitoring", monitor(6, c, 6, d)),
            ("EGR/VVT System", monitor(7, c, 7, d)),
        ],
    };

    Readiness {
        mil_on,
        dtc_count,
        engine_kind,
        misfire,
        fuel_system,
        components,
        non_continuous,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_scenario_from_spec() {
        // spec.md §8 scenario 4: payload [41,01,83,07,FF,00]
        let r = decode_readiness(0x83, 0x07, 0xFF, 0x00);
        assert!(r.mil_on);
        assert_eq!(r.dtc_count, 3);
        assert_eq!(r.engine_kind, EngineKind::Spark);
        // B's support bits 0-2 are set, so all three continuous monitors
        // are supported, but C=0xFF sets every incomplete bit, so none of
        // them have finished their self-test.
        assert!(r.misfire.available && !r.misfire.complete);
        assert!(r.fuel_system.available && !r.fuel_system.complete);
        assert!(r.components.available && !r.components.complete);
        // B's support bits 4-7 are clear, so catalyst/evap/secondary-air
        // aren't supported; C's support bits 3-6 are set and D=0x00 clears
        // every incomplete bit, so A/C, O2, O2 heater, and EGR are
        // supported and complete.
        let find = |name: &str| r.non_continuous.iter().find(|(n, _)| *n == name).unwrap().1;
        assert!(!find("Catalyst").available);
        assert!(!find("Heated Catalyst").available);
        assert!(!find("Evaporative System").available);
        assert!(!find("Secondary Air System").available);
        assert!(find("A/C Refrigerant").available && find("A/C Refrigerant").complete);
        assert!(find("Oxygen Sensor").available && find("Oxygen Sensor").complete);
        assert!(find("Oxygen Sensor Heater").available && find("Oxygen Sensor Heater").complete);
        assert!(find("EGR System").available && find("EGR System").complete);
    }

    #[test]
    fn decode_is_idempotent() {
        let first = decode_readiness(0x83, 0x07, 0xFF, 0x00);
        let second = decode_readiness(0x83, 0x07, 0xFF, 0x00);
        assert_eq!(first.mil_on, second.mil_on);
        assert_eq!(first.dtc_count, second.dtc_count);
        assert_eq!(first.non_continuous, second.non_continuous);
    }

    #[test]
    fn diesel_uses_compression_table() {
        let r = decode_readiness(0x00, 0x08, 0x00, 0x00);
        assert_eq!(r.engine_kind, EngineKind::Compression);
        assert_eq!(r.non_continuous.len(), 6);
        assert!(r.non_continuous.iter().any(|(name, _)| *name == "NOx/SCR Monitor"));
    }
}
