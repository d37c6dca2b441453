//! Mode 01 PID descriptor table and decoding formulas. See spec.md §3
//! "PID Descriptor" and §9 "Decoder closures".
//!
//! Grounded on `original_source/obd/pids.py`. Formulas are modelled as data
//! (an enumerated arithmetic shape plus constants) rather than closures, so
//! the table stays serialisable and testable per spec.md §9.

/// One of the arithmetic shapes a PID's raw bytes are run through.
/// Single-byte shapes read `A`; two-byte shapes read `(A, B)` as
/// `A*256 + B`.
#[derive(Debug, Clone, Copy)]
pub enum Formula {
    /// `A`
    A,
    /// `A - k`
    AMinusK(f64),
    /// `(A - k) * s`
    AMinusKTimesS { k: f64, s: f64 },
    /// `A * s`
    ATimesS(f64),
    /// `(A*256 + B) * s`
    AB256TimesS(f64),
    /// `(A*256 + B) * s + k`
    AB256TimesSPlusK { s: f64, k: f64 },
}

impl Formula {
    /// Number of data bytes this formula consumes (1 or 2).
    pub fn byte_width(&self) -> usize {
        match self {
            Formula::A | Formula::AMinusK(_) | Formula::AMinusKTimesS { .. } | Formula::ATimesS(_) => 1,
            Formula::AB256TimesS(_) | Formula::AB256TimesSPlusK { .. } => 2,
        }
    }

    /// Decodes `bytes` (at least [Self::byte_width] long) into a value.
    /// Returns `None` if fewer bytes are supplied than the formula needs.
    pub fn decode(&self, bytes: &[u8]) -> Option<f64> {
        match *self {
            Formula::A => bytes.first().map(|&a| a as f64),
            Formula::AMinusK(k) => bytes.first().map(|&a| a as f64 - k),
            Formula::AMinusKTimesS { k, s } => bytes.first().map(|&a| (a as f64 - k) * s),
            Formula::ATimesS(s) => bytes.first().map(|&a| a as f64 * s),
            Formula::AB256TimesS(s) => {
                if bytes.len() < 2 {
                    return None;
                }
                Some((bytes[0] as f64 * 256.0 + bytes[1] as f64) * s)
            }
            Formula::AB256TimesSPlusK { s, k } => {
                if bytes.len() < 2 {
                    return None;
                }
                Some((bytes[0] as f64 * 256.0 + bytes[1] as f64) * s + k)
            }
        }
    }
}

/// An immutable Mode 01 PID table entry. See spec.md §3 "PID Descriptor".
#[derive(Debug, Clone, Copy)]
pub struct PidDescriptor {
    /// PID code, e.g. `0x0C` for Engine RPM.
    pub code: u8,
    /// Human-readable name.
    pub name: &'static str,
    /// Engineering unit, e.g. `"rpm"`.
    pub unit: &'static str,
    /// Decoding formula.
    pub formula: Formula,
    /// Declared minimum value.
    pub min: f64,
    /// Declared maximum value.
    pub max: f64,
}

/// Static Mode 01 PID table. Not exhaustive of J1979 Annex B; covers the
/// PIDs exercised by spec.md's worked examples plus a representative
/// sample of each of the six formula shapes named in spec.md §9.
pub static PID_TABLE: &[PidDescriptor] = &[
    PidDescriptor {
        code: 0x04,
        name: "Calculated Engine Load",
        unit: "%",
        formula: Formula::ATimesS(100.0 / 255.0),
        min: 0.0,
        max: 100.0,
    },
    PidDescriptor {
        code: 0x05,
        name: "Engine Coolant Temperature",
        unit: "\u{00B0}C",
        formula: Formula::AMinusK(40.0),
        min: -40.0,
        max: 215.0,
    },
    PidDescriptor {
        code: 0x0A,
        name: "Fuel Pressure",
        unit: "kPa",
        formula: Formula::ATimesS(3.0),
        min: 0.0,
        max: 765.0,
    },
    PidDescriptor {
        code: 0x0B,
        name: "Intake Manifold Absolute Pressure",
        unit: "kPa",
        formula: Formula::A,
        min: 0.0,
        max: 255.0,
    },
    PidDescriptor {
        code: 0x0C,
        name: "Engine RPM",
        unit: "rpm",
        formula: Formula::AB256TimesS(0.25),
        min: 0.0,
        max: 16_383.75,
    },
    PidDescriptor {
        code: 0x0D,
        name: "Vehicle Speed",
        unit: "km/h",
        formula: Formula::A,
        min: 0.0,
        max: 255.0,
    },
    PidDescriptor {
        code: 0x0E,
        name: "Timing Advance",
        unit: "\u{00B0} before TDC",
        formula: Formula::AMinusKTimesS { k: 128.0, s: 0.5 },
        min: -64.0,
        max: 63.5,
    },
    PidDescriptor {
        code: 0x0F,
        name: "Intake Air Temperature",
        unit: "\u{00B0}C",
        formula: Formula::AMinusK(40.0),
        min: -40.0,
        max: 215.0,
    },
    PidDescriptor {
        code: 0x10,
        name: "Mass Air Flow Rate",
        unit: "g/s",
        formula: Formula::AB256TimesS(0.01),
        min: 0.0,
        max: 655.35,
    },
    PidDescriptor {
        code: 0x11,
        name: "Throttle Position",
        unit: "%",
        formula: Formula::ATimesS(100.0 / 255.0),
        min: 0.0,
        max: 100.0,
    },
    PidDescriptor {
        code: 0x1F,
        name: "Run Time Since Engine Start",
        unit: "s",
        formula: Formula::AB256TimesS(1.0),
        min: 0.0,
        max: 65_535.0,
    },
    PidDescriptor {
        code: 0x21,
        name: "Distance Traveled With MIL On",
        unit: "km",
        formula: Formula::AB256TimesS(1.0),
        min: 0.0,
        max: 65_535.0,
    },
    PidDescriptor {
        code: 0x2F,
        name: "Fuel Tank Level Input",
        unit: "%",
        formula: Formula::ATimesS(100.0 / 255.0),
        min: 0.0,
        max: 100.0,
    },
    PidDescriptor {
        code: 0x33,
        name: "Barometric Pressure",
        unit: "kPa",
        formula: Formula::A,
        min: 0.0,
        max: 255.0,
    },
    PidDescriptor {
        code: 0x3C,
        name: "Catalyst Temperature Bank 1 Sensor 1",
        unit: "\u{00B0}C",
        formula: Formula::AB256TimesSPlusK { s: 0.1, k: -40.0 },
        min: -40.0,
        max: 6_513.5,
    },
    PidDescriptor {
        code: 0x42,
        name: "Control Module Voltage",
        unit: "V",
        formula: Formula::AB256TimesS(0.001),
        min: 0.0,
        max: 65.535,
    },
    PidDescriptor {
        code: 0x46,
        name: "Ambient Air Temperature",
        unit: "\u{00B0}C",
        formula: Formula::AMinusK(40.0),
        min: -40.0,
        max: 215.0,
    },
    PidDescriptor {
        code: 0x5C,
        name: "Engine Oil Temperature",
        unit: "\u{00B0}C",
        formula: Formula::AMinusK(40.0),
        min: -40.0,
        max: 215.0,
    },
];

/// Looks up a PID's descriptor by code.
pub fn lookup(code: u8) -> Option<&'static PidDescriptor> {
    PID_TABLE.iter().find(|p| p.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pid_min_max_round_trips_within_one_ulp() {
        for pid in PID_TABLE {
            // Every registered formula is monotonic increasing in the raw
            // bytes, so the declared min/max correspond to the all-zero and
            // all-ones byte patterns for this formula's width.
            let (min_raw, max_raw): (Vec<u8>, Vec<u8>) = match pid.formula.byte_width() {
                1 => (vec![0], vec![255]),
                _ => (vec![0, 0], vec![0xFF, 0xFF]),
            };
            let decoded_min = pid.formula.decode(&min_raw).unwrap();
            let decoded_max = pid.formula.decode(&max_raw).unwrap();
            assert!(
                (decoded_min - pid.min).abs() < 1e-9,
                "{}: decoded min {decoded_min} != declared {}",
                pid.name,
                pid.min
            );
            assert!(
                (decoded_max - pid.max).abs() < 1e-9,
                "{}: decoded max {decoded_max} != declared {}",
                pid.name,
                pid.max
            );
        }
    }

    #[test]
    fn rpm_literal_example() {
        // spec.md §8 scenario 1: payload [41,0C,1A,F8] -> 1726.0 rpm
        let rpm = lookup(0x0C).unwrap().formula.decode(&[0x1A, 0xF8]).unwrap();
        assert!((rpm - 1726.0).abs() < 1e-9);
    }

    #[test]
    fn timing_advance_uses_a_minus_k_times_s_shape() {
        let descriptor = lookup(0x0E).unwrap();
        assert!(matches!(descriptor.formula, Formula::AMinusKTimesS { .. }));
        // A=0 -> -64, A=255 -> 63.5
        assert!((descriptor.formula.decode(&[0]).unwrap() - (-64.0)).abs() < 1e-9);
        assert!((descriptor.formula.decode(&[255]).unwrap() - 63.5).abs() < 1e-9);
    }
}
