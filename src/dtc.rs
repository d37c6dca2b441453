//! Diagnostic trouble code (DTC) decoding, encoding, and the code/description
//! lookup database.
//!
//! See spec.md §3 ("DTC") and §4.10 ("DTC Database"). A DTC is a four-nibble
//! encoding: the top two bits of the first nibble select one of `P` (Powertrain),
//! `C` (Chassis), `B` (Body), `U` (Network); the remaining bits form the
//! four-digit numeric suffix. See spec.md §8 for the byte<->code worked
//! example (`P0118` <-> bytes `01 18`).

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

/// One of the four DTC system prefixes, selected by the top two bits of the
/// first nibble of byte 0.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DtcSystem {
    /// `P` - Powertrain.
    Powertrain,
    /// `C` - Chassis.
    Chassis,
    /// `B` - Body.
    Body,
    /// `U` - Network/communication.
    Network,
}

impl DtcSystem {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => DtcSystem::Powertrain,
            1 => DtcSystem::Chassis,
            2 => DtcSystem::Body,
            _ => DtcSystem::Network,
        }
    }

    fn bits(self) -> u8 {
        match self {
            DtcSystem::Powertrain => 0,
            DtcSystem::Chassis => 1,
            DtcSystem::Body => 2,
            DtcSystem::Network => 3,
        }
    }

    fn letter(self) -> char {
        match self {
            DtcSystem::Powertrain => 'P',
            DtcSystem::Chassis => 'C',
            DtcSystem::Body => 'B',
            DtcSystem::Network => 'U',
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'P' => Some(DtcSystem::Powertrain),
            'C' => Some(DtcSystem::Chassis),
            'B' => Some(DtcSystem::Body),
            'U' => Some(DtcSystem::Network),
            _ => None,
        }
    }
}

/// Storage state of a DTC: set by which OBD-II mode (or UDS status mask bit)
/// reported it, not encoded in the DTC bytes themselves.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum DtcStatus {
    /// Reported by Mode 03 / UDS confirmed-DTC status.
    Stored,
    /// Reported by Mode 07 (pending DTCs not yet confirmed).
    Pending,
    /// Reported by Mode 0A (permanent DTCs that cannot be cleared by Mode 04).
    Permanent,
}

/// A decoded diagnostic trouble code: a five-character code (`P0118`) plus
/// the status under which it was reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dtc {
    /// Five-character code, e.g. `"P0118"`.
    pub code: String,
    /// Status under which this code was reported.
    pub status: DtcStatus,
}

/// Decodes one 2-byte DTC group into its five-character code. Does not
/// filter `0000` groups; callers (spec.md §4.5 Mode 03/07/0A) discard those
/// before calling this.
pub fn decode_dtc_bytes(b0: u8, b1: u8) -> String {
    let system = DtcSystem::from_bits((b0 >> 6) & 0b11);
    let d1 = (b0 >> 4) & 0b11;
    let d2 = b0 & 0x0F;
    let d3 = (b1 >> 4) & 0x0F;
    let d4 = b1 & 0x0F;
    format!("{}{:01X}{:01X}{:01X}{:01X}", system.letter(), d1, d2, d3, d4)
}

/// Encodes a five-character DTC code (e.g. `"P0118"`) back into its 2-byte
/// nibble form. Returns `None` if the code isn't exactly one system letter
/// followed by four hex digits, or if the second character doesn't fit in
/// the two bits reserved for it (must be `0`-`3`).
pub fn encode_dtc_code(code: &str) -> Option<(u8, u8)> {
    let chars: Vec<char> = code.chars().collect();
    if chars.len() != 5 {
        return None;
    }
    let system = DtcSystem::from_letter(chars[0])?;
    let d1 = chars[1].to_digit(16)? as u8;
    let d2 = chars[2].to_digit(16)? as u8;
    let d3 = chars[3].to_digit(16)? as u8;
    let d4 = chars[4].to_digit(16)? as u8;
    if d1 > 0b11 {
        return None;
    }
    let b0 = (system.bits() << 6) | (d1 << 4) | d2;
    let b1 = (d3 << 4) | d4;
    Some((b0, b1))
}

/// Splits a stream of hex-byte tokens following a DTC-bearing mode prefix
/// (Mode 03/07/0A) into 2-byte groups, drops `0000` groups, and tags every
/// surviving code with `status`.
pub fn parse_dtc_groups(bytes: &[u8], status: DtcStatus) -> Vec<Dtc> {
    bytes
        .chunks_exact(2)
        .filter(|pair| pair[0] != 0 || pair[1] != 0)
        .map(|pair| Dtc {
            code: decode_dtc_bytes(pair[0], pair[1]),
            status,
        })
        .collect()
}

/// Manufacturer name -> CSV file name overlay, applied after the generic
/// database. Grounded on `original_source/obd/dtc.py`'s manufacturer file
/// map: several manufacturer names can share the same overlay file.
const MANUFACTURER_FILES: &[(&[&str], &str)] = &[
    (&["chrysler", "jeep", "dodge"], "dtc_jeep_dodge_Chrysler.csv"),
    (&["landrover", "jaguar"], "dtc_landrover.csv"),
];

/// Code -> description lookup, loaded from CSV files: a generic database
/// loaded first, then an optional manufacturer-specific overlay that
/// overwrites conflicting codes. See spec.md §4.10.
#[derive(Debug, Clone, Default)]
pub struct DtcDatabase {
    entries: HashMap<String, String>,
}

impl DtcDatabase {
    /// Returns an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the generic `dtc_generic.csv` database from `data_dir`.
    pub fn load_generic(&mut self, data_dir: &Path) -> io::Result<()> {
        self.load_csv_file(&data_dir.join("dtc_generic.csv"))
    }

    /// Loads and overlays the manufacturer-specific CSV for `manufacturer`
    /// (case-insensitive), if one is registered. Silently does nothing if
    /// `manufacturer` has no matching overlay file.
    pub fn load_manufacturer(&mut self, manufacturer: &str, data_dir: &Path) -> io::Result<()> {
        let lower = manufacturer.to_ascii_lowercase();
        if let Some((_, file)) = MANUFACTURER_FILES.iter().find(|(names, _)| names.contains(&lower.as_str())) {
            self.load_csv_file(&data_dir.join(file))?;
        }
        Ok(())
    }

    /// Reads a two-column `code,description` CSV file (comment lines
    /// starting with `#` and blank lines skipped, UTF-8 BOM tolerated) and
    /// merges it into this database; later loads overwrite earlier entries
    /// on key collision.
    fn load_csv_file(&mut self, path: &Path) -> io::Result<()> {
        let raw = fs::read_to_string(path)?;
        let content = raw.strip_prefix('\u{feff}').unwrap_or(&raw);
        let filtered: String = content
            .lines()
            .filter(|l| {
                let t = l.trim();
                !t.is_empty() && !t.starts_with('#')
            })
            .collect::<Vec<_>>()
            .join("\n");
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(filtered.as_bytes());
        for result in rdr.records() {
            let record = result.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if record.len() < 2 {
                continue;
            }
            let code = record.get(0).unwrap_or("").trim().to_ascii_uppercase();
            let desc = record.get(1).unwrap_or("").trim().to_string();
            if !code.is_empty() {
                self.entries.insert(code, desc);
            }
        }
        Ok(())
    }

    /// Looks up a code's description, case-insensitive.
    pub fn lookup(&self, code: &str) -> Option<&str> {
        self.entries.get(&code.to_ascii_uppercase()).map(String::as_str)
    }

    /// Returns every `(code, description)` pair whose code or description
    /// contains `query` (case-insensitive substring match).
    pub fn search(&self, query: &str) -> Vec<(&str, &str)> {
        let needle = query.to_ascii_uppercase();
        self.entries
            .iter()
            .filter(|(code, desc)| code.contains(&needle) || desc.to_ascii_uppercase().contains(&needle))
            .map(|(c, d)| (c.as_str(), d.as_str()))
            .collect()
    }

    /// Manufacturer names with a registered overlay file.
    pub fn available_manufacturers() -> Vec<&'static str> {
        MANUFACTURER_FILES.iter().flat_map(|(names, _)| names.iter().copied()).collect()
    }

    /// Number of loaded entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no entries are loaded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_system_letter() {
        for code in ["P0118", "C0561", "B0012", "U3FFF"] {
            let (b0, b1) = encode_dtc_code(code).unwrap();
            assert_eq!(decode_dtc_bytes(b0, b1), code, "round trip failed for {code}");
        }
    }

    #[test]
    fn decodes_literal_mode03_example() {
        // spec.md §8 scenario 2: payload [43,02,01,18,02,20] after prefix+length
        // strip leaves [01,18,02,20] -> P0118, P0220.
        let codes = parse_dtc_groups(&[0x01, 0x18, 0x02, 0x20], DtcStatus::Stored);
        assert_eq!(codes.len(), 2);
        assert_eq!(codes[0].code, "P0118");
        assert_eq!(codes[1].code, "P0220");
        assert!(codes.iter().all(|d| d.status == DtcStatus::Stored));
    }

    #[test]
    fn drops_zero_groups() {
        let codes = parse_dtc_groups(&[0x00, 0x00, 0x01, 0x18], DtcStatus::Pending);
        assert_eq!(codes.len(), 1);
        assert_eq!(codes[0].code, "P0118");
    }

    #[test]
    fn first_letter_always_in_pcbu() {
        for b0 in 0..=255u8 {
            for b1 in [0x00u8, 0xFF] {
                let code = decode_dtc_bytes(b0, b1);
                assert_eq!(code.len(), 5);
                assert!(matches!(code.chars().next().unwrap(), 'P' | 'C' | 'B' | 'U'));
            }
        }
    }

    #[test]
    fn encode_rejects_malformed_codes() {
        assert!(encode_dtc_code("P011").is_none());
        assert!(encode_dtc_code("X0118").is_none());
    }
}
