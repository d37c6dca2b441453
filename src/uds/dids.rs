//! DID (Data Identifier) table for Read Data By Identifier. See spec.md
//! §4.6 and §6 "Data files consumed" (brand DID maps under `data/uds/`).

/// How a DID's raw response bytes are rendered into [super::DidRecord::value].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DidDecoder {
    /// Printable bytes, trimmed of trailing non-printable padding.
    Ascii,
    /// Unsigned big-endian integer, rendered as a decimal string.
    UnsignedBigEndian,
    /// Uppercased hex, no separators.
    Hex,
}

/// One DID table entry.
#[derive(Debug, Clone, Copy)]
pub struct DidDescriptor {
    /// The DID, e.g. `0xF190`.
    pub did: u16,
    /// Human-readable name, e.g. `"VIN"`.
    pub name: &'static str,
    /// Decoder used to render the response value.
    pub decoder: DidDecoder,
}

/// Built-in DID table. Grounded on the brand DID map schema described in
/// spec.md §6 (`{did, name, decoder?}`); this is the generic baseline a
/// caller can overlay with a brand-specific JSON map.
pub static DID_TABLE: &[DidDescriptor] = &[
    DidDescriptor { did: 0xF190, name: "VIN", decoder: DidDecoder::Ascii },
    DidDescriptor { did: 0xF18C, name: "ECU Serial Number", decoder: DidDecoder::Ascii },
    DidDescriptor { did: 0xF1A0, name: "Vehicle Manufacturer ECU Software Number", decoder: DidDecoder::Ascii },
    DidDescriptor { did: 0xF187, name: "Vehicle Manufacturer Spare Part Number", decoder: DidDecoder::Ascii },
    DidDescriptor { did: 0xF1A2, name: "System Supplier ECU Software Version", decoder: DidDecoder::Ascii },
    DidDescriptor { did: 0xF40C, name: "Engine Speed", decoder: DidDecoder::UnsignedBigEndian },
    DidDescriptor { did: 0xF405, name: "Engine Coolant Temperature", decoder: DidDecoder::UnsignedBigEndian },
];

/// Looks up a DID's descriptor.
pub fn lookup_did(did: u16) -> Option<&'static DidDescriptor> {
    DID_TABLE.iter().find(|d| d.did == did)
}

/// Decodes `data` per `decoder`.
pub fn decode_did_value(decoder: DidDecoder, data: &[u8]) -> String {
    match decoder {
        DidDecoder::Ascii => data
            .iter()
            .copied()
            .filter(|&b| (0x20..=0x7E).contains(&b))
            .map(|b| b as char)
            .collect::<String>()
            .trim()
            .to_string(),
        DidDecoder::UnsignedBigEndian => {
            let value = data.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
            value.to_string()
        }
        DidDecoder::Hex => data.iter().map(|b| format!("{b:02X}")).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vin_did_decodes_ascii() {
        let descriptor = lookup_did(0xF190).unwrap();
        assert_eq!(descriptor.decoder, DidDecoder::Ascii);
        let decoded = decode_did_value(DidDecoder::Ascii, b"1C4RJFAG105KL5732");
        assert_eq!(decoded, "1C4RJFAG105KL5732");
    }

    #[test]
    fn unsigned_big_endian_decodes_as_decimal() {
        assert_eq!(decode_did_value(DidDecoder::UnsignedBigEndian, &[0x1A, 0xF8]), "6904");
    }

    #[test]
    fn unknown_did_is_not_in_table() {
        assert!(lookup_did(0x0000).is_none());
    }
}
