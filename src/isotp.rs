//! Multi-frame ISO-TP payload merging, PCI stripping, and prefix lookup.
//!
//! See spec.md §4.3. PCI stripping runs over the concatenated per-ECU byte
//! stream, not per original CAN frame boundary: `strip_length_heuristic` is
//! applied once per grouped line (to drop ELM327's own length byte, not an
//! ISO-TP PCI byte), then all frames of an ECU are concatenated, and
//! [strip_pci] walks the merged stream applying the PCI table.

use crate::line_parser::EcuResponse;

/// Preferred ECU scan order used by [find_prefix]; ECUs not in this list are
/// scanned afterwards in their original (insertion) order.
pub const PREFERRED_ECU_ORDER: &[&str] =
    &["7E8", "7E0", "7E9", "7E1", "7EA", "7E2", "7EB", "7E3"];

/// Drops the ELM327 length byte from a headers-on response line's token
/// tail, if present. `tokens` is the per-line token list with the ECU
/// identifier already removed. The heuristic: drop the next token only if
/// it parses as hex in `(0, remaining_tokens]`, where `remaining_tokens` is
/// the count of tokens after it.
///
/// Preserved exactly as the pathological-input-sensitive heuristic
/// described in spec.md §9, rather than replaced with a strict decoder.
pub fn strip_length_heuristic(tokens: &[String]) -> Vec<String> {
    if tokens.is_empty() {
        return Vec::new();
    }
    let len_tok = &tokens[0];
    if matches!(len_tok.len(), 1 | 2) {
        if let Ok(ln) = u32::from_str_radix(len_tok, 16) {
            let remaining = (tokens.len() - 1) as u32;
            if ln > 0 && ln <= remaining {
                return tokens[1..].to_vec();
            }
        }
    }
    tokens.to_vec()
}

/// Strips ISO-TP PCI bytes from a merged token stream per the frame-type
/// table in spec.md §4.3:
///
/// | High nibble | Frame type    | Bytes removed |
/// |---|---|---|
/// | 0x0 | single | 1 |
/// | 0x1 | first | 2 |
/// | 0x2 | consecutive | 1 |
/// | 0x3 | flow control | 3 |
///
/// Invariant: output length equals input length minus the sum of dropped
/// bytes per frame type. Tokens that don't parse as a two-hex-char byte
/// pass through unchanged (and are not counted as a PCI byte).
pub fn strip_pci(tokens: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0usize;
    let n = tokens.len();
    while i < n {
        let t = &tokens[i];
        if t.len() != 2 {
            out.push(t.clone());
            i += 1;
            continue;
        }
        let Ok(b) = u8::from_str_radix(t, 16) else {
            out.push(t.clone());
            i += 1;
            continue;
        };
        match (b & 0xF0) >> 4 {
            0x0 => i += 1,
            0x1 => i += 2,
            0x2 => i += 1,
            0x3 => i += 3,
            _ => {
                out.push(t.clone());
                i += 1;
            }
        }
    }
    out
}

/// Ordered mapping from ECU identifier to its concatenated, PCI-stripped
/// byte sequence. Built fresh per request; never mutated after construction.
#[derive(Debug, Clone, Default)]
pub struct MergedPayloadMap {
    entries: Vec<(String, Vec<String>)>,
}

impl MergedPayloadMap {
    /// Builds the merged payload map from grouped ECU responses. `headers_on`
    /// controls whether the length-byte heuristic is applied (it only makes
    /// sense when the first token of each original line was an ECU header
    /// consumed by [crate::line_parser::parse_lines]).
    pub fn build(grouped: &[EcuResponse], headers_on: bool) -> Self {
        let mut entries: Vec<(String, Vec<String>)> = Vec::new();
        for g in grouped {
            let stripped_line = if headers_on {
                strip_length_heuristic(&g.tokens)
            } else {
                g.tokens.clone()
            };
            match entries.iter_mut().find(|(ecu, _)| ecu == &g.ecu) {
                Some((_, bytes)) => bytes.extend(stripped_line),
                None => entries.push((g.ecu.clone(), stripped_line)),
            }
        }
        for (_, bytes) in entries.iter_mut() {
            *bytes = strip_pci(bytes);
        }
        Self { entries }
    }

    /// Iterates the map in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(e, b)| (e.as_str(), b.as_slice()))
    }

    /// Looks up the payload for one ECU identifier.
    pub fn get(&self, ecu: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(e, _)| e == ecu)
            .map(|(_, b)| b.as_slice())
    }

    /// Returns true if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Concatenates every ECU's bytes into one hex string (uppercase, no
    /// separators), in preferred-ECU-first order. Used by code paths that
    /// only need "is there a `4100` anywhere" style checks.
    pub fn concat_hex(&self) -> String {
        let mut s = String::new();
        for (_, bytes) in self.iter() {
            for b in bytes {
                s.push_str(b);
            }
        }
        s
    }
}

/// Scans `map` in preferred-ECU order (truncated by presence), then the
/// remaining ECUs in insertion order; within each ECU, scans for `prefix` at
/// any token offset. Returns the first match as `(ecu, payload_from_prefix)`.
pub fn find_prefix<'a>(map: &'a MergedPayloadMap, prefix: &[&str]) -> Option<(&'a str, Vec<String>)> {
    let mut order: Vec<&str> = PREFERRED_ECU_ORDER
        .iter()
        .copied()
        .filter(|ecu| map.get(ecu).is_some())
        .collect();
    for (ecu, _) in map.iter() {
        if !order.contains(&ecu) {
            order.push(ecu);
        }
    }

    for ecu in order {
        let bytes = map.get(ecu)?;
        if let Some(offset) = find_subsequence(bytes, prefix) {
            return Some((ecu, bytes[offset..].to_vec()));
        }
    }
    None
}

fn find_subsequence(bytes: &[String], prefix: &[&str]) -> Option<usize> {
    if prefix.is_empty() || bytes.len() < prefix.len() {
        return None;
    }
    'outer: for start in 0..=(bytes.len() - prefix.len()) {
        for (i, p) in prefix.iter().enumerate() {
            if bytes[start + i] != *p {
                continue 'outer;
            }
        }
        return Some(start);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(|t| t.to_string()).collect()
    }

    #[test]
    fn single_frame_drops_one_byte() {
        // 0x06 is PCI single-frame with "length 6" -- drop only the PCI byte
        let merged = strip_pci(&toks("06 41 0C 1A F8"));
        assert_eq!(merged, toks("41 0C 1A F8"));
    }

    #[test]
    fn length_heuristic_drops_plausible_length_byte() {
        // after ECU removal: "06 43 02 01 18 02 20" -> len=06, remaining=6 -> matches exactly -> drop
        let out = strip_length_heuristic(&toks("06 43 02 01 18 02 20"));
        assert_eq!(out, toks("43 02 01 18 02 20"));
    }

    #[test]
    fn length_heuristic_leaves_implausible_length_alone() {
        // len would be 0xFF, way beyond remaining tokens -> untouched
        let out = strip_length_heuristic(&toks("FF 41 0C"));
        assert_eq!(out, toks("FF 41 0C"));
    }

    #[test]
    fn find_prefix_prefers_canonical_ecu_order() {
        let grouped = vec![
            EcuResponse { ecu: "7E0".into(), tokens: toks("06 41 0C 00 00") },
            EcuResponse { ecu: "7E8".into(), tokens: toks("06 41 0C 1A F8") },
        ];
        let map = MergedPayloadMap::build(&grouped, true);
        let (ecu, payload) = find_prefix(&map, &["41", "0C"]).unwrap();
        assert_eq!(ecu, "7E8");
        assert_eq!(payload, toks("41 0C 1A F8"));
    }
}
